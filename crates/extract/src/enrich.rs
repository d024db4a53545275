use crate::error::StageError;
use crate::llm::TextModel;
use crate::prompt;
use crate::response;
use crate::schema::{Confidence, Leader};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static PROFILE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s]*linkedin\.com/in/[^\s\)"'\]>`]+"#).unwrap());
static TRAILING_ESCAPE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"%[0-9A-Fa-f]{2}$").unwrap());

const BACKGROUND_CHARS: usize = 150;

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Returns the same leaders in the same order, with `profile_url` set only on confident matches.
    async fn enrich(&self, leaders: &[Leader], firm: Option<&str>) -> Result<Vec<Leader>, StageError>;
}

/// Search context for one person: name, title, company, up to three previous
/// roles, two education entries and a short background.
pub fn search_context(leader: &Leader, firm: Option<&str>) -> String {
    let mut parts = vec![leader.name.clone()];
    if let Some(title) = &leader.title {
        parts.push(title.clone());
    }
    if let Some(company) = leader.company.as_deref().or(firm) {
        parts.push(format!("at {company}"));
    }
    parts.extend(leader.previous_roles.iter().take(3).cloned());
    parts.extend(leader.education.iter().take(2).cloned());
    if let Some(background) = &leader.background {
        parts.push(background.chars().take(BACKGROUND_CHARS).collect());
    }
    parts.join("\n")
}

/// First profile URL in `text`, with trailing punctuation and a trailing percent-escape removed.
pub fn find_profile_url(text: &str) -> Option<String> {
    let found = PROFILE_URL.find(text)?.as_str();
    let trimmed = found.trim_end_matches(['.', ',', ';', ':']);
    let trimmed = TRAILING_ESCAPE.replace(trimmed, "");
    let url = trimmed.trim_end_matches(['.', ',', ';', ':', ')']);
    Some(url.to_string())
}

/// Accepts a reply only when it names a profile URL and reports high confidence.
pub fn parse_match(raw: &str) -> Option<String> {
    let map = response::json_object(raw).ok()?;
    let confidence = map
        .get("confidence")
        .and_then(|c| c.as_str())
        .and_then(Confidence::from_model)?;
    if confidence < Confidence::High {
        return None;
    }
    let url = map.get("profile_url").and_then(|u| u.as_str())?;
    find_profile_url(url)
}

pub struct ModelEnricher {
    model: Arc<dyn TextModel>,
    model_name: String,
}

impl ModelEnricher {
    pub fn new(model: Arc<dyn TextModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
        }
    }
}

#[async_trait]
impl Enricher for ModelEnricher {
    async fn enrich(&self, leaders: &[Leader], firm: Option<&str>) -> Result<Vec<Leader>, StageError> {
        let mut enriched = Vec::with_capacity(leaders.len());
        let mut failures = 0;
        let mut last_error = String::new();

        // One lookup at a time keeps external call volume bounded.
        for leader in leaders {
            let context = search_context(leader, firm);
            let prompt = prompt::build_enrichment_prompt(&context);

            let mut out = leader.clone();
            match self.model.generate(&self.model_name, &prompt).await {
                Ok(raw) => {
                    out.profile_url = parse_match(&raw);
                    match &out.profile_url {
                        Some(url) => info!(leader = %leader.name, url = %url, "profile matched"),
                        None => debug!(leader = %leader.name, "no confident profile match"),
                    }
                }
                Err(e) => {
                    warn!(leader = %leader.name, error = %e, "profile lookup failed");
                    failures += 1;
                    last_error = format!("{e:#}");
                    out.profile_url = None;
                }
            }
            enriched.push(out);
        }

        if failures > 0 && failures == leaders.len() {
            return Err(StageError::Enrichment(last_error));
        }
        Ok(enriched)
    }
}
