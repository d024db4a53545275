use crate::error::StageError;
use crate::llm::TextModel;
use crate::prompt;
use crate::response::{self, non_empty_string};
use crate::schema::{Confidence, Extracted, ExtractedFields, FieldName, Leader};
use crate::triage::truncate_graphemes;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Output of one successful extraction stage call.
#[derive(Debug, Clone)]
pub struct FieldExtraction {
    pub fields: ExtractedFields,
    pub attempts: u32,
    pub model: String,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<FieldExtraction, StageError>;
}

pub struct ModelExtractor {
    model: Arc<dyn TextModel>,
    model_name: String,
    max_attempts: u32,
    full_text_chars: usize,
}

impl ModelExtractor {
    pub fn new(
        model: Arc<dyn TextModel>,
        model_name: impl Into<String>,
        max_attempts: u32,
        full_text_chars: usize,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            max_attempts: max_attempts.max(1),
            full_text_chars,
        }
    }
}

#[async_trait]
impl Extractor for ModelExtractor {
    async fn extract(&self, text: &str) -> Result<FieldExtraction, StageError> {
        let text = truncate_graphemes(text, self.full_text_chars);
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            let prompt = prompt::build_extraction_prompt(&text, attempt, last_error.as_deref());
            let raw = self
                .model
                .generate(&self.model_name, &prompt)
                .await
                .map_err(|e| StageError::from_transport(&e))?;

            match parse_extraction(&raw) {
                Ok(fields) => {
                    info!(attempt, found = fields.found_count(), "extraction parsed");
                    return Ok(FieldExtraction {
                        fields,
                        attempts: attempt,
                        model: self.model_name.clone(),
                    });
                }
                Err(e) => {
                    warn!(attempt, max_attempts = self.max_attempts, error = %e, "extraction output unparsable");
                    last_error = Some(e);
                }
            }
        }

        Err(StageError::ExtractionFormat {
            attempts: self.max_attempts,
            last_error: last_error.unwrap_or_default(),
        })
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, field: FieldName) -> Option<&'a Value> {
    map.iter()
        .find(|(key, _)| key.parse::<FieldName>().ok() == Some(field))
        .map(|(_, v)| v)
}

/// Splits `{"value": .., "confidence": ..}` envelopes; a bare value gets medium confidence.
fn unwrap_envelope(value: &Value) -> (&Value, Confidence) {
    if let Value::Object(obj) = value {
        if let Some(inner) = obj.get("value") {
            let confidence = obj
                .get("confidence")
                .and_then(|c| c.as_str())
                .and_then(Confidence::from_model)
                .unwrap_or(Confidence::Medium);
            return (inner, confidence);
        }
    }
    (value, Confidence::Medium)
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let lines: Vec<String> = items.iter().filter_map(non_empty_string).collect();
            (!lines.is_empty()).then(|| lines.join("\n"))
        }
        other => non_empty_string(other),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(non_empty_string).collect(),
        Some(other) => non_empty_string(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn leader_from(value: &Value) -> Option<Leader> {
    match value {
        Value::Object(obj) => {
            let name = obj.get("name").and_then(non_empty_string)?;
            Some(Leader {
                title: obj.get("title").and_then(non_empty_string),
                company: obj.get("company").and_then(non_empty_string),
                previous_roles: string_list(obj.get("previous_roles")),
                education: string_list(obj.get("education")),
                background: obj.get("background").and_then(non_empty_string),
                ..Leader::named(name)
            })
        }
        other => non_empty_string(other).map(Leader::named),
    }
}

fn leaders_value(value: &Value) -> Option<Vec<Leader>> {
    let leaders: Vec<Leader> = match value {
        Value::Array(items) => items.iter().filter_map(leader_from).collect(),
        Value::String(s) => s
            .split('|')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(Leader::named)
            .collect(),
        _ => Vec::new(),
    };
    (!leaders.is_empty()).then_some(leaders)
}

/// Maps a raw model reply onto typed fields. Fails when the reply is not a JSON
/// object or carries none of the expected keys.
pub fn parse_extraction(raw: &str) -> Result<ExtractedFields, String> {
    let map = response::json_object(raw)?;
    let mut fields = ExtractedFields::default();
    let mut known = 0;

    for field in FieldName::ALL {
        let Some(value) = lookup(&map, field) else {
            continue;
        };
        known += 1;
        let (inner, confidence) = unwrap_envelope(value);

        if field == FieldName::Leaders {
            fields.leaders = leaders_value(inner).map(|l| Extracted::new(l, confidence));
        } else {
            fields.set_text(field, text_value(inner).map(|v| Extracted::new(v, confidence)));
        }
    }

    if known == 0 {
        return Err("response contains none of the expected field keys".to_string());
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModel;

    const GOOD: &str = r#"{
        "investment_name": {"value": "Sequoia Capital Fund XVI", "confidence": "high"},
        "firm": {"value": "Sequoia Capital", "confidence": "high"},
        "strategy_description": {"value": ["• Early stage", "• Enterprise software"], "confidence": "medium"},
        "leaders": {"value": [{"name": "Roelof Botha", "title": "Managing Partner", "education": ["MBA Stanford"]}], "confidence": "high"},
        "management_fees": {"value": "2%", "confidence": "high"},
        "incentive_fees": null,
        "liquidity_lock": {"value": null, "confidence": "low"},
        "target_net_returns": {"value": "", "confidence": "low"}
    }"#;

    #[test]
    fn test_parse_enveloped_values() {
        let fields = parse_extraction(GOOD).unwrap();
        assert_eq!(fields.investment_name(), Some("Sequoia Capital Fund XVI"));
        assert_eq!(fields.management_fees.as_ref().unwrap().confidence, Confidence::High);
        assert_eq!(
            fields.strategy_description.as_ref().unwrap().value,
            "• Early stage\n• Enterprise software"
        );
        let leaders = &fields.leaders.as_ref().unwrap().value;
        assert_eq!(leaders[0].name, "Roelof Botha");
        assert_eq!(leaders[0].education, vec!["MBA Stanford".to_string()]);
        assert!(leaders[0].profile_url.is_none());
        assert!(fields.incentive_fees.is_none());
        assert!(fields.liquidity_lock.is_none());
        assert!(fields.target_net_returns.is_none());
    }

    #[test]
    fn test_parse_display_keys_and_bare_values() {
        let raw = r#"{"Firm": "Acme Capital", "Leaders/PM/CEO": "Jane Doe | John Roe", "Target Net Returns": 12}"#;
        let fields = parse_extraction(raw).unwrap();
        assert_eq!(fields.firm.as_ref().unwrap().confidence, Confidence::Medium);
        assert_eq!(fields.target_net_returns.as_ref().unwrap().value, "12");
        let names: Vec<_> = fields.leaders.unwrap().value.into_iter().map(|l| l.name).collect();
        assert_eq!(names, vec!["Jane Doe", "John Roe"]);
    }

    #[test]
    fn test_parse_rejects_unknown_shape() {
        assert!(parse_extraction(r#"{"answer": 42}"#).is_err());
        assert!(parse_extraction("[1, 2]").is_err());
    }

    #[test]
    fn test_all_null_is_valid_not_found() {
        let fields = parse_extraction(r#"{"firm": null, "investment_name": null}"#).unwrap();
        assert_eq!(fields.found_count(), 0);
    }

    #[tokio::test]
    async fn test_extract_retries_with_stricter_prompt() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("Here is the data: firm is Acme".into()),
            Ok(r#"{"firm": {"value": "Acme", "confidence": "low"}}"#.into()),
        ]));
        let extractor = ModelExtractor::new(model.clone(), "m", 3, 10_000);

        let result = extractor.extract("doc").await.unwrap();
        assert_eq!(result.attempts, 2);
        assert_eq!(result.fields.firm_name(), Some("Acme"));
        assert!(model.prompts()[1].contains("could not be parsed"));
    }

    #[tokio::test]
    async fn test_extract_exhaustion_is_format_error() {
        let model = Arc::new(ScriptedModel::new(vec![
            Ok("nope".into()),
            Ok("{bad".into()),
            Ok("still nope".into()),
        ]));
        let extractor = ModelExtractor::new(model.clone(), "m", 3, 10_000);

        match extractor.extract("doc").await {
            Err(StageError::ExtractionFormat { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(model.calls(), 3);
    }
}
