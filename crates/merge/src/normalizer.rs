use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use uuid::Uuid;

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-/_&+]").unwrap());
static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static ROMAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[ivxlc]+$").unwrap());

const CORPORATE_SUFFIXES: &[&str] = &["llc", "lp", "inc", "ltd", "llp", "co"];

/// Lowercase, strip punctuation and corporate suffixes, collapse spaces.
pub fn normalize(name: &str) -> String {
    let lowered = name.to_lowercase();
    let spaced = SEPARATORS.replace_all(&lowered, " ");
    let stripped = PUNCTUATION.replace_all(&spaced, "");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ");

    collapsed
        .split(' ')
        .filter(|word| !CORPORATE_SUFFIXES.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fund designators in a normalised name: roman numerals and bare numbers ("xvi", "3").
fn designators(normalized: &str) -> Vec<&str> {
    normalized
        .split(' ')
        .filter(|w| {
            (!w.is_empty() && w.chars().all(|c| c.is_ascii_digit())) || (w.len() <= 6 && ROMAN.is_match(w))
        })
        .collect()
}

/// Per-word Jaro-Winkler score at which two words count as the same word.
const WORD_MATCH: f64 = 0.85;

/// Similarity of two normalised strings in [0, 1], compared word by word.
///
/// Words pair off one-to-one, exact matches first and then the closest
/// remaining spelling at or above [`WORD_MATCH`]. The score is the Dice
/// coefficient over the paired words, so "fund" against "opportunity fund"
/// shares one word of three rather than counting as a match. Differing fund
/// designators count as no match at all.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (da, db) = (designators(a), designators(b));
    if !da.is_empty() && !db.is_empty() && da != db {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let left: Vec<&str> = a.split(' ').collect();
    let mut right: Vec<Option<&str>> = b.split(' ').map(Some).collect();
    let mut unmatched = Vec::new();
    let mut matched = 0.0;

    for word in &left {
        match right.iter_mut().find(|w| **w == Some(*word)) {
            Some(slot) => {
                *slot = None;
                matched += 1.0;
            }
            None => unmatched.push(*word),
        }
    }

    for word in unmatched {
        let mut best: Option<(f64, usize)> = None;
        for (index, slot) in right.iter().enumerate() {
            let Some(other) = slot else { continue };
            let score = strsim::jaro_winkler(word, other);
            if score >= WORD_MATCH && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, index));
            }
        }
        if let Some((score, index)) = best {
            right[index] = None;
            matched += score;
        }
    }

    2.0 * matched / (left.len() + right.len()) as f64
}

/// What identity resolution knows about an existing investment.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub tenant: String,
    pub firm: Option<String>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Decides which existing investment, if any, an extraction describes.
#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    threshold: f64,
    firm_weight: f64,
}

impl Default for IdentityMatcher {
    fn default() -> Self {
        Self::new(0.88, 0.4)
    }
}

impl IdentityMatcher {
    pub fn new(threshold: f64, firm_weight: f64) -> Self {
        Self {
            threshold,
            firm_weight: firm_weight.clamp(0.0, 1.0),
        }
    }

    /// Weighted firm/name score when both sides have both, otherwise the one
    /// component both sides share. `None` when nothing is comparable.
    pub fn score(
        &self,
        firm: Option<&str>,
        name: Option<&str>,
        other_firm: Option<&str>,
        other_name: Option<&str>,
    ) -> Option<f64> {
        let norm = |s: Option<&str>| s.map(normalize).filter(|n| !n.is_empty());
        let firms = norm(firm).zip(norm(other_firm));
        let names = norm(name).zip(norm(other_name));

        match (firms, names) {
            (Some((f1, f2)), Some((n1, n2))) => {
                let name_score = similarity(&n1, &n2);
                // Same firm, different fund: keep them apart.
                if name_score == 0.0 {
                    return Some(0.0);
                }
                Some(self.firm_weight * similarity(&f1, &f2) + (1.0 - self.firm_weight) * name_score)
            }
            (Some((f1, f2)), None) => Some(similarity(&f1, &f2)),
            (None, Some((n1, n2))) => Some(similarity(&n1, &n2)),
            (None, None) => None,
        }
    }

    /// Best-scoring candidate at or above the threshold; ties go to the oldest.
    pub fn resolve<'a>(
        &self,
        firm: Option<&str>,
        name: Option<&str>,
        candidates: impl IntoIterator<Item = &'a Identity>,
    ) -> Option<Uuid> {
        if firm.is_none() && name.is_none() {
            return None;
        }

        let mut best: Option<(f64, &Identity)> = None;
        for candidate in candidates {
            let Some(score) = self.score(firm, name, candidate.firm.as_deref(), candidate.name.as_deref())
            else {
                continue;
            };
            if score < self.threshold {
                continue;
            }
            best = match best {
                Some((s, b)) if s > score || (s == score && b.created_at <= candidate.created_at) => Some((s, b)),
                _ => Some((score, candidate)),
            };
        }
        best.map(|(_, identity)| identity.id)
    }
}
