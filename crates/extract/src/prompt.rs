use crate::schema::FieldName;
use crate::triage::TriageSignals;

fn format_instruction(field: FieldName) -> &'static str {
    match field {
        FieldName::StrategyDescription => {
            "Return as bullet points, one key point per line, each line starting with '• '."
        }
        FieldName::Leaders => {
            "Return a JSON array of objects with keys 'name', 'title', 'company', \
'previous_roles' (array), 'education' (array) and 'background' (string). \
Include every executive, portfolio manager or founder mentioned."
        }
        FieldName::IncentiveFees => "Format as 'x% Pref | x% incentive fee', e.g. '8% Pref | 20% incentive fee'.",
        FieldName::TargetNetReturns => "Format as a percentage or range, e.g. '10-12%'.",
        _ => "No specific format.",
    }
}

fn field_list() -> String {
    FieldName::ALL
        .iter()
        .map(|f| format!("- \"{}\" ({}): {}", f.as_str(), f.label(), format_instruction(*f)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn key_list() -> String {
    FieldName::ALL
        .iter()
        .map(|f| format!("\"{}\"", f.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn or_placeholder<'a>(value: Option<&'a str>, placeholder: &'a str) -> &'a str {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => placeholder,
    }
}

pub fn build_triage_prompt(signals: &TriageSignals) -> String {
    format!(
        r#"You are classifying inbound documents to decide whether they are investment materials
(pitch decks, fund updates, quarterly or LP reports, capital call or distribution notices).

Subject: {}
Sender: {}
Attachment name: {}
Text excerpt:
{}

Classify as:
- relevant: clearly investment materials
- irrelevant: clearly not investment related (receipts, newsletters, marketing, account notices)
- uncertain: could be investment related, the full document is needed to decide

Return ONLY valid JSON:
{{"relevance": "relevant|irrelevant|uncertain", "rationale": "brief explanation"}}"#,
        or_placeholder(signals.subject.as_deref(), "(no subject)"),
        or_placeholder(signals.sender.as_deref(), "(unknown sender)"),
        signals.filename,
        or_placeholder(Some(signals.excerpt.as_str()), "(no text)"),
    )
}

/// Second pass for an `uncertain` verdict; only relevant or irrelevant are allowed.
pub fn build_full_text_triage_prompt(signals: &TriageSignals, full_text: &str) -> String {
    format!(
        r#"An earlier screen could not decide whether this document is investment material.
Read the full document and decide.

Subject: {}
Attachment name: {}

DOCUMENT:
{}

Answer with relevant or irrelevant only. Return ONLY valid JSON:
{{"relevance": "relevant|irrelevant", "rationale": "brief explanation"}}"#,
        or_placeholder(signals.subject.as_deref(), "(no subject)"),
        signals.filename,
        full_text,
    )
}

/// Attempt 1 is the base prompt; each later attempt tightens the output rules.
pub fn build_extraction_prompt(text: &str, attempt: u32, last_error: Option<&str>) -> String {
    let mut prompt = format!(
        r#"You are analyzing an investment document.

Extract the following fields. A field that is not present or unclear must be null.
Never guess or invent a value.

Fields and formatting instructions:
{}

For every field return an object {{"value": ..., "confidence": "high|medium|low"}} or null.
Return valid JSON only."#,
        field_list()
    );

    if attempt >= 2 {
        prompt.push_str(&format!(
            "\n\nYour previous answer could not be parsed ({}).\nUse exactly these top-level keys: {}.",
            last_error.unwrap_or("invalid JSON"),
            key_list()
        ));
    }
    if attempt >= 3 {
        prompt.push_str(
            "\nOutput the raw JSON object only. The first character must be '{' and the last '}'. \
No markdown, no code fences, no commentary.",
        );
    }

    prompt.push_str("\n\nDOCUMENT:\n");
    prompt.push_str(text);
    prompt
}

pub fn build_enrichment_prompt(context: &str) -> String {
    format!(
        r#"Find the LinkedIn profile URL for this person:

{}

Only answer with a profile you are confident belongs to this exact person.
Return ONLY valid JSON:
{{"profile_url": "https://www.linkedin.com/in/... or null", "confidence": "high|medium|low"}}"#,
        context
    )
}

pub const OCR_PROMPT: &str = "Transcribe all text visible in this page image exactly as written. \
Preserve reading order and line breaks. Output only the transcribed text.";

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> TriageSignals {
        TriageSignals::new("deck.pdf", Some("Fund IV update".into()), None, "Quarterly letter", 1000)
    }

    #[test]
    fn test_triage_prompt_uses_placeholders() {
        let prompt = build_triage_prompt(&signals());
        assert!(prompt.contains("Fund IV update"));
        assert!(prompt.contains("(unknown sender)"));
        assert!(prompt.contains("deck.pdf"));
    }

    #[test]
    fn test_extraction_prompt_gets_stricter() {
        let first = build_extraction_prompt("body", 1, None);
        let second = build_extraction_prompt("body", 2, Some("expected value"));
        let third = build_extraction_prompt("body", 3, Some("expected value"));

        assert!(!first.contains("could not be parsed"));
        assert!(second.contains("expected value"));
        assert!(second.contains("\"management_fees\""));
        assert!(!second.contains("first character"));
        assert!(third.contains("first character must be '{'"));
        assert!(third.ends_with("DOCUMENT:\nbody"));
    }

    #[test]
    fn test_extraction_prompt_lists_format_rules() {
        let prompt = build_extraction_prompt("body", 1, None);
        assert!(prompt.contains("x% Pref | x% incentive fee"));
        assert!(prompt.contains("Leaders/PM/CEO"));
    }
}
