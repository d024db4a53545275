use crate::attribution::{FieldHistory, SourceType};
use crate::investment::Investment;
use extract::{FieldName, Leader};
use std::fmt::Write;
use std::path::{Path, PathBuf};

const MAX_FILENAME: usize = 100;

fn sanitize(raw: &str) -> String {
    let mut safe = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => safe.push('_'),
            c if c.is_whitespace() => safe.push('_'),
            c => safe.push(c),
        }
    }
    let safe = safe.trim_matches('_');
    // "." and ".." would escape the packets directory.
    if safe.chars().all(|c| c == '.') {
        return String::new();
    }
    safe.chars().take(MAX_FILENAME).collect()
}

/// Filesystem-safe packet name derived from the investment name.
pub fn packet_filename(investment: &Investment) -> String {
    let safe = investment.name().map(sanitize).unwrap_or_default();
    if safe.is_empty() {
        format!("{}.md", investment.id)
    } else {
        format!("{safe}.md")
    }
}

/// Packets of one tenant live in their own directory.
pub fn packet_path(dir: &Path, investment: &Investment) -> PathBuf {
    let tenant = match sanitize(&investment.tenant) {
        t if t.is_empty() => "_".to_string(),
        t => t,
    };
    dir.join("packets").join(tenant).join(packet_filename(investment))
}

fn leader_line(leader: &Leader) -> String {
    let mut line = format!("- {}", leader.name);
    if let Some(title) = &leader.title {
        let _ = write!(line, ", {title}");
    }
    if let Some(url) = &leader.profile_url {
        let _ = write!(line, " ([profile]({url}))");
    }
    line
}

fn history_section<T>(out: &mut String, label: &str, history: &FieldHistory<T>, render: impl Fn(&T) -> String) {
    if history.is_empty() {
        return;
    }
    let current = history.current_index();
    let _ = writeln!(out, "### {label}\n");
    for (index, entry) in history.history().iter().enumerate().rev() {
        let marker = if current == Some(index) { " **(current)**" } else { "" };
        let source = match entry.source_type {
            SourceType::Manual => format!("manual edit by {}", entry.source_name),
            SourceType::Automatic => format!("from {}", entry.source_name),
        };
        let _ = writeln!(out, "- `{}`{marker}", render(&entry.value));
        let _ = writeln!(out, "  - Source: {source} ({} confidence)", entry.confidence);
        let _ = writeln!(out, "  - Recorded: {}", entry.extracted_at.format("%Y-%m-%d %H:%M"));
    }
    out.push('\n');
}

/// Human-readable markdown record of an investment, including full field history.
pub fn render_packet(investment: &Investment) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", investment.name().unwrap_or("Unnamed Investment"));
    if let Some(firm) = investment.firm() {
        let _ = writeln!(out, "**Firm:** {firm}\n");
    }

    let _ = writeln!(out, "---\n\n## Metadata\n");
    let _ = writeln!(out, "- **Investment ID:** `{}`", investment.id);
    let _ = writeln!(out, "- **Created:** {}", investment.created_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "- **Last Updated:** {}", investment.updated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(out, "- **Source Documents:** {}", investment.source_count());
    if investment.archived {
        let _ = writeln!(out, "- **Archived:** yes");
    }

    let _ = writeln!(out, "\n---\n\n## Key Metrics\n");
    for field in [
        FieldName::ManagementFees,
        FieldName::IncentiveFees,
        FieldName::LiquidityLock,
        FieldName::TargetNetReturns,
    ] {
        if let Some(value) = investment.text_value(field) {
            let _ = writeln!(out, "- **{}:** {value}", field.label());
        }
    }

    let leaders = investment.leaders();
    if !leaders.is_empty() {
        let _ = writeln!(out, "\n---\n\n## Leadership\n");
        for leader in leaders {
            let _ = writeln!(out, "{}", leader_line(leader));
        }
    }

    if let Some(strategy) = investment.text_value(FieldName::StrategyDescription) {
        let _ = writeln!(out, "\n---\n\n## Strategy Description\n\n{strategy}");
    }

    if !investment.documents.is_empty() {
        let _ = writeln!(out, "\n---\n\n## Source Documents\n");
        for doc in &investment.documents {
            let _ = writeln!(out, "- **{}** (linked {})", doc.filename, doc.linked_at.format("%Y-%m-%d"));
        }
    }

    let _ = writeln!(out, "\n---\n\n## Field Value History\n");
    for field in FieldName::ALL {
        match field {
            FieldName::Leaders => history_section(&mut out, field.label(), &investment.fields.leaders, |leaders| {
                leaders.iter().map(|l| l.name.as_str()).collect::<Vec<_>>().join(", ")
            }),
            other => {
                if let Some(history) = investment.fields.text(other) {
                    history_section(&mut out, other.label(), history, |v| v.replace('\n', " "));
                }
            }
        }
    }
    out
}

/// Writes the packet under `<dir>/packets/<tenant>/` and returns its path.
pub async fn write_packet(dir: &Path, investment: &Investment) -> std::io::Result<PathBuf> {
    let path = packet_path(dir, investment);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, render_packet(investment)).await?;
    Ok(path)
}
