//! Terminal rendering of answers, documents, limits and upload results

use std::io::{self, Write};

use colored::*;

use querious_client::UploadReport;
use querious_core::{
    Document, DocumentStatus, LimitReached, PlanLimits, Remaining, SessionInfo, Stage,
    StreamingState, UploadLimits, User,
};

/// How to bring the terminal up to date with a new answer text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    /// Nothing new
    None,
    /// Print this suffix after what is already shown
    Append(String),
    /// The text diverged from what was shown; print it again in full
    Replace(String),
}

/// Compare what is on screen with the latest answer text
pub fn content_delta(shown: &str, content: &str) -> Delta {
    if content == shown {
        Delta::None
    } else if let Some(rest) = content.strip_prefix(shown) {
        Delta::Append(rest.to_string())
    } else {
        Delta::Replace(content.to_string())
    }
}

/// Prints a streamed answer as it arrives
#[derive(Debug, Default)]
pub struct StreamPrinter {
    shown: String,
    stage: Stage,
    status: Option<String>,
}

impl StreamPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, state: &StreamingState) {
        if state.stage != self.stage || state.status_message != self.status {
            self.announce(state);
            self.stage = state.stage;
            self.status = state.status_message.clone();
        }

        match content_delta(&self.shown, &state.content) {
            Delta::None => {}
            Delta::Append(rest) => {
                print!("{}", rest);
                self.shown.push_str(&rest);
            }
            Delta::Replace(full) => {
                println!();
                print!("{}", full);
                self.shown = full;
            }
        }
        let _ = io::stdout().flush();

        if state.stage.is_terminal() {
            self.conclude(state);
        }
    }

    fn announce(&self, state: &StreamingState) {
        if !self.shown.is_empty() {
            return;
        }
        let label = match (&state.status_message, state.stage) {
            (Some(message), Stage::Searching | Stage::Generating) => message.clone(),
            (None, Stage::Searching) => "Searching documents...".to_string(),
            (None, Stage::Generating) => "Generating answer...".to_string(),
            _ => return,
        };
        println!("{} {}", "…".dimmed(), label.dimmed());
    }

    fn conclude(&self, state: &StreamingState) {
        match state.stage {
            Stage::Done => {
                println!();
                if let Some(line) = sources_line(&state.sources, &state.scores) {
                    println!("{}", line.dimmed());
                }
                if let Some(tokens) = state.tokens_used {
                    println!("{}", format!("{} tokens", tokens).dimmed());
                }
            }
            Stage::Error => {
                if !self.shown.is_empty() {
                    println!();
                }
                match &state.limit_reached {
                    Some(limit) => println!("{} {}", "⛔".yellow(), limit_message(limit).yellow()),
                    None => println!(
                        "{} {}",
                        "❌".red(),
                        state.error.as_deref().unwrap_or("Unknown error").red()
                    ),
                }
            }
            _ => {}
        }
    }
}

/// "Sources: a.pdf (91%), b.pdf (40%)"
pub fn sources_line(sources: &[String], scores: &[f64]) -> Option<String> {
    if sources.is_empty() {
        return None;
    }
    let parts: Vec<String> = sources
        .iter()
        .enumerate()
        .map(|(i, source)| match scores.get(i) {
            Some(score) => format!("{} ({:.0}%)", source, score * 100.0),
            None => source.clone(),
        })
        .collect();
    Some(format!("Sources: {}", parts.join(", ")))
}

/// User-facing wording for a plan-limit refusal
pub fn limit_message(limit: &LimitReached) -> String {
    match (limit.resource.as_str(), limit.limit) {
        ("tokens", Some(max)) => format!(
            "You've used all {} tokens included in your plan. Upgrade to keep asking questions.",
            max
        ),
        ("documents", Some(max)) => format!(
            "Document limit reached ({} of {}). Delete documents or upgrade your plan.",
            limit.used.unwrap_or(max),
            max
        ),
        (resource, Some(max)) => format!(
            "You've reached the {} limit of your plan ({}). Upgrade to create more.",
            resource, max
        ),
        _ => format!("{}. Upgrade your plan to continue.", limit),
    }
}

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// One line of the document listing
pub fn document_line(doc: &Document) -> String {
    let status = match doc.status {
        DocumentStatus::Ready => "ready",
        DocumentStatus::Pending => "processing",
        DocumentStatus::Deleting => "deleting",
    };
    format!(
        "{}  {}  {}  [{}]",
        doc.id,
        doc.filename,
        format_size(doc.size_bytes),
        status
    )
}

pub fn session_line(session: &SessionInfo) -> String {
    let since = session
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let device = session.device_info.as_deref().unwrap_or("unknown device");
    let current = if session.is_current { "  (this session)" } else { "" };
    format!("{}  {}  since {}{}", session.id, device, since, current)
}

/// Scope and account usage, one fact per line
pub fn limits_lines(limits: &UploadLimits, user: &User) -> Vec<String> {
    let plan = PlanLimits::for_plan(user.plan);
    let global = match plan.documents {
        Some(max) => format!("{} of {}", user.active_documents_count, max),
        None => format!("{} (unlimited)", user.active_documents_count),
    };
    let remaining = limits.scope_remaining().min(user.documents_remaining());

    vec![
        format!("Plan: {}", user.plan),
        format!(
            "Documents here: {} of {}",
            limits.current_count.max(0),
            limits.max_files
        ),
        format!(
            "Storage here: {} of {}",
            format_size(limits.current_size.max(0) as u64),
            format_size(limits.max_total_size.max(0) as u64)
        ),
        format!("Documents on account: {}", global),
        format!("Can still upload: {}", remaining_label(remaining)),
        format!(
            "Tokens: {} of {}",
            user.tokens_used,
            if user.token_limit > 0 { user.token_limit } else { plan.token_limit }
        ),
    ]
}

/// Summary of an upload batch, one outcome per line
pub fn upload_lines(report: &UploadReport) -> Vec<String> {
    let mut lines = Vec::new();

    for uploaded in &report.uploaded {
        let how = if uploaded.status == "linked" {
            "linked existing copy"
        } else {
            "uploaded"
        };
        lines.push(format!("✓ {} ({})", uploaded.document.filename, how));
    }
    for (filename, reason) in &report.rejected {
        lines.push(format!("✗ {}: {}", filename, reason));
    }
    for failure in &report.failed {
        let reason = match &failure.limit_reached {
            Some(limit) => limit_message(limit),
            None => failure.error.clone(),
        };
        lines.push(format!("✗ {}: {}", failure.filename, reason));
    }
    if !report.blocked.is_empty() {
        let verb = if report.limit_reached {
            "Document limit reached"
        } else {
            "Over the document limit"
        };
        lines.push(format!(
            "{}; not uploaded: {}",
            verb,
            report.blocked.join(", ")
        ));
    }

    lines
}

/// Print an upload summary with colour
pub fn print_upload_report(report: &UploadReport) {
    for line in upload_lines(report) {
        if line.starts_with('✓') {
            println!("{}", line.green());
        } else if line.starts_with('✗') {
            println!("{}", line.red());
        } else {
            println!("{}", line.yellow());
        }
    }
}

/// Render a remaining count for prompts like "2 more files"
pub fn remaining_label(remaining: Remaining) -> String {
    match remaining {
        Remaining::Unlimited => "unlimited".to_string(),
        Remaining::Limited(1) => "1 more file".to_string(),
        Remaining::Limited(n) => format!("{} more files", n),
    }
}
