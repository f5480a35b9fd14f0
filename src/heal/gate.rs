// Human confirmation of proposed fixes

use std::fmt::Write as _;
use std::io::ErrorKind;

use anyhow::Result;
use console::{style, Term};
use dialoguer::Confirm;

use crate::agent::FileEdit;
use crate::heal::classify::ErrorCategory;

/// Lines of each edit shown before the elision note
pub const PREVIEW_LINES: usize = 20;

/// What the user is asked to approve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub error: String,
    pub category: ErrorCategory,
    pub proposal: String,
    pub preview: String,
}

/// Yes/no gate in front of every filesystem mutation
pub trait ConfirmGate: Send + Sync {
    /// `Ok(false)` for an explicit or implicit rejection
    fn confirm(&self, review: &Review) -> Result<bool>;
}

/// Prompts on the controlling terminal; Escape, `q` and Ctrl-C reject
pub struct TerminalGate {
    term: Term,
}

impl TerminalGate {
    pub fn new() -> Self {
        Self { term: Term::stderr() }
    }
}

impl Default for TerminalGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmGate for TerminalGate {
    fn confirm(&self, review: &Review) -> Result<bool> {
        self.term.write_line(&render_review(review))?;

        let answer = Confirm::new()
            .with_prompt("Apply this fix?")
            .default(false)
            .interact_on_opt(&self.term);

        match answer {
            Ok(choice) => Ok(choice.unwrap_or(false)),
            Err(dialoguer::Error::IO(e)) if e.kind() == ErrorKind::Interrupted => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

pub fn render_review(review: &Review) -> String {
    let mut doc = String::new();
    let _ = writeln!(doc, "{}", style("Error detected").red().bold());
    let _ = writeln!(doc, "{}", review.error.trim_end());
    let _ = writeln!(doc, "{}\n", style(format!("(classified as: {})", review.category)).dim());
    let _ = writeln!(doc, "{}", style("AI proposal:").cyan().bold());
    let _ = writeln!(doc, "{}\n", review.proposal.trim_end());
    if !review.preview.is_empty() {
        let _ = writeln!(doc, "{}", review.preview.trim_end());
    }
    doc
}

/// First lines of each edit, `+ `-prefixed
pub fn render_edit_preview(edits: &[FileEdit]) -> String {
    let mut preview = String::new();
    for edit in edits {
        let _ = writeln!(preview, "--- {} ---", edit.path);

        let lines: Vec<&str> = edit.content.split('\n').collect();
        for line in lines.iter().take(PREVIEW_LINES) {
            let _ = writeln!(preview, "+ {}", line);
        }
        if lines.len() > PREVIEW_LINES {
            let _ = writeln!(preview, "... ({} more lines)", lines.len() - PREVIEW_LINES);
        }
        preview.push('\n');
    }
    preview
}
