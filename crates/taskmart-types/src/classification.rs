//! Structured summary of a free-text request

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Skill used when the classifier cannot name one
pub const SKILL_GENERAL: &str = "general";

/// Longest title derived from a summary
pub const MAX_TITLE_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub summary: String,
    pub estimated_budget: Decimal,
    /// Ranked skills, primary first. Never empty.
    pub skills: Vec<String>,
}

impl Classification {
    pub fn primary_skill(&self) -> &str {
        self.skills
            .first()
            .map(String::as_str)
            .unwrap_or(SKILL_GENERAL)
    }

    /// Job title: first line of the summary, falling back to the raw text
    pub fn title(&self, fallback: &str) -> String {
        let source = self
            .summary
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_else(|| fallback.trim());
        truncate_chars(source, MAX_TITLE_CHARS)
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", s[..idx].trim_end()),
        None => s.to_string(),
    }
}
