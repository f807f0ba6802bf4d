//! Registered capability providers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::WorkerId;

/// A worker agent that can be assigned jobs.
///
/// Read-only from the orchestration core; profile flows maintain it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    /// Ordered skill list, primary skill first
    pub skills: Vec<String>,
    pub available: bool,
    /// Quality rating, higher is better
    pub rating: f64,
    pub completed_jobs: i64,
    pub created_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(name: impl Into<String>, skills: Vec<String>) -> Self {
        Self {
            id: WorkerId::new(),
            name: name.into(),
            skills: skills.into_iter().map(|s| normalize_skill(&s)).collect(),
            available: true,
            rating: 0.0,
            completed_jobs: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = rating;
        self
    }

    pub fn with_availability(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn primary_skill(&self) -> Option<&str> {
        self.skills.first().map(String::as_str)
    }

    pub fn has_skill(&self, skill: &str) -> bool {
        let skill = normalize_skill(skill);
        self.skills.iter().any(|s| *s == skill)
    }
}

/// Canonical form used when storing and comparing skills
pub fn normalize_skill(skill: &str) -> String {
    skill.trim().to_lowercase()
}
