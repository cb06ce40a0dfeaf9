//! Coherence reports — periodic cross-check of delivered work against the vision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoherenceVerdict {
    Aligned,
    Drifting,
    Misaligned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceReport {
    pub iteration: u32,
    pub verdict: CoherenceVerdict,
    pub summary: String,
    #[serde(default)]
    pub drift_points: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl CoherenceReport {
    pub fn new(iteration: u32, verdict: CoherenceVerdict, summary: impl Into<String>) -> Self {
        Self {
            iteration,
            verdict,
            summary: summary.into(),
            drift_points: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}
