//! Vision Reality Check (VRC) — periodic value-delivery assessment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VrcRecommendation {
    Continue,
    CourseCorrect,
    Descope,
    ShipReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VrcDepth {
    Quick,
    Full,
}

/// One entry in the append-only VRC history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VrcSnapshot {
    pub iteration: u32,
    pub depth: VrcDepth,
    /// Clamped to [0, 1].
    pub value_score: f64,
    pub deliverables_total: u32,
    pub deliverables_verified: u32,
    pub deliverables_blocked: u32,
    #[serde(default)]
    pub gaps: Vec<String>,
    pub recommendation: VrcRecommendation,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    /// True if synthesized by the fallback path rather than reported by the
    /// model — per the spec's flagged ambiguity, a fallback snapshot's
    /// `recommendation` is always `Continue` and must not be trusted for
    /// exit decisions.
    #[serde(default)]
    pub is_fallback: bool,
}

impl VrcSnapshot {
    pub fn new(iteration: u32, depth: VrcDepth, value_score: f64) -> Self {
        Self {
            iteration,
            depth,
            value_score: value_score.clamp(0.0, 1.0),
            deliverables_total: 0,
            deliverables_verified: 0,
            deliverables_blocked: 0,
            gaps: Vec::new(),
            recommendation: VrcRecommendation::Continue,
            summary: String::new(),
            timestamp: Utc::now(),
            is_fallback: false,
        }
    }

    /// Build the fallback snapshot the Value Loop Driver synthesizes when the
    /// model doesn't call `report_vrc` during a heartbeat (§4.11, §9 open
    /// question). Always recommends CONTINUE; never consulted by the
    /// Decision Engine's exit conditions.
    pub fn fallback(iteration: u32, done: u32, total: u32, blocked: u32) -> Self {
        let value_score = if total == 0 {
            0.0
        } else {
            done as f64 / total as f64
        };
        Self {
            iteration,
            depth: VrcDepth::Quick,
            value_score,
            deliverables_total: total,
            deliverables_verified: done,
            deliverables_blocked: blocked,
            gaps: Vec::new(),
            recommendation: VrcRecommendation::Continue,
            summary: format!("fallback snapshot: {done}/{total} tasks done"),
            timestamp: Utc::now(),
            is_fallback: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_snapshot_always_recommends_continue() {
        let s = VrcSnapshot::fallback(5, 2, 4, 0);
        assert_eq!(s.recommendation, VrcRecommendation::Continue);
        assert!(s.is_fallback);
        assert_eq!(s.value_score, 0.5);
    }

    #[test]
    fn value_score_is_clamped() {
        let s = VrcSnapshot::new(1, VrcDepth::Quick, 1.5);
        assert_eq!(s.value_score, 1.0);
        let s = VrcSnapshot::new(1, VrcDepth::Quick, -0.2);
        assert_eq!(s.value_score, 0.0);
    }
}
