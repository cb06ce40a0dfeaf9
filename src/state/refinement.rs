//! Refinement state — pre-loop clarification rounds between the model and a
//! simulated stakeholder, used to resolve ambiguity before planning.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStatus {
    NotStarted,
    Analyzing,
    Researching,
    AwaitingInput,
    Consensus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementRound {
    pub round: u32,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementState {
    pub target: String,
    pub status: RefinementStatus,
    #[serde(default)]
    pub current_round: u32,
    #[serde(default)]
    pub rounds: Vec<RefinementRound>,
    #[serde(default)]
    pub acknowledged_soft_issues: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_reason: Option<String>,
}

impl RefinementState {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            status: RefinementStatus::NotStarted,
            current_round: 0,
            rounds: Vec::new(),
            acknowledged_soft_issues: BTreeSet::new(),
            consensus_reason: None,
        }
    }

    pub fn ask(&mut self, question: impl Into<String>) {
        self.current_round += 1;
        self.status = RefinementStatus::AwaitingInput;
        self.rounds.push(RefinementRound {
            round: self.current_round,
            question: question.into(),
            answer: None,
            timestamp: Utc::now(),
        });
    }

    pub fn answer_latest(&mut self, answer: impl Into<String>) {
        if let Some(round) = self.rounds.last_mut() {
            round.answer = Some(answer.into());
        }
        self.status = RefinementStatus::Analyzing;
    }

    pub fn reach_consensus(&mut self, reason: impl Into<String>) {
        self.status = RefinementStatus::Consensus;
        self.consensus_reason = Some(reason.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_then_answer_advances_round_and_status() {
        let mut r = RefinementState::new("auth flow");
        r.ask("password or SSO only?");
        assert_eq!(r.current_round, 1);
        assert_eq!(r.status, RefinementStatus::AwaitingInput);
        r.answer_latest("SSO only");
        assert_eq!(r.status, RefinementStatus::Analyzing);
        assert_eq!(r.rounds[0].answer.as_deref(), Some("SSO only"));
    }

    #[test]
    fn reach_consensus_records_reason() {
        let mut r = RefinementState::new("auth flow");
        r.reach_consensus("all soft issues acknowledged");
        assert_eq!(r.status, RefinementStatus::Consensus);
        assert!(r.consensus_reason.is_some());
    }
}
