//! Epic — a scoped slice of the overall vision, planned at full or sketch detail.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Full,
    Sketch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpicStatus {
    Pending,
    Active,
    Done,
    Descoped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub title: String,
    pub value_statement: String,
    #[serde(default)]
    pub deliverables: Vec<String>,
    #[serde(default)]
    pub completion_criteria: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub detail_level: DetailLevel,
    pub status: EpicStatus,
    /// A short sketch of the tasks this epic will expand to, populated while
    /// `detail_level == Sketch` and replaced at full detail once the epic
    /// becomes the current one.
    #[serde(default)]
    pub task_sketch: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_notes: Option<String>,
}

impl Epic {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        value_statement: impl Into<String>,
        detail_level: DetailLevel,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            value_statement: value_statement.into(),
            deliverables: Vec::new(),
            completion_criteria: Vec::new(),
            dependencies: Vec::new(),
            detail_level,
            status: EpicStatus::Pending,
            task_sketch: Vec::new(),
            feedback_response: None,
            feedback_notes: None,
        }
    }

    pub fn promote_to_full(&mut self) {
        self.detail_level = DetailLevel::Full;
    }

    pub fn activate(&mut self) {
        self.status = EpicStatus::Active;
    }

    pub fn complete(&mut self) {
        self.status = EpicStatus::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promote_to_full_changes_detail_level() {
        let mut e = Epic::new("E1", "Auth", "let users sign in", DetailLevel::Sketch);
        assert_eq!(e.detail_level, DetailLevel::Sketch);
        e.promote_to_full();
        assert_eq!(e.detail_level, DetailLevel::Full);
    }
}
