//! Sprint context — the world model established by the Pre-Loop Driver.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SprintContext {
    pub deliverable_type: String,
    pub project_type: String,
    #[serde(default)]
    pub codebase_state: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub services: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_strategy: Option<String>,
    #[serde(default)]
    pub value_proofs: Vec<String>,
    #[serde(default)]
    pub unresolved_questions: Vec<String>,
}

impl SprintContext {
    pub fn new(deliverable_type: impl Into<String>, project_type: impl Into<String>) -> Self {
        Self {
            deliverable_type: deliverable_type.into(),
            project_type: project_type.into(),
            codebase_state: String::new(),
            environment: HashMap::new(),
            services: HashMap::new(),
            verification_strategy: None,
            value_proofs: Vec::new(),
            unresolved_questions: Vec::new(),
        }
    }

    /// Best-effort heuristic for whether a browser-automation tool should be
    /// made available: presence of `package.json` plus a web-like deliverable
    /// type. Not authoritative — documented in DESIGN.md as best-effort.
    pub fn likely_needs_browser_tool(&self, has_package_json: bool) -> bool {
        has_package_json
            && matches!(
                self.deliverable_type.to_lowercase().as_str(),
                "web_app" | "website" | "frontend" | "webapp"
            )
    }
}
