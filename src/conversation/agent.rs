//! Agent registry entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::BrainRegion;

/// An agent that flow steps can hand messages to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCapability {
    pub agent_id: String,
    pub agent_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub brain_regions: Vec<BrainRegion>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "active".to_string()
}

impl AgentCapability {
    pub fn new(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            description: String::new(),
            skills: Vec::new(),
            brain_regions: Vec::new(),
            status: default_status(),
        }
    }

    pub fn with_skills(mut self, skills: &[&str]) -> Self {
        self.skills = skills.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_regions(mut self, regions: &[BrainRegion]) -> Self {
        self.brain_regions = regions.to_vec();
        self
    }
}

/// What an agent step produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub agent_name: String,
    pub request: String,
    pub response: String,
    pub status: String,
    #[serde(with = "crate::types::timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl AgentResult {
    pub(crate) fn handled_by(agent: &AgentCapability, request: &str) -> Self {
        Self {
            agent_id: agent.agent_id.clone(),
            agent_name: agent.agent_name.clone(),
            request: request.to_string(),
            response: format!("Agent {} processed: {}", agent.agent_name, request),
            status: "completed".to_string(),
            timestamp: Utc::now(),
        }
    }
}
