//! Flow definitions
//!
//! A flow is an ordered list of typed steps plus the triggers used to match it
//! against an incoming message.

use serde::{Deserialize, Serialize};

use super::state::FlowType;
use crate::types::{BrainRegion, Metadata};

/// One step of a flow. Each variant carries its own payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FlowStep {
    /// Reply with a template; `{name}` is replaced from flow variables
    Message { template: String },
    /// Look up learned patterns
    MemoryQuery {
        #[serde(default = "default_query")]
        query: String,
        /// Region name or placeholder; the session region when absent
        #[serde(default)]
        brain_region: Option<String>,
        #[serde(default = "default_memory_limit")]
        limit: usize,
    },
    /// Hand the message to a registered agent
    AgentCall { agent_id: String },
    Condition { condition: Condition },
    /// Store the message in a flow variable
    InputCollection {
        #[serde(default = "default_variable")]
        variable: String,
        #[serde(default = "default_prompt")]
        prompt: String,
    },
}

fn default_query() -> String {
    "{user_message}".to_string()
}

fn default_memory_limit() -> usize {
    3
}

fn default_variable() -> String {
    "user_input".to_string()
}

fn default_prompt() -> String {
    "Please provide input:".to_string()
}

impl FlowStep {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowStep::Message { .. } => "message",
            FlowStep::MemoryQuery { .. } => "memory_query",
            FlowStep::AgentCall { .. } => "agent_call",
            FlowStep::Condition { .. } => "condition",
            FlowStep::InputCollection { .. } => "input_collection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Condition {
    Always,
    Never,
    /// The last memory lookup found something
    HasMemory,
    /// Case-insensitive substring of the current message
    MessageContains(String),
    VariableSet(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationFlow {
    pub flow_id: String,
    pub flow_name: String,
    pub flow_type: FlowType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trigger_patterns: Vec<String>,
    #[serde(default)]
    pub brain_regions: Vec<BrainRegion>,
    pub steps: Vec<FlowStep>,
    #[serde(default)]
    pub required_context: Vec<String>,
    /// Expected duration in seconds
    #[serde(default)]
    pub expected_duration: u64,
    #[serde(default)]
    pub fallback_actions: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ConversationFlow {
    /// Match score: 1.0 per trigger found in the message, 0.5 when the region is
    /// compatible, 0.3 when every required variable is present.
    pub fn score(&self, message: &str, brain_region: BrainRegion, variables: &Metadata) -> f64 {
        let message_lower = message.to_lowercase();
        let mut score = self
            .trigger_patterns
            .iter()
            .filter(|t| message_lower.contains(&t.to_lowercase()))
            .count() as f64;

        if self.brain_regions.contains(&brain_region) {
            score += 0.5;
        }
        if self.required_context.iter().all(|key| variables.contains_key(key)) {
            score += 0.3;
        }
        score
    }
}

/// Built-in flows registered at startup
pub fn default_flows() -> Vec<ConversationFlow> {
    vec![
        ConversationFlow {
            flow_id: "memory_interaction".into(),
            flow_name: "Memory Interaction".into(),
            flow_type: FlowType::MemoryInteraction,
            description: "Handle memory-related queries and operations".into(),
            trigger_patterns: ["remember", "memory", "recall", "forget", "brain"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            brain_regions: vec![BrainRegion::TemporalLobe, BrainRegion::FrontalLobe],
            steps: vec![
                FlowStep::MemoryQuery {
                    query: "{user_message}".into(),
                    brain_region: Some("{brain_region}".into()),
                    limit: default_memory_limit(),
                },
                FlowStep::Message {
                    template: "I found some relevant memories. How would you like to proceed?".into(),
                },
            ],
            required_context: Vec::new(),
            expected_duration: 30,
            fallback_actions: vec!["default_response".into()],
            metadata: Metadata::new(),
        },
        ConversationFlow {
            flow_id: "simple_qa".into(),
            flow_name: "Simple Q&A".into(),
            flow_type: FlowType::SimpleQa,
            description: "Handle simple question and answer interactions".into(),
            trigger_patterns: ["what", "how", "why", "when", "where"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            brain_regions: vec![BrainRegion::FrontalLobe, BrainRegion::TemporalLobe],
            steps: vec![FlowStep::Message {
                template: "Let me help you with that question.".into(),
            }],
            required_context: Vec::new(),
            expected_duration: 15,
            fallback_actions: vec!["default_response".into()],
            metadata: Metadata::new(),
        },
    ]
}
