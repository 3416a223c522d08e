//! Conversation states and flow types

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::MemoryError;

/// Session state machine
///
/// `idle -> listening -> processing -> {flow_execution | waiting_for_input} -> completed`,
/// with `error` reachable from any state. `agent_handoff` and `memory_retrieval`
/// are only held while a single step runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    Listening,
    Processing,
    WaitingForInput,
    AgentHandoff,
    FlowExecution,
    MemoryRetrieval,
    Completed,
    Error,
}

impl ConversationState {
    pub const ALL: [ConversationState; 9] = [
        ConversationState::Idle,
        ConversationState::Listening,
        ConversationState::Processing,
        ConversationState::WaitingForInput,
        ConversationState::AgentHandoff,
        ConversationState::FlowExecution,
        ConversationState::MemoryRetrieval,
        ConversationState::Completed,
        ConversationState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::Listening => "listening",
            ConversationState::Processing => "processing",
            ConversationState::WaitingForInput => "waiting_for_input",
            ConversationState::AgentHandoff => "agent_handoff",
            ConversationState::FlowExecution => "flow_execution",
            ConversationState::MemoryRetrieval => "memory_retrieval",
            ConversationState::Completed => "completed",
            ConversationState::Error => "error",
        }
    }

    /// Sessions in any state but `completed` count as active
    pub fn is_active(&self) -> bool {
        *self != ConversationState::Completed
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConversationState {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        ConversationState::ALL
            .iter()
            .copied()
            .find(|st| st.as_str() == wanted)
            .ok_or_else(|| MemoryError::validation(format!("unknown conversation state '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    SimpleQa,
    MemoryInteraction,
    MultiStepTask,
    AgentCoordination,
    ToolUsage,
    LearningFeedback,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::SimpleQa => "simple_qa",
            FlowType::MemoryInteraction => "memory_interaction",
            FlowType::MultiStepTask => "multi_step_task",
            FlowType::AgentCoordination => "agent_coordination",
            FlowType::ToolUsage => "tool_usage",
            FlowType::LearningFeedback => "learning_feedback",
        }
    }
}

impl std::fmt::Display for FlowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parse_and_serde() {
        assert_eq!(
            "waiting-for-input".parse::<ConversationState>().unwrap(),
            ConversationState::WaitingForInput
        );
        assert!("dancing".parse::<ConversationState>().is_err());
        assert_eq!(
            serde_json::to_string(&ConversationState::FlowExecution).unwrap(),
            "\"flow_execution\""
        );
        assert!(!ConversationState::Completed.is_active());
        assert!(ConversationState::Error.is_active());
    }

    #[test]
    fn test_flow_type_serde() {
        assert_eq!(serde_json::to_string(&FlowType::SimpleQa).unwrap(), "\"simple_qa\"");
        let parsed: FlowType = serde_json::from_str("\"learning_feedback\"").unwrap();
        assert_eq!(parsed, FlowType::LearningFeedback);
    }
}
