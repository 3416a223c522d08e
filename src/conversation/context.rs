//! Per-session conversation state with a bounded history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use super::agent::AgentResult;
use super::state::{ConversationState, FlowType};
use crate::types::{BrainRegion, MetaValue, Metadata, Role};

pub(crate) const CURRENT_STEP: &str = "current_step";
pub(crate) const FLOW_START_TIME: &str = "flow_start_time";
pub(crate) const FLOW_DURATION: &str = "flow_duration";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(with = "crate::types::timestamp")]
    pub timestamp: DateTime<Utc>,
    pub brain_region: BrainRegion,
}

/// A pattern surfaced by a memory-query step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub pattern_id: String,
    pub pattern_type: String,
    pub successful_output: String,
    pub score: f64,
}

/// Result of the most recent memory-query step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryLookup {
    pub query: String,
    pub brain_region: BrainRegion,
    pub results: Vec<MemoryHit>,
    #[serde(with = "crate::types::timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub user_id: String,
    pub current_state: ConversationState,
    pub current_flow: Option<String>,
    pub flow_type: Option<FlowType>,
    pub brain_region: BrainRegion,
    #[serde(default)]
    pub memory_context: Option<MemoryLookup>,
    #[serde(default)]
    pub agent_context: BTreeMap<String, AgentResult>,
    #[serde(default)]
    pub flow_variables: Metadata,
    #[serde(default)]
    pub conversation_history: VecDeque<HistoryEntry>,
    /// Ids of flows this session has run to completion, oldest first
    #[serde(default)]
    pub completed_flows: Vec<String>,
    #[serde(with = "crate::types::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::types::timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, brain_region: BrainRegion) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            current_state: ConversationState::Listening,
            current_flow: None,
            flow_type: None,
            brain_region,
            memory_context: None,
            agent_context: BTreeMap::new(),
            flow_variables: Metadata::new(),
            conversation_history: VecDeque::new(),
            completed_flows: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: Metadata::new(),
        }
    }

    /// Append a message, dropping the oldest entries beyond `max_history`
    pub fn push_message(&mut self, role: Role, content: impl Into<String>, max_history: usize) {
        let now = Utc::now();
        self.conversation_history.push_back(HistoryEntry {
            role,
            content: content.into(),
            timestamp: now,
            brain_region: self.brain_region,
        });
        while self.conversation_history.len() > max_history {
            self.conversation_history.pop_front();
        }
        self.updated_at = now;
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn last_n_messages(&self, n: usize) -> Vec<&HistoryEntry> {
        let start = self.conversation_history.len().saturating_sub(n);
        self.conversation_history.iter().skip(start).collect()
    }

    pub fn current_step(&self) -> Option<usize> {
        self.flow_variables
            .get(CURRENT_STEP)
            .and_then(MetaValue::as_i64)
            .and_then(|i| usize::try_from(i).ok())
    }

    pub(crate) fn set_current_step(&mut self, step: usize) {
        self.flow_variables.insert(CURRENT_STEP.into(), MetaValue::from(step));
    }

    /// Seconds since the active flow started, if it recorded a start time
    pub(crate) fn flow_elapsed_secs(&self) -> Option<f64> {
        let raw = self.flow_variables.get(FLOW_START_TIME)?.as_str()?;
        let start = crate::types::timestamp::parse(raw).ok()?;
        let elapsed = (Utc::now() - start).num_milliseconds() as f64 / 1000.0;
        Some(elapsed.max(0.0))
    }

    /// Begin step bookkeeping for a flow if none is in progress
    pub(crate) fn begin_flow_if_needed(&mut self) -> bool {
        if self.flow_variables.contains_key(CURRENT_STEP) {
            return false;
        }
        self.set_current_step(0);
        self.flow_variables
            .insert(FLOW_START_TIME.into(), MetaValue::from(Utc::now().to_rfc3339()));
        true
    }

    /// Drop the active flow and its step bookkeeping
    pub(crate) fn clear_flow(&mut self) {
        self.current_flow = None;
        self.flow_type = None;
        self.flow_variables.remove(CURRENT_STEP);
        self.flow_variables.remove(FLOW_START_TIME);
    }

    pub fn flow_duration(&self) -> Option<f64> {
        self.flow_variables.get(FLOW_DURATION).and_then(MetaValue::as_f64)
    }

    /// True when the last memory lookup returned at least one pattern
    pub fn has_memory(&self) -> bool {
        self.memory_context.as_ref().is_some_and(|m| !m.results.is_empty())
    }

    pub fn summary(&self) -> String {
        let user_count = self
            .conversation_history
            .iter()
            .filter(|m| m.role == Role::User)
            .count();
        format!(
            "Session {} ({}): {} messages ({} user), state {}, flow {}",
            self.session_id,
            self.user_id,
            self.conversation_history.len(),
            user_count,
            self.current_state,
            self.current_flow.as_deref().unwrap_or("none")
        )
    }
}
