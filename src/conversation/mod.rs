//! Conversation flow engine
//!
//! Matches incoming messages to predefined flows, runs their steps one message
//! at a time and tracks per-session state.

pub mod agent;
pub mod context;
pub mod flow;
pub mod manager;
pub mod state;
pub mod step;

pub use agent::{AgentCapability, AgentResult};
pub use context::{ConversationContext, HistoryEntry, MemoryHit, MemoryLookup};
pub use flow::{default_flows, Condition, ConversationFlow, FlowStep};
pub use manager::{ConversationManager, ConversationStats, ProcessResult};
pub use state::{ConversationState, FlowType};
pub use step::{StepDetail, StepOutcome};
