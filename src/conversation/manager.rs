//! Conversation manager
//!
//! Owns sessions, registered flows and agents. Each session sits behind its
//! own mutex, so independent sessions never wait on each other; the session
//! map lock is only held to look up or insert entries.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::agent::AgentCapability;
use super::context::{ConversationContext, FLOW_DURATION};
use super::flow::{default_flows, ConversationFlow};
use super::state::{ConversationState, FlowType};
use super::step::{execute_step, StepDetail, StepEnv};
use crate::config::ConversationConfig;
use crate::error::{MemoryError, Result};
use crate::persist::write_json;
use crate::learning::LearningEngine;
use crate::types::{BrainRegion, MetaValue, Role};

type SessionHandle = Arc<Mutex<ConversationContext>>;

/// Outcome of `process_message`
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    pub session_id: String,
    pub response: Option<String>,
    /// Flow that handled the message, if any
    pub flow_id: Option<String>,
    pub step_completed: bool,
    pub flow_completed: bool,
    /// Seconds, set when this message completed the flow
    pub flow_duration: Option<f64>,
    pub detail: Option<StepDetail>,
    pub error: Option<String>,
    pub next_state: ConversationState,
}

impl ProcessResult {
    fn new(session_id: &str, next_state: ConversationState) -> Self {
        Self {
            success: true,
            session_id: session_id.to_string(),
            response: None,
            flow_id: None,
            step_completed: false,
            flow_completed: false,
            flow_duration: None,
            detail: None,
            error: None,
            next_state,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub registered_flows: usize,
    pub registered_agents: usize,
    pub flow_types: Vec<FlowType>,
    pub session_states: BTreeMap<String, usize>,
    /// Completed runs per flow id
    pub flow_usage: BTreeMap<String, usize>,
    pub brain_region_usage: BTreeMap<String, usize>,
}

pub struct ConversationManager {
    config: ConversationConfig,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    flows: RwLock<BTreeMap<String, ConversationFlow>>,
    agents: RwLock<BTreeMap<String, AgentCapability>>,
    learning: Option<Arc<LearningEngine>>,
    sessions_path: Option<PathBuf>,
    /// Serializes writers of the sessions file
    persist_lock: Mutex<()>,
}

impl ConversationManager {
    /// Manager with the default flows and no persistence
    pub fn new(config: ConversationConfig) -> Self {
        let flows = default_flows()
            .into_iter()
            .map(|f| (f.flow_id.clone(), f))
            .collect();
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            flows: RwLock::new(flows),
            agents: RwLock::new(BTreeMap::new()),
            learning: None,
            sessions_path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Let memory-query steps search this engine
    pub fn with_learning(mut self, engine: Arc<LearningEngine>) -> Self {
        self.learning = Some(engine);
        self
    }

    /// Load sessions from `path` and save them back after every change
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        let sessions = load_sessions(&path);
        info!("Loaded {} conversation sessions", sessions.len());
        self.sessions = RwLock::new(
            sessions
                .into_iter()
                .map(|ctx| (ctx.session_id.clone(), Arc::new(Mutex::new(ctx))))
                .collect(),
        );
        self.sessions_path = Some(path);
        self
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    async fn session(&self, session_id: &str) -> Result<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| MemoryError::not_found("session", session_id))
    }

    /// Continue `session_id` when it exists, otherwise open a new session.
    /// The message is appended to the session history.
    pub async fn start_conversation(
        &self,
        user_id: &str,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<ConversationContext> {
        if user_id.trim().is_empty() {
            return Err(MemoryError::validation("user_id is required"));
        }

        let existing = match session_id {
            Some(id) => self.sessions.read().await.get(id).cloned(),
            None => None,
        };

        let handle = match existing {
            Some(handle) => handle,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let region = BrainRegion::classify(message, self.config.default_brain_region);
                let ctx = ConversationContext::new(id.clone(), user_id, region);
                let handle = Arc::new(Mutex::new(ctx));
                self.sessions.write().await.insert(id.clone(), handle.clone());
                info!("Started conversation: {} ({})", id, region);
                handle
            }
        };

        let snapshot = {
            let mut ctx = handle.lock().await;
            ctx.touch();
            ctx.push_message(Role::User, message, self.config.max_conversation_history);
            ctx.clone()
        };
        self.persist().await;
        Ok(snapshot)
    }

    /// Process a message within a session.
    ///
    /// Step failures put the session in `error` and come back as a result with
    /// `success == false`; only an unknown session or message type is an `Err`.
    pub async fn process_message(&self, session_id: &str, message: &str, message_type: &str) -> Result<ProcessResult> {
        let handle = self.session(session_id).await?;
        let role = Role::parse(message_type)
            .ok_or_else(|| MemoryError::validation(format!("unknown message type '{}'", message_type)))?;

        let result = {
            let mut ctx = handle.lock().await;
            ctx.push_message(role, message, self.config.max_conversation_history);
            self.process_locked(&mut ctx, message).await
        };
        self.persist().await;
        Ok(result)
    }

    /// Open a new session with `message` and run it through the flow engine,
    /// recording the message in history once.
    pub async fn start_and_process(&self, user_id: &str, message: &str) -> Result<(ConversationContext, ProcessResult)> {
        let started = self.start_conversation(user_id, message, None).await?;
        let handle = self.session(&started.session_id).await?;
        let (ctx, result) = {
            let mut ctx = handle.lock().await;
            let result = self.process_locked(&mut ctx, message).await;
            (ctx.clone(), result)
        };
        self.persist().await;
        Ok((ctx, result))
    }

    /// Runs the flow engine on a message already recorded in history
    async fn process_locked(&self, ctx: &mut ConversationContext, message: &str) -> ProcessResult {
        let max_history = self.config.max_conversation_history;
        ctx.current_state = ConversationState::Processing;

        let Some(flow) = self.select_flow(ctx, message).await else {
            let response = format!("I understand you said: {}. How can I help you further?", message);
            ctx.push_message(Role::Assistant, response.clone(), max_history);
            ctx.current_state = ConversationState::WaitingForInput;
            let mut result = ProcessResult::new(&ctx.session_id, ConversationState::WaitingForInput);
            result.response = Some(response);
            return result;
        };

        if ctx.current_flow.as_deref() != Some(flow.flow_id.as_str()) {
            info!("Session {} entering flow {}", ctx.session_id, flow.flow_id);
        }
        ctx.current_flow = Some(flow.flow_id.clone());
        ctx.flow_type = Some(flow.flow_type);
        ctx.current_state = ConversationState::FlowExecution;
        ctx.begin_flow_if_needed();

        let mut result = ProcessResult::new(&ctx.session_id, ConversationState::FlowExecution);
        result.flow_id = Some(flow.flow_id.clone());

        let index = ctx.current_step().unwrap_or(0);
        if let Some(step) = flow.steps.get(index) {
            let agents = self.agents.read().await.clone();
            let env = StepEnv {
                agents: &agents,
                learning: self.learning.as_deref(),
                max_history,
            };
            match execute_step(step, ctx, message, &env).await {
                Ok(outcome) => {
                    result.response = outcome.response;
                    result.detail = Some(outcome.detail);
                    result.step_completed = outcome.step_completed;
                    result.next_state = outcome.next_state;
                    ctx.current_state = outcome.next_state;
                    if outcome.step_completed {
                        ctx.set_current_step(index + 1);
                    }
                }
                Err(e) => {
                    warn!("Step {} of flow {} failed: {}", index, flow.flow_id, e);
                    ctx.current_state = ConversationState::Error;
                    result.success = false;
                    result.error = Some(e.to_string());
                    result.next_state = ConversationState::Error;
                    return result;
                }
            }
        }

        if ctx.current_step().unwrap_or(0) >= flow.steps.len() {
            let duration = ctx.flow_elapsed_secs().unwrap_or(0.0);
            ctx.flow_variables
                .insert(FLOW_DURATION.into(), MetaValue::from(duration));
            ctx.clear_flow();
            ctx.completed_flows.push(flow.flow_id.clone());
            ctx.current_state = ConversationState::Completed;

            result.flow_completed = true;
            result.flow_duration = Some(duration);
            result.next_state = ConversationState::Idle;
            info!(
                "Session {} completed flow {} in {:.3}s",
                ctx.session_id, flow.flow_id, duration
            );
        }
        result
    }

    /// Active flow if one is running, otherwise the best-scoring flow above the
    /// threshold. A running flow is never replaced by another.
    async fn select_flow(&self, ctx: &mut ConversationContext, message: &str) -> Option<ConversationFlow> {
        let flows = self.flows.read().await;

        let mut best: Option<(&ConversationFlow, f64)> = None;
        for flow in flows.values() {
            let score = flow.score(message, ctx.brain_region, &ctx.flow_variables);
            if score > self.config.flow_threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((flow, score));
            }
        }

        if let Some(active_id) = ctx.current_flow.clone() {
            match flows.get(&active_id) {
                Some(active) => {
                    if let Some((candidate, score)) = best {
                        if candidate.flow_id != active_id {
                            debug!(
                                "Session {} stays in flow {}; ignoring {} (score {:.2})",
                                ctx.session_id, active_id, candidate.flow_id, score
                            );
                        }
                    }
                    return Some(active.clone());
                }
                None => {
                    warn!(
                        "Session {} referenced unregistered flow {}; dropping it",
                        ctx.session_id, active_id
                    );
                    ctx.clear_flow();
                }
            }
        }

        best.map(|(flow, score)| {
            debug!("Selected flow {} (score {:.2})", flow.flow_id, score);
            flow.clone()
        })
    }

    pub async fn get_session(&self, session_id: &str) -> Result<ConversationContext> {
        let handle = self.session(session_id).await?;
        let ctx = handle.lock().await;
        Ok(ctx.clone())
    }

    /// Sessions, most recently updated first
    pub async fn list_sessions(&self, user_id: Option<&str>, limit: usize) -> Vec<ConversationContext> {
        let mut sessions = self.snapshot().await;
        sessions.retain(|s| user_id.map_or(true, |u| s.user_id == u));
        sessions.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions.truncate(limit);
        sessions
    }

    /// Force a session into `state`; returns the previous and new state
    pub async fn update_state(
        &self,
        session_id: &str,
        state: ConversationState,
    ) -> Result<(ConversationState, ConversationState)> {
        let handle = self.session(session_id).await?;
        let old = {
            let mut ctx = handle.lock().await;
            let old = ctx.current_state;
            ctx.current_state = state;
            ctx.touch();
            old
        };
        info!("Session {} state {} -> {}", session_id, old, state);
        self.persist().await;
        Ok((old, state))
    }

    /// Abandon the active flow and return the session to idle
    pub async fn reset_flow(&self, session_id: &str) -> Result<ConversationContext> {
        let handle = self.session(session_id).await?;
        let snapshot = {
            let mut ctx = handle.lock().await;
            if let Some(flow) = &ctx.current_flow {
                info!("Session {} abandoned flow {}", session_id, flow);
            }
            ctx.clear_flow();
            ctx.current_state = ConversationState::Idle;
            ctx.touch();
            ctx.clone()
        };
        self.persist().await;
        Ok(snapshot)
    }

    /// Add or replace a flow
    pub async fn register_flow(&self, flow: ConversationFlow) -> Result<()> {
        if flow.flow_id.trim().is_empty() {
            return Err(MemoryError::validation("flow_id is required"));
        }
        let id = flow.flow_id.clone();
        if self.flows.write().await.insert(id.clone(), flow).is_some() {
            info!("Replaced flow {}", id);
        } else {
            info!("Registered flow {}", id);
        }
        Ok(())
    }

    pub async fn register_agent(&self, agent: AgentCapability) -> Result<()> {
        if agent.agent_id.trim().is_empty() {
            return Err(MemoryError::validation("agent_id is required"));
        }
        info!("Registered agent {} ({})", agent.agent_id, agent.agent_name);
        self.agents.write().await.insert(agent.agent_id.clone(), agent);
        Ok(())
    }

    pub async fn list_flows(&self) -> Vec<ConversationFlow> {
        self.flows.read().await.values().cloned().collect()
    }

    pub async fn list_agents(&self) -> Vec<AgentCapability> {
        self.agents.read().await.values().cloned().collect()
    }

    pub async fn stats(&self) -> ConversationStats {
        let sessions = self.snapshot().await;
        let flows = self.flows.read().await;

        let mut session_states = BTreeMap::new();
        let mut flow_usage = BTreeMap::new();
        let mut brain_region_usage = BTreeMap::new();
        for s in &sessions {
            *session_states.entry(s.current_state.as_str().to_string()).or_insert(0) += 1;
            *brain_region_usage.entry(s.brain_region.as_str().to_string()).or_insert(0) += 1;
            for flow_id in &s.completed_flows {
                *flow_usage.entry(flow_id.clone()).or_insert(0) += 1;
            }
        }
        let flow_types: BTreeSet<FlowType> = flows.values().map(|f| f.flow_type).collect();

        ConversationStats {
            total_sessions: sessions.len(),
            active_sessions: sessions.iter().filter(|s| s.current_state.is_active()).count(),
            registered_flows: flows.len(),
            registered_agents: self.agents.read().await.len(),
            flow_types: flow_types.into_iter().collect(),
            session_states,
            flow_usage,
            brain_region_usage,
        }
    }

    async fn snapshot(&self) -> Vec<ConversationContext> {
        let handles: Vec<SessionHandle> = self.sessions.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(handles.len());
        for handle in handles {
            sessions.push(handle.lock().await.clone());
        }
        sessions
    }

    /// Write every session to the sessions file. Failures are logged only.
    async fn persist(&self) {
        if let Err(e) = self.write_sessions().await {
            warn!("Failed to save sessions: {}", e);
        }
    }

    /// Save sessions now, reporting failure
    pub async fn flush(&self) -> Result<()> {
        self.write_sessions().await
    }

    /// Snapshot under the writer lock so a later write never carries older state
    async fn write_sessions(&self) -> Result<()> {
        let Some(path) = self.sessions_path.clone() else {
            return Ok(());
        };
        let _writer = self.persist_lock.lock().await;
        let mut sessions = self.snapshot().await;
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.session_id.cmp(&b.session_id)));

        let target = path.clone();
        tokio::task::spawn_blocking(move || write_json(&target, &sessions))
            .await
            .map_err(|e| MemoryError::io(path, std::io::Error::other(e)))?
    }
}

fn load_sessions(path: &Path) -> Vec<ConversationContext> {
    if !path.exists() {
        return Vec::new();
    }
    let values: Vec<serde_json::Value> = match std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|c| serde_json::from_str(&c).map_err(|e| e.to_string()))
    {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring unreadable sessions file {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    values
        .into_iter()
        .filter_map(|v| match serde_json::from_value::<ConversationContext>(v) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                warn!("Skipping malformed session: {}", e);
                None
            }
        })
        .collect()
}
