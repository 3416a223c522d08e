//! Step execution
//!
//! Dispatches a `FlowStep` against a session. Only the memory-query step
//! awaits anything (the learning engine); the rest are plain functions of the
//! session, the step payload and the message.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::agent::{AgentCapability, AgentResult};
use super::context::{ConversationContext, MemoryHit, MemoryLookup};
use super::flow::{Condition, FlowStep};
use super::state::ConversationState;
use crate::error::{MemoryError, Result};
use crate::learning::LearningEngine;
use crate::types::{BrainRegion, MetaValue, Role};

/// Type-specific output of a step
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDetail {
    Message,
    MemoryQuery(MemoryLookup),
    AgentCall(AgentResult),
    Condition { result: bool },
    InputCollection { variable: String, value: String },
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub response: Option<String>,
    pub detail: StepDetail,
    pub step_completed: bool,
    pub next_state: ConversationState,
}

/// What a step may consult besides the session itself
pub struct StepEnv<'a> {
    pub agents: &'a BTreeMap<String, AgentCapability>,
    pub learning: Option<&'a LearningEngine>,
    pub max_history: usize,
}

pub async fn execute_step(
    step: &FlowStep,
    ctx: &mut ConversationContext,
    message: &str,
    env: &StepEnv<'_>,
) -> Result<StepOutcome> {
    debug!("Executing {} step for session {}", step.kind(), ctx.session_id);
    match step {
        FlowStep::Message { template } => Ok(message_step(template, ctx, message, env.max_history)),
        FlowStep::MemoryQuery {
            query,
            brain_region,
            limit,
        } => memory_step(query, brain_region.as_deref(), *limit, ctx, message, env.learning).await,
        FlowStep::AgentCall { agent_id } => agent_step(agent_id, ctx, message, env.agents),
        FlowStep::Condition { condition } => Ok(condition_step(condition, ctx, message)),
        FlowStep::InputCollection { variable, prompt } => {
            Ok(input_step(variable, prompt, ctx, message, env.max_history))
        }
    }
}

/// Replace `{user_message}`, `{brain_region}` and `{var}` for every flow variable
pub fn render_template(template: &str, ctx: &ConversationContext, message: &str) -> String {
    let mut rendered = template
        .replace("{user_message}", message)
        .replace("{brain_region}", ctx.brain_region.as_str());
    for (name, value) in &ctx.flow_variables {
        rendered = rendered.replace(&format!("{{{}}}", name), &value.to_string());
    }
    rendered
}

fn message_step(template: &str, ctx: &mut ConversationContext, message: &str, max_history: usize) -> StepOutcome {
    let response = render_template(template, ctx, message);
    ctx.push_message(Role::Assistant, response.clone(), max_history);
    StepOutcome {
        response: Some(response),
        detail: StepDetail::Message,
        step_completed: true,
        next_state: ConversationState::WaitingForInput,
    }
}

async fn memory_step(
    query: &str,
    brain_region: Option<&str>,
    limit: usize,
    ctx: &mut ConversationContext,
    message: &str,
    learning: Option<&LearningEngine>,
) -> Result<StepOutcome> {
    let query = render_template(query, ctx, message);
    let region = brain_region
        .map(|r| render_template(r, ctx, message))
        .and_then(|r| r.parse::<BrainRegion>().ok())
        .unwrap_or(ctx.brain_region);

    ctx.current_state = ConversationState::MemoryRetrieval;
    let results = match learning {
        Some(engine) => engine
            .retrieve_patterns(&query, None, Some(region), limit)
            .await
            .into_iter()
            .map(|r| MemoryHit {
                pattern_id: r.pattern.id,
                pattern_type: r.pattern.pattern_type,
                successful_output: r.pattern.successful_output,
                score: r.score,
            })
            .collect(),
        None => Vec::new(),
    };

    let lookup = MemoryLookup {
        query,
        brain_region: region,
        results,
        timestamp: Utc::now(),
    };
    ctx.flow_variables
        .insert("memory_results".into(), MetaValue::from(lookup.results.len()));
    ctx.memory_context = Some(lookup.clone());
    ctx.current_state = ConversationState::FlowExecution;

    Ok(StepOutcome {
        response: None,
        detail: StepDetail::MemoryQuery(lookup),
        step_completed: true,
        next_state: ConversationState::FlowExecution,
    })
}

fn agent_step(
    agent_id: &str,
    ctx: &mut ConversationContext,
    message: &str,
    agents: &BTreeMap<String, AgentCapability>,
) -> Result<StepOutcome> {
    let agent = agents
        .get(agent_id)
        .ok_or_else(|| MemoryError::not_found("agent", agent_id))?;

    ctx.current_state = ConversationState::AgentHandoff;
    let result = AgentResult::handled_by(agent, message);
    ctx.agent_context.insert(agent_id.to_string(), result.clone());
    ctx.current_state = ConversationState::FlowExecution;

    Ok(StepOutcome {
        response: Some(result.response.clone()),
        detail: StepDetail::AgentCall(result),
        step_completed: true,
        next_state: ConversationState::FlowExecution,
    })
}

pub fn evaluate_condition(condition: &Condition, ctx: &ConversationContext, message: &str) -> bool {
    match condition {
        Condition::Always => true,
        Condition::Never => false,
        Condition::HasMemory => ctx.has_memory(),
        Condition::MessageContains(term) => message.to_lowercase().contains(&term.to_lowercase()),
        Condition::VariableSet(name) => ctx.flow_variables.contains_key(name),
    }
}

fn condition_step(condition: &Condition, ctx: &mut ConversationContext, message: &str) -> StepOutcome {
    let result = evaluate_condition(condition, ctx, message);
    ctx.flow_variables
        .insert("condition_result".into(), MetaValue::from(result));
    StepOutcome {
        response: None,
        detail: StepDetail::Condition { result },
        step_completed: true,
        next_state: ConversationState::FlowExecution,
    }
}

/// A blank message re-prompts instead of storing an empty value
fn input_step(
    variable: &str,
    prompt: &str,
    ctx: &mut ConversationContext,
    message: &str,
    max_history: usize,
) -> StepOutcome {
    if message.trim().is_empty() {
        ctx.push_message(Role::Assistant, prompt, max_history);
        return StepOutcome {
            response: Some(prompt.to_string()),
            detail: StepDetail::InputCollection {
                variable: variable.to_string(),
                value: String::new(),
            },
            step_completed: false,
            next_state: ConversationState::WaitingForInput,
        };
    }

    ctx.flow_variables
        .insert(variable.to_string(), MetaValue::from(message));
    StepOutcome {
        response: None,
        detail: StepDetail::InputCollection {
            variable: variable.to_string(),
            value: message.to_string(),
        },
        step_completed: true,
        next_state: ConversationState::FlowExecution,
    }
}
