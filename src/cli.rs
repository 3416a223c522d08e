//! CLI interface for metatron-memory

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::{self, Config};
use crate::conversation::ConversationState;
use crate::learning::{Feedback, FeedbackType, Interaction, DEFAULT_PATTERN_TYPE};
use crate::service::MemoryService;
use crate::types::{BrainRegion, MetaValue, Metadata};

#[derive(Parser)]
#[command(name = "metatron-memory")]
#[command(about = "Learning-pattern memory with TF-IDF retrieval and conversation flows", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "METATRON_CONFIG")]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Learn a pattern from a successful interaction
    Learn {
        /// Situation that triggered the interaction
        input_context: String,
        /// What worked
        output: String,
        /// Success score in [0, 1]
        #[arg(short, long)]
        score: f64,
        /// Brain region (e.g. FRONTAL_LOBE, cerebellum)
        #[arg(short, long, default_value = "FRONTAL_LOBE")]
        region: String,
        /// Pattern type
        #[arg(short = 't', long = "type", default_value = DEFAULT_PATTERN_TYPE)]
        pattern_type: String,
        /// Extra metadata as key=value (repeatable)
        #[arg(short, long = "meta")]
        meta: Vec<String>,
    },
    /// List patterns, or rank them against a query
    Patterns {
        /// Rank by similarity to this text
        #[arg(short, long)]
        query: Option<String>,
        #[arg(short = 't', long = "type")]
        pattern_type: Option<String>,
        #[arg(short, long)]
        region: Option<String>,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Record feedback on a pattern
    Feedback {
        pattern_id: String,
        #[arg(short, long)]
        user: String,
        /// positive, negative or correction
        #[arg(short = 't', long = "type")]
        feedback_type: String,
        /// Feedback score in [-1, 1]
        #[arg(short, long, allow_hyphen_values = true)]
        score: f64,
        /// Output being rated
        #[arg(short, long, default_value = "")]
        original: String,
        /// Corrected output
        #[arg(long)]
        correction: Option<String>,
    },
    /// Suggest approaches for a context
    Suggest {
        context: String,
        #[arg(short, long, default_value = "FRONTAL_LOBE")]
        region: String,
    },
    /// Show learning and conversation statistics
    Stats,
    /// Remove old, ineffective patterns
    Cleanup,
    /// List conversation flows and agents
    Flows,
    /// List sessions, or inspect and adjust one
    Sessions {
        /// Session to show
        session_id: Option<String>,
        #[arg(short, long)]
        user: Option<String>,
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Abandon the session's active flow
        #[arg(long, requires = "session_id")]
        reset: bool,
        /// Force the session into a state (e.g. idle, waiting_for_input)
        #[arg(long, requires = "session_id")]
        state: Option<String>,
    },
    /// Interactive conversation
    Chat {
        #[arg(short, long, default_value = "local")]
        user: String,
        /// Resume an existing session
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Show or initialize configuration
    Config {
        /// Write a default config file
        #[arg(long)]
        init: bool,
        /// Print the config file path
        #[arg(long)]
        path: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { init, path } = &cli.command {
        return run_config(&cli, *init, *path);
    }

    let service = MemoryService::open(load_config(&cli)?)?;
    let outcome = dispatch(&cli, &service).await;
    service.shutdown().await?;
    outcome
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn run_config(cli: &Cli, init: bool, path: bool) -> Result<()> {
    let target = match &cli.config {
        Some(p) => p.clone(),
        None => config::config_path()?,
    };
    if path {
        println!("{}", target.display());
        return Ok(());
    }
    if init {
        Config::default().save_to(&target)?;
        println!("Wrote default configuration to {}", target.display());
        return Ok(());
    }
    let config = load_config(cli)?;
    if cli.json {
        print_json(&config)
    } else {
        config::show_config(&config)
    }
}

async fn dispatch(cli: &Cli, service: &MemoryService) -> Result<()> {
    let learning = service.learning();
    let conversations = service.conversations();

    match &cli.command {
        Commands::Learn {
            input_context,
            output,
            score,
            region,
            pattern_type,
            meta,
        } => {
            let interaction = Interaction::new(input_context.as_str(), output.as_str(), *score, region.parse()?)
                .with_pattern_type(pattern_type.as_str())
                .with_metadata(parse_meta(meta)?);
            match learning.learn(interaction).await? {
                Some(id) if cli.json => print_json(&serde_json::json!({ "pattern_id": id }))?,
                Some(id) => println!("Learned pattern {}", id),
                None if cli.json => print_json(&serde_json::json!({ "pattern_id": null }))?,
                None => println!(
                    "Not learned: score {} is below the minimum of {}",
                    score,
                    learning.config().min_success_score
                ),
            }
        }
        Commands::Patterns {
            query,
            pattern_type,
            region,
            limit,
        } => {
            let region = parse_region(region.as_deref())?;
            match query {
                Some(q) => {
                    let ranked = learning
                        .retrieve_patterns(q, pattern_type.as_deref(), region, *limit)
                        .await;
                    if cli.json {
                        return print_json(&ranked);
                    }
                    if ranked.is_empty() {
                        println!("No patterns match '{}'", q);
                    }
                    for r in &ranked {
                        println!(
                            "  {:.3} (sim {:.3}) {} [{} / {}] {} -> {}",
                            r.score,
                            r.similarity,
                            r.pattern.id,
                            r.pattern.pattern_type,
                            r.pattern.brain_region,
                            r.pattern.input_context,
                            r.pattern.successful_output
                        );
                    }
                }
                None => {
                    let patterns = learning.list_patterns(pattern_type.as_deref(), region, *limit).await;
                    if cli.json {
                        return print_json(&patterns);
                    }
                    if patterns.is_empty() {
                        println!("No patterns stored.");
                    }
                    for p in &patterns {
                        println!(
                            "  {} [{} / {}] used {}x, effectiveness {:.2}: {}",
                            p.id, p.pattern_type, p.brain_region, p.usage_count, p.effectiveness_score, p.input_context
                        );
                    }
                }
            }
        }
        Commands::Feedback {
            pattern_id,
            user,
            feedback_type,
            score,
            original,
            correction,
        } => {
            let feedback_type: FeedbackType = feedback_type.parse()?;
            let mut feedback = Feedback::new(pattern_id.as_str(), user.as_str(), feedback_type, *score, original.as_str());
            if let Some(c) = correction {
                feedback = feedback.with_correction(c.as_str());
            }
            let id = learning.record_feedback(feedback).await?;
            if cli.json {
                print_json(&serde_json::json!({ "feedback_id": id }))?;
            } else {
                println!("Recorded feedback {}", id);
            }
        }
        Commands::Suggest { context, region } => {
            let suggestions = learning.suggestions(context, region.parse()?).await;
            if cli.json {
                return print_json(&suggestions);
            }
            if suggestions.is_empty() {
                println!("No suggestions.");
            }
            for s in &suggestions {
                println!(
                    "  [{:.2}] {} (used {}x, {})",
                    s.confidence, s.suggested_approach, s.usage_count, s.pattern_id
                );
            }
        }
        Commands::Stats => {
            let stats = learning.stats().await;
            let health = learning.health().await;
            let conv = conversations.stats().await;
            if cli.json {
                return print_json(&serde_json::json!({
                    "learning": stats,
                    "health": health,
                    "conversations": conv,
                }));
            }
            println!("Learning Statistics");
            println!("===================");
            println!("Patterns: {}", stats.total_patterns);
            println!("Feedback: {}", stats.total_feedback);
            println!("Average effectiveness: {:.3}", stats.average_effectiveness);
            println!("Vocabulary: {} terms (fitted: {})", health.vocabulary_size, health.vectorizer_fitted);
            for (t, n) in &stats.patterns_by_type {
                println!("  type {}: {}", t, n);
            }
            for (r, n) in &stats.patterns_by_region {
                println!("  region {}: {}", r, n);
            }
            if !stats.most_used_patterns.is_empty() {
                println!("Most used:");
                for p in &stats.most_used_patterns {
                    println!("  {} ({}) used {}x, effectiveness {:.2}", p.id, p.pattern_type, p.usage_count, p.effectiveness);
                }
            }
            println!();
            println!("Conversations");
            println!("=============");
            println!("Sessions: {} ({} active)", conv.total_sessions, conv.active_sessions);
            println!("Flows: {}, agents: {}", conv.registered_flows, conv.registered_agents);
            for (flow, n) in &conv.flow_usage {
                println!("  {} completed {}x", flow, n);
            }
        }
        Commands::Cleanup => {
            let removed = learning.cleanup().await?;
            if cli.json {
                print_json(&serde_json::json!({ "removed": removed }))?;
            } else {
                println!("Removed {} patterns", removed);
            }
        }
        Commands::Flows => {
            let flows = conversations.list_flows().await;
            let agents = conversations.list_agents().await;
            if cli.json {
                return print_json(&serde_json::json!({ "flows": flows, "agents": agents }));
            }
            for f in &flows {
                let steps: Vec<&str> = f.steps.iter().map(|s| s.kind()).collect();
                println!("{} ({}) - {}", f.flow_id, f.flow_type, f.description);
                println!("  triggers: {}", f.trigger_patterns.join(", "));
                println!("  steps: {}", steps.join(" -> "));
            }
            if agents.is_empty() {
                println!("No agents registered.");
            }
            for a in &agents {
                println!("agent {} ({}) [{}]", a.agent_id, a.agent_name, a.status);
            }
        }
        Commands::Sessions {
            session_id,
            user,
            limit,
            reset,
            state,
        } => match session_id {
            Some(id) => {
                if *reset {
                    conversations.reset_flow(id).await?;
                }
                if let Some(raw) = state {
                    let (old, new) = conversations.update_state(id, raw.parse()?).await?;
                    if !cli.json {
                        println!("State: {} -> {}", old, new);
                    }
                }
                let ctx = conversations.get_session(id).await?;
                if cli.json {
                    return print_json(&ctx);
                }
                println!("{}", ctx.summary());
                for entry in &ctx.conversation_history {
                    println!("  [{}] {}: {}", entry.timestamp.format("%H:%M:%S"), entry.role, entry.content);
                }
            }
            None => {
                let sessions = conversations.list_sessions(user.as_deref(), *limit).await;
                if cli.json {
                    return print_json(&sessions);
                }
                if sessions.is_empty() {
                    println!("No sessions.");
                }
                for s in &sessions {
                    println!("{}", s.summary());
                }
            }
        },
        Commands::Chat { user, session } => run_chat(service, user, session.clone()).await?,
        Commands::Config { .. } => {}
    }
    Ok(())
}

async fn run_chat(service: &MemoryService, user: &str, mut session_id: Option<String>) -> Result<()> {
    use rustyline::error::ReadlineError;

    let conversations = service.conversations();
    let mut rl = rustyline::DefaultEditor::new().context("Failed to initialize line editor")?;

    println!("Type a message. /reset abandons the current flow, /state shows the session, /quit exits.");
    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                match input {
                    "/quit" | "/exit" => break,
                    "/reset" => {
                        if let Some(id) = &session_id {
                            let ctx = conversations.reset_flow(id).await?;
                            println!("{}", ctx.summary());
                        }
                        continue;
                    }
                    "/state" => {
                        if let Some(id) = &session_id {
                            println!("{}", conversations.get_session(id).await?.summary());
                        }
                        continue;
                    }
                    _ => {}
                }

                let result = match &session_id {
                    Some(id) => conversations.process_message(id, input, "user").await?,
                    None => {
                        let (ctx, result) = conversations.start_and_process(user, input).await?;
                        println!("(session {}, {})", ctx.session_id, ctx.brain_region);
                        session_id = Some(ctx.session_id);
                        result
                    }
                };
                if let Some(response) = &result.response {
                    println!("{}", response);
                }
                if let Some(error) = &result.error {
                    println!("error: {}", error);
                }
                if result.flow_completed {
                    println!(
                        "(flow {} completed in {:.2}s)",
                        result.flow_id.as_deref().unwrap_or("?"),
                        result.flow_duration.unwrap_or(0.0)
                    );
                } else if result.next_state != ConversationState::WaitingForInput {
                    println!("({})", result.next_state);
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Failed to read input"),
        }
    }
    Ok(())
}

fn parse_region(raw: Option<&str>) -> Result<Option<BrainRegion>> {
    Ok(raw.map(str::parse::<BrainRegion>).transpose()?)
}

/// Parse `key=value` pairs; numbers and booleans keep their type
fn parse_meta(pairs: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("metadata '{}' is not key=value", pair))?;
        let value = if let Ok(i) = value.parse::<i64>() {
            MetaValue::Int(i)
        } else if let Ok(f) = value.parse::<f64>() {
            MetaValue::Float(f)
        } else if let Ok(b) = value.parse::<bool>() {
            MetaValue::Bool(b)
        } else {
            MetaValue::from(value)
        };
        metadata.insert(key.trim().to_string(), value);
    }
    Ok(metadata)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_meta() {
        let meta = parse_meta(&["n=3".into(), "ratio=0.5".into(), "ok=true".into(), "who=ann".into()]).unwrap();
        assert_eq!(meta.get("n"), Some(&MetaValue::Int(3)));
        assert_eq!(meta.get("ratio"), Some(&MetaValue::Float(0.5)));
        assert_eq!(meta.get("ok"), Some(&MetaValue::Bool(true)));
        assert_eq!(meta.get("who"), Some(&MetaValue::from("ann")));
        assert!(parse_meta(&["novalue".into()]).is_err());
    }

    #[test]
    fn test_parse_feedback_args() {
        let cli = Cli::try_parse_from([
            "metatron-memory",
            "feedback",
            "p1",
            "--user",
            "ann",
            "--type",
            "negative",
            "--score",
            "-0.5",
        ])
        .unwrap();
        match cli.command {
            Commands::Feedback { score, .. } => assert_eq!(score, -0.5),
            _ => panic!("expected feedback command"),
        }
    }
}
