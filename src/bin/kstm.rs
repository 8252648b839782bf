/// kstm - command line companion for koru-stm
///
/// Usage:
///   kstm score <TEXT> [--priority P] [--source S]  - Attention score breakdown
///   kstm replay <FILE> [--config FILE] [--json]     - Run a script of operations
///   kstm config [--config FILE]                     - Print the effective configuration
///
/// Replay runs against a fresh in-memory facade on a manual clock, so TTLs
/// and idle timeouts are crossed with `advance` steps instead of waiting.
use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use colored::*;
use koru_stm::{
    Clock, ManualClock, MemoryConfig, Metadata, Role, ShortTermMemory, attention::score_text,
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// koru-stm - short-term memory and attention
///
/// Inspect attention scoring and replay memory scenarios.
#[derive(Parser)]
#[command(name = "kstm")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log at debug level (otherwise RUST_LOG, default warn)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a piece of text for attention
    ///
    /// Examples:
    ///   kstm score "URGENT: the app is not working"
    ///   kstm score "hello" --priority critical --source user_input
    Score {
        /// Text to score
        text: String,

        /// Metadata priority ("high" or "critical" add a bonus)
        #[arg(short, long)]
        priority: Option<String>,

        /// Metadata source ("user_input" or "system_alert" add a bonus)
        #[arg(short, long)]
        source: Option<String>,

        /// Print the breakdown as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay a JSON script of operations
    ///
    /// The script is an array of steps tagged by "op", e.g.
    ///   [{"op": "cache_set", "key": "k", "value": 1, "ttl_secs": 5},
    ///    {"op": "advance", "secs": 5},
    ///    {"op": "cache_get", "key": "k"}]
    Replay {
        /// Script file
        file: PathBuf,

        /// Configuration file (JSON, partial allowed)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print results and stats as one JSON document
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as JSON
    Config {
        /// Configuration file (JSON, partial allowed)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// One replay operation.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    StoreContext {
        label: String,
        payload: JsonValue,
        #[serde(default = "default_importance")]
        importance: f32,
        #[serde(default)]
        context: Metadata,
    },
    RetrieveContext {
        label: String,
    },
    CurrentContext,
    CacheSet {
        key: String,
        value: JsonValue,
        ttl_secs: Option<i64>,
    },
    CacheGet {
        key: String,
    },
    WorkingStore {
        key: String,
        payload: JsonValue,
        ttl_secs: Option<i64>,
        #[serde(default = "default_priority")]
        priority: u8,
    },
    WorkingRetrieve {
        key: String,
    },
    WorkingSearch {
        pattern: String,
    },
    BufferCreate {
        name: String,
        capacity: Option<usize>,
    },
    BufferPush {
        name: String,
        payload: JsonValue,
        #[serde(default = "default_type_tag")]
        type_tag: String,
    },
    BufferPop {
        name: String,
    },
    BufferAll {
        name: String,
    },
    Score {
        text: String,
        metadata: Option<Metadata>,
    },
    Focus {
        entity: String,
        score: f32,
        context: Option<String>,
    },
    TopFocus {
        #[serde(default = "default_top")]
        n: usize,
    },
    Message {
        user: String,
        content: String,
        #[serde(default)]
        role: Role,
    },
    Conversation {
        user: String,
        max_messages: Option<usize>,
    },
    Summary {
        user: String,
    },
    Advance {
        secs: i64,
    },
    Maintenance,
    ClearMemory,
    Stats,
}

fn default_importance() -> f32 {
    0.5
}

fn default_priority() -> u8 {
    1
}

fn default_type_tag() -> String {
    "json".to_string()
}

fn default_top() -> usize {
    5
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::StoreContext { .. } => "store_context",
            Step::RetrieveContext { .. } => "retrieve_context",
            Step::CurrentContext => "current_context",
            Step::CacheSet { .. } => "cache_set",
            Step::CacheGet { .. } => "cache_get",
            Step::WorkingStore { .. } => "working_store",
            Step::WorkingRetrieve { .. } => "working_retrieve",
            Step::WorkingSearch { .. } => "working_search",
            Step::BufferCreate { .. } => "buffer_create",
            Step::BufferPush { .. } => "buffer_push",
            Step::BufferPop { .. } => "buffer_pop",
            Step::BufferAll { .. } => "buffer_all",
            Step::Score { .. } => "score",
            Step::Focus { .. } => "focus",
            Step::TopFocus { .. } => "top_focus",
            Step::Message { .. } => "message",
            Step::Conversation { .. } => "conversation",
            Step::Summary { .. } => "summary",
            Step::Advance { .. } => "advance",
            Step::Maintenance => "maintenance",
            Step::ClearMemory => "clear_memory",
            Step::Stats => "stats",
        }
    }
}

fn seconds(secs: i64) -> Result<Duration> {
    Duration::try_seconds(secs).with_context(|| format!("{secs} seconds is out of range"))
}

fn load_config(path: Option<&Path>) -> Result<MemoryConfig> {
    let Some(path) = path else {
        return Ok(MemoryConfig::default());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: MemoryConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    config.validate().context("Config rejected")?;
    Ok(config)
}

fn format_json(value: &JsonValue) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn run_step(stm: &ShortTermMemory, clock: &ManualClock, step: Step) -> Result<JsonValue> {
    let result = match step {
        Step::StoreContext {
            label,
            payload,
            importance,
            context,
        } => {
            stm.store_context(label, payload, importance, context)?;
            json!(true)
        }
        Step::RetrieveContext { label } => serde_json::to_value(stm.retrieve_context(&label)?)?,
        Step::CurrentContext => serde_json::to_value(stm.get_current_context()?)?,
        Step::CacheSet { key, value, ttl_secs } => {
            let ttl = ttl_secs.map(seconds).transpose()?;
            stm.cache_data(&key, value, ttl)?;
            json!(true)
        }
        Step::CacheGet { key } => stm.get_cached_data(&key)?.unwrap_or(JsonValue::Null),
        Step::WorkingStore {
            key,
            payload,
            ttl_secs,
            priority,
        } => {
            let ttl = ttl_secs.map(seconds).transpose()?;
            stm.working_memory().store(key, payload, ttl, priority);
            json!(true)
        }
        Step::WorkingRetrieve { key } => stm
            .working_memory()
            .retrieve(&key)
            .unwrap_or(JsonValue::Null),
        Step::WorkingSearch { pattern } => json!(stm.working_memory().search_by_pattern(&pattern)),
        Step::BufferCreate { name, capacity } => json!(stm.buffers().create_buffer(name, capacity)),
        Step::BufferPush {
            name,
            payload,
            type_tag,
        } => json!(stm.buffers().push(&name, payload, type_tag)),
        Step::BufferPop { name } => stm.buffers().pop(&name).unwrap_or(JsonValue::Null),
        Step::BufferAll { name } => json!(stm.buffers().all(&name)),
        Step::Score { text, metadata } => {
            serde_json::to_value(stm.attention().score_breakdown(&text, metadata.as_ref()))?
        }
        Step::Focus {
            entity,
            score,
            context,
        } => {
            let stored = stm.set_attention_focus(&entity, score, context.as_deref())?;
            json!(stored)
        }
        Step::TopFocus { n } => json!(stm.attention().top_focus(n)),
        Step::Message {
            user,
            content,
            role,
        } => {
            stm.conversations().add_message(&user, content, role, None);
            json!(true)
        }
        Step::Conversation { user, max_messages } => {
            serde_json::to_value(stm.conversations().get_context(&user, max_messages))?
        }
        Step::Summary { user } => serde_json::to_value(stm.conversations().get_summary(&user))?,
        Step::Advance { secs } => {
            clock.advance(seconds(secs)?);
            json!(clock.now().to_rfc3339())
        }
        Step::Maintenance => serde_json::to_value(stm.run_maintenance()?)?,
        Step::ClearMemory => {
            stm.clear_memory()?;
            json!(true)
        }
        Step::Stats => serde_json::to_value(stm.get_memory_stats()?)?,
    };
    Ok(result)
}

fn replay(file: &Path, config: Option<&Path>, as_json: bool) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read script {}", file.display()))?;
    let steps: Vec<Step> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid script {}", file.display()))?;

    let config = MemoryConfig {
        background_sweeps: false,
        ..load_config(config)?
    };
    let clock = Arc::new(ManualClock::new());
    let stm = ShortTermMemory::with_clock(config, clock.clone())
        .context("Failed to build short-term memory")?;
    stm.initialize();

    let mut results = Vec::with_capacity(steps.len());
    for (index, step) in steps.into_iter().enumerate() {
        let name = step.name();
        let result = run_step(&stm, &clock, step)
            .with_context(|| format!("Step {index} ({name}) failed"))?;

        if !as_json {
            println!(
                "{} {} {}",
                format!("[{index}]").bright_black(),
                name.cyan().bold(),
                result.to_string().bright_white()
            );
        }
        results.push(json!({ "op": name, "result": result }));
    }

    let stats = serde_json::to_value(stm.get_memory_stats()?)?;
    stm.shutdown();

    if as_json {
        println!(
            "{}",
            format_json(&json!({ "results": results, "stats": stats }))
        );
    } else {
        println!();
        println!("{}", "Final stats:".bold());
        println!("{}", format_json(&stats));
    }
    Ok(())
}

fn score(
    text: &str,
    priority: Option<String>,
    source: Option<String>,
    as_json: bool,
) -> Result<()> {
    let mut metadata = Metadata::new();
    if let Some(priority) = priority {
        metadata.insert("priority".to_string(), JsonValue::String(priority));
    }
    if let Some(source) = source {
        metadata.insert("source".to_string(), JsonValue::String(source));
    }
    let metadata = (!metadata.is_empty()).then_some(metadata);

    let breakdown = score_text(text, metadata.as_ref());

    if as_json {
        println!("{}", format_json(&serde_json::to_value(&breakdown)?));
        return Ok(());
    }

    let label = if breakdown.score >= MemoryConfig::default().attention.threshold {
        format!("{:.3}", breakdown.score).green().bold()
    } else {
        format!("{:.3}", breakdown.score).yellow().bold()
    };
    println!("{} {}", "Attention:".bold(), label);
    println!();
    for factor in &breakdown.factors {
        let value = serde_json::to_value(factor)?;
        let name = value["factor"].as_str().unwrap_or("factor").to_string();
        println!("  {:<10} {:+.3}", name.cyan(), factor.value());
    }
    if !breakdown.categories.is_empty() {
        let categories: Vec<String> = breakdown.categories.iter().map(|c| c.to_string()).collect();
        println!();
        println!("  {} {}", "Keywords:".bright_black(), categories.join(", "));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Score {
            text,
            priority,
            source,
            json,
        } => score(&text, priority, source, json),
        Commands::Replay { file, config, json } => replay(&file, config.as_deref(), json),
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", format_json(&serde_json::to_value(&config)?));
            Ok(())
        }
    }
}
