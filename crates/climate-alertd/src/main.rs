//! climate-alertd - Climate Alert Daemon
//!
//! Reads JSON-lines measurements from a file or stdin, evaluates them
//! against the configured rules and writes every fired alert to stdout as
//! one JSON object per line.

mod config;
mod ingest;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use climate_alerts::{AlertEngine, RuleDraft};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::DaemonConfig;
use crate::ingest::{IngestStats, RetryPolicy, ingest_and_forward};

#[derive(Parser)]
#[command(name = "climate-alertd")]
#[command(about = "Climate Alert Daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a measurement stream and print fired alerts
    Run {
        /// Path to config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// JSON file with an array of rules to load before ingesting
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// JSON-lines measurement file (defaults to stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Validate a rules file without evaluating anything
    CheckRules {
        /// JSON file with an array of rules
        #[arg(short, long)]
        rules: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/climate-alertd/config.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the alert feed, so logs go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("climate_alerts=info".parse()?)
                .add_directive("climate_alertd=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            rules,
            input,
        } => {
            run(config, rules, input).await?;
        }

        Commands::CheckRules { rules } => {
            check_rules(&rules)?;
        }

        Commands::InitConfig { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

async fn run(
    config_path: Option<PathBuf>,
    rules_path: Option<PathBuf>,
    input: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = match &config_path {
        Some(path) => {
            info!(config = %path.display(), "loading config");
            DaemonConfig::load(path)?
        }
        None => DaemonConfig::default(),
    };

    let engine = Arc::new(AlertEngine::new(config.engine.clone())?);
    if let Some(path) = &rules_path {
        let loaded = load_rules(&engine, path)?;
        info!(rules = loaded, file = %path.display(), "loaded rules");
    }

    let summary = engine.rule_summary();
    info!(
        total = summary.total,
        active = summary.active,
        alerts = engine.alert_summary().total,
        "engine ready"
    );

    let policy = RetryPolicy::new(
        config.ingest_retries,
        Duration::from_millis(config.retry_backoff_ms),
    );
    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open input '{}'", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let feed = engine.subscribe(None)?;
    let stats = tokio::select! {
        stats = ingest_and_forward(&engine, feed, reader, policy, tokio::io::stdout()) => Some(stats?),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, stopping ingestion");
            None
        }
    };

    if let Some(stats) = stats {
        log_stats(&stats);
    }

    Ok(())
}

fn log_stats(stats: &IngestStats) {
    info!(
        lines = stats.lines,
        measurements = stats.measurements,
        invalid = stats.invalid,
        fired = stats.fired,
        suppressed = stats.suppressed,
        failed = stats.failed,
        "ingestion finished"
    );
}

fn read_drafts(path: &Path) -> anyhow::Result<Vec<RuleDraft>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file '{}'", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("invalid rules file '{}'", path.display()))
}

fn load_rules(engine: &AlertEngine, path: &Path) -> anyhow::Result<usize> {
    let drafts = read_drafts(path)?;
    let count = drafts.len();
    for (i, draft) in drafts.into_iter().enumerate() {
        let name = draft.name.clone();
        engine
            .create_rule(draft, "climate-alertd")
            .with_context(|| format!("rule #{i} ('{name}') rejected"))?;
    }
    Ok(count)
}

fn check_rules(path: &Path) -> anyhow::Result<()> {
    let drafts = read_drafts(path)?;
    let engine = AlertEngine::in_memory();

    let mut rejected = 0;
    for (i, draft) in drafts.iter().enumerate() {
        match engine.create_rule(draft.clone(), "climate-alertd") {
            Ok(rule) => {
                println!("ok      #{i} {} ({}, priority {})", rule.name, rule.scope, rule.priority);
            }
            Err(e) => {
                rejected += 1;
                println!("invalid #{i} {}: {e}", draft.name);
            }
        }
    }

    println!();
    println!("{} rules checked, {rejected} rejected", drafts.len());
    if rejected > 0 {
        anyhow::bail!("{rejected} invalid rules in '{}'", path.display());
    }
    Ok(())
}

fn init_config(output: &Path) -> anyhow::Result<()> {
    let config = DaemonConfig::default();
    config.save(output)?;

    println!("Config written to: {}", output.display());
    println!();
    println!("Edit the file to enable durable storage:");
    println!("  engine.alert_log_path      JSON-lines alert log");
    println!("  engine.rule_snapshot_path  rule snapshot");
    println!();
    println!("Then run: climate-alertd run --config {}", output.display());

    Ok(())
}
