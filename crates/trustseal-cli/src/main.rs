//! TrustSeal command-line interface.
//!
//! Thin wiring around `trustseal-runtime`: every command builds the runtime
//! configuration from the environment, runs one pipeline entry point, and
//! prints the resulting report as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trustseal_runtime::monitor::MonitorSpec;
use trustseal_runtime::{
    assert_safe_remote_url, fetch_readable_text, CompletionClient, MemoryStore, MonitorScheduler,
    PipelineOptions, RuntimeConfig, VerificationCache, VerificationPipeline, WebhookAlerter,
};

#[derive(Parser)]
#[command(
    name = "trustseal",
    about = "Redundant-inference claim verification and source monitoring",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify a single claim against a source URL.
    Validate {
        /// Source document URL (fetched through the SSRF guard).
        #[arg(long)]
        url: String,

        /// The factual claim to verify.
        #[arg(long)]
        claim: String,
    },

    /// Extract claims from a source URL and verify each of them, then score
    /// the document with the quality rubric.
    Audit {
        /// Source document URL.
        #[arg(long)]
        url: String,
    },

    /// Validate a URL against the SSRF guard without fetching it.
    CheckUrl {
        /// URL or hostname to classify.
        url: String,
    },

    /// Run the monitor scheduler.
    Monitor {
        #[command(subcommand)]
        command: MonitorCommand,
    },
}

#[derive(Subcommand)]
enum MonitorCommand {
    /// Load monitors from a YAML file and tick them until interrupted.
    Serve {
        /// YAML file with a list of monitor specs.
        #[arg(long)]
        config: PathBuf,

        /// Tick period.
        #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
        tick: Duration,
    },
}

fn build_pipeline(config: &Arc<RuntimeConfig>) -> Arc<VerificationPipeline> {
    let client = Arc::new(CompletionClient::from_config(Arc::clone(config)));
    Arc::new(
        VerificationPipeline::new(client, PipelineOptions::from(config.as_ref()))
            .with_cache(VerificationCache::default()),
    )
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn validate(url: &str, claim: &str) -> anyhow::Result<()> {
    let config = Arc::new(RuntimeConfig::from_env().context("runtime configuration")?);
    let pipeline = build_pipeline(&config);

    let source = fetch_readable_text(url).await.context("fetching source")?;
    tracing::info!(url = %source.final_url, chars = source.text.len(), "source fetched");

    let report = pipeline.validate_claim(&source, claim).await?;
    print_json(&report)
}

async fn audit(url: &str) -> anyhow::Result<()> {
    let config = Arc::new(RuntimeConfig::from_env().context("runtime configuration")?);
    let pipeline = build_pipeline(&config);

    let source = fetch_readable_text(url).await.context("fetching source")?;
    tracing::info!(url = %source.final_url, chars = source.text.len(), "source fetched");

    let report = pipeline.audit_source(&source).await?;
    print_json(&report)
}

async fn check_url(url: &str) -> anyhow::Result<()> {
    match assert_safe_remote_url(url).await {
        Ok(validated) => {
            println!("ok: {validated}");
            Ok(())
        }
        Err(err) => {
            println!("blocked: {err}");
            std::process::exit(1);
        }
    }
}

async fn serve_monitors(config_path: &PathBuf, tick: Duration) -> anyhow::Result<()> {
    let config = Arc::new(RuntimeConfig::from_env().context("runtime configuration")?);
    let pipeline = build_pipeline(&config);
    let store = Arc::new(MemoryStore::new());
    let alerter = WebhookAlerter::new(config.webhook_url.clone(), config.app_url.clone());

    let scheduler = MonitorScheduler::new(
        Arc::clone(&store),
        Arc::clone(&store),
        pipeline,
        alerter,
        Arc::clone(&config),
    );

    let raw = std::fs::read_to_string(config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    let specs: Vec<MonitorSpec> = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing {}", config_path.display()))?;

    if specs.is_empty() {
        anyhow::bail!("no monitors defined in {}", config_path.display());
    }

    for spec in specs {
        let monitor = scheduler
            .create_monitor(spec)
            .await
            .context("registering monitor")?;
        tracing::info!(id = %monitor.id, name = %monitor.name, "monitor registered");
        // creation leases the monitor, so this first dispatch cannot race a tick
        scheduler.dispatch(monitor.id);
    }

    tracing::info!(period = ?tick, "scheduler running, press Ctrl-C to stop");
    scheduler.run_loop(tick).await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { url, claim } => validate(&url, &claim).await,
        Command::Audit { url } => audit(&url).await,
        Command::CheckUrl { url } => check_url(&url).await,
        Command::Monitor {
            command: MonitorCommand::Serve { config, tick },
        } => serve_monitors(&config, tick).await,
    }
}
