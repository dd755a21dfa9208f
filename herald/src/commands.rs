//! Command-line interface and command implementations

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};
use herald_common::{DispatchRecord, DispatchStatus, Message, MessageId};
use herald_delivery::{
    CircuitBreakerStats, Coordinator, DedupStats, DispatchConfig, DispatchQueryService,
    QueueStats, RateLimitStats,
};
use ron::ser::PrettyConfig;
use serde::Serialize;

use crate::config::{self, ConfigSource};

/// Send notifications through a resilient dispatcher
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "Dispatch notifications through rate-limited, fault-tolerant backends", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the configuration file (RON format)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one message and wait for it to settle
    Send(SendArgs),
    /// Load and validate the configuration, then print it
    CheckConfig,
    /// Show every configured backend's advisory health
    Health,
    /// Print a snapshot of the dispatcher's breakers, rate limiter, cache and queue
    Stats,
}

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Recipient address (repeatable)
    #[arg(long, required = true)]
    pub to: Vec<String>,

    /// Sender address
    #[arg(long)]
    pub from: String,

    #[arg(long)]
    pub subject: String,

    /// Plain-text body
    #[arg(long)]
    pub body: Option<String>,

    /// HTML body
    #[arg(long)]
    pub html: Option<String>,

    /// Carbon-copy address (repeatable)
    #[arg(long)]
    pub cc: Vec<String>,

    /// Blind carbon-copy address (repeatable)
    #[arg(long)]
    pub bcc: Vec<String>,

    /// Idempotency token; identical tokens are sent once
    #[arg(long)]
    pub token: Option<String>,

    /// Submitter identity used for content-based deduplication
    #[arg(long)]
    pub submitter: Option<String>,

    /// Dispatch through the priority queue with this priority
    #[arg(long, allow_negative_numbers = true)]
    pub priority: Option<i32>,

    /// How long to wait for the message to settle
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Print the dispatcher snapshot once the message settles
    #[arg(long)]
    pub stats: bool,
}

impl SendArgs {
    /// Build and validate the message described by these arguments
    pub fn message(&self) -> anyhow::Result<Message> {
        let mut builder = Message::builder()
            .from(&self.from)
            .subject(&self.subject);

        for address in &self.to {
            builder = builder.to(address);
        }
        for address in &self.cc {
            builder = builder.cc(address);
        }
        for address in &self.bcc {
            builder = builder.bcc(address);
        }
        if let Some(body) = &self.body {
            builder = builder.text(body);
        }
        if let Some(html) = &self.html {
            builder = builder.html(html);
        }

        Ok(builder.build()?)
    }
}

fn pretty<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(ron::ser::to_string_pretty(value, PrettyConfig::default())?)
}

/// Point-in-time view of a dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchSnapshot {
    pub records: Vec<DispatchRecord>,
    pub circuits: Vec<CircuitBreakerStats>,
    pub rate_limit: RateLimitStats,
    pub dedup: DedupStats,
    pub queue: QueueStats,
}

impl DispatchSnapshot {
    #[must_use]
    pub fn capture(service: &dyn DispatchQueryService) -> Self {
        Self {
            records: service.list_statuses(None),
            circuits: service.circuit_stats(),
            rate_limit: service.rate_stats(),
            dedup: service.dedup_stats(),
            queue: service.queue_stats(),
        }
    }
}

/// Run the parsed command line
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let (config, source) = config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Send(args) => {
            let coordinator = Coordinator::from_config(config)?;
            let record = dispatch(&coordinator, &args).await?;
            println!("{}", pretty(&record)?);
            if args.stats {
                println!("{}", pretty(&DispatchSnapshot::capture(&coordinator))?);
            }

            match record.status {
                DispatchStatus::Sent => Ok(()),
                DispatchStatus::Failed => anyhow::bail!("Message {} failed", record.id),
                status => anyhow::bail!(
                    "Message {} did not settle within {}s (status: {status})",
                    record.id,
                    args.timeout_secs
                ),
            }
        }
        Command::CheckConfig => {
            println!("# Loaded from {source}");
            println!("{}", pretty(&config)?);
            Ok(())
        }
        Command::Health => {
            health(config, &source).await;
            Ok(())
        }
        Command::Stats => {
            let coordinator = Coordinator::from_config(config)?;
            println!("# Dispatcher configured from {source}");
            println!("{}", pretty(&DispatchSnapshot::capture(&coordinator))?);
            Ok(())
        }
    }
}

/// Dispatch one message and wait for its record to settle or time out
pub async fn send(config: DispatchConfig, args: &SendArgs) -> anyhow::Result<DispatchRecord> {
    let coordinator = Coordinator::from_config(config)?;
    dispatch(&coordinator, args).await
}

async fn dispatch(coordinator: &Coordinator, args: &SendArgs) -> anyhow::Result<DispatchRecord> {
    let message = args.message()?;
    let submitter = args.submitter.as_deref();

    let id: MessageId = match (args.priority, args.token.as_deref()) {
        (Some(priority), Some(token)) => {
            coordinator.enqueue_with_token(message, token, priority, submitter)?
        }
        (Some(priority), None) => coordinator.enqueue(message, priority, submitter)?,
        (None, Some(token)) => coordinator.submit_with_token(message, token, submitter)?,
        (None, None) => coordinator.submit(message, submitter)?,
    };

    if args.priority.is_some() {
        coordinator.start_drain()?;
    }

    let record = coordinator
        .wait_for_terminal(&id, Duration::from_secs(args.timeout_secs))
        .await;
    coordinator.stop_drain();

    record.ok_or_else(|| anyhow::anyhow!("Message {id} is unknown to the dispatcher"))
}

async fn health(config: DispatchConfig, source: &ConfigSource) {
    let coordinator = match Coordinator::from_config(config) {
        Ok(coordinator) => coordinator,
        Err(error) => {
            println!("Configuration from {source} is invalid: {error}");
            return;
        }
    };

    for probe in coordinator.backend_health().await {
        let state = if probe.healthy { "healthy" } else { "unhealthy" };
        println!("{:<24} {state}", probe.backend);
    }
}
