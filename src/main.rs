//! eventreplay - Binary Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Mirror the spool queue into the archive
//! eventreplay consume --stream-type queue --queue-name eventreplay --source-name sqs
//!
//! # Consume every shard of a stream, resuming from saved checkpoints
//! eventreplay consume --stream-type shard --stream-name test-1 --checkpoint-file data/checkpoints.json
//!
//! # Republish an archived time window
//! eventreplay replay --start 2024/10/15/17/00 --end 2024/10/15/19/30 --queue fake-service --source-name sqs
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use event_replay::{app, Action, AppConfig, ReplayOutcome, StopSignal, StreamKind, TimeRange};

/// Consume, archive and replay event streams
#[derive(Parser, Debug)]
#[command(name = "eventreplay")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); LOG_LEVEL overrides it
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume a queue or stream, archiving every event
    Consume(ConsumeArgs),

    /// Republish archived events from a time range
    Replay(ReplayArgs),
}

impl Command {
    fn action(&self) -> Action {
        match self {
            Command::Consume(_) => Action::Consume,
            Command::Replay(_) => Action::Replay,
        }
    }
}

#[derive(Args, Debug)]
struct ConsumeArgs {
    /// queue (sqs) or shard (kinesis)
    #[arg(long, default_value = "queue")]
    stream_type: StreamKind,

    #[arg(long)]
    queue_name: Option<String>,

    #[arg(long)]
    stream_name: Option<String>,

    /// Directory backing the local queue
    #[arg(long)]
    spool_dir: Option<PathBuf>,

    /// Directory backing the local shard log
    #[arg(long)]
    shard_dir: Option<PathBuf>,

    /// Directory backing the archive object store
    #[arg(long)]
    archive_dir: Option<PathBuf>,

    #[arg(long)]
    bucket: Option<String>,

    /// First archive key segment (defaults to the queue or stream name)
    #[arg(long)]
    source_name: Option<String>,

    /// Consume without archiving
    #[arg(long)]
    no_archive: bool,

    /// Delete queue messages once delivered
    #[arg(long)]
    delete_messages: bool,

    /// Persist shard checkpoints to this JSON file
    #[arg(long)]
    checkpoint_file: Option<PathBuf>,
}

impl ConsumeArgs {
    fn apply(self, config: &mut AppConfig) -> StreamKind {
        if let Some(name) = self.queue_name {
            config.queue.queue_name = name;
        }
        if let Some(name) = self.stream_name {
            config.shard.stream_name = name;
        }
        if let Some(dir) = self.spool_dir {
            config.local.spool_dir = dir;
        }
        if let Some(dir) = self.shard_dir {
            config.local.stream_dir = dir;
        }
        if let Some(dir) = self.archive_dir {
            config.local.archive_dir = dir;
        }
        if let Some(bucket) = self.bucket {
            config.archive.bucket = bucket;
        }
        if self.source_name.is_some() {
            config.archive.source_name = self.source_name;
        }
        if self.no_archive {
            config.archive.enabled = false;
        }
        if self.delete_messages {
            config.queue.ack.delete_messages = true;
        }
        if self.checkpoint_file.is_some() {
            config.checkpoint.path = self.checkpoint_file;
        }
        self.stream_type
    }
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Range start, YYYY/MM/DD/HH/MM (UTC)
    #[arg(long)]
    start: String,

    /// Range end, YYYY/MM/DD/HH/MM (UTC), inclusive
    #[arg(long)]
    end: String,

    #[arg(long)]
    bucket: Option<String>,

    /// Destination queue
    #[arg(long)]
    queue: Option<String>,

    /// Archive key segment the events were written under
    #[arg(long)]
    source_name: Option<String>,

    #[arg(long)]
    archive_dir: Option<PathBuf>,

    #[arg(long)]
    spool_dir: Option<PathBuf>,

    /// Count matching messages without publishing
    #[arg(long)]
    dry_run: bool,
}

impl ReplayArgs {
    fn apply(self, config: &mut AppConfig) -> (String, String) {
        if let Some(bucket) = self.bucket {
            config.replay.bucket = bucket;
        }
        if let Some(queue) = self.queue {
            config.replay.destination_queue = queue;
        }
        if self.source_name.is_some() {
            config.replay.source_name = self.source_name;
        }
        if let Some(dir) = self.archive_dir {
            config.local.archive_dir = dir;
        }
        if let Some(dir) = self.spool_dir {
            config.local.spool_dir = dir;
        }
        if self.dry_run {
            config.replay.dry_run = true;
        }
        (self.start, self.end)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };

    let action = cli.command.action();
    tracing::info!(%action, version = event_replay::VERSION, "starting {}", event_replay::NAME);

    match cli.command {
        Command::Consume(args) => {
            let kind = args.apply(&mut config);
            consume(kind, &config)
        }
        Command::Replay(args) => {
            let (start, end) = args.apply(&mut config);
            replay(&start, &end, &config)
        }
    }
}

fn consume(kind: StreamKind, config: &AppConfig) -> Result<()> {
    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        handler_stop.stop();
    })
    .context("failed to install signal handler")?;

    tracing::info!(stream_type = %kind, "Starting {} consumer", kind);
    let stats = app::consume(kind, config, stop, |event| {
        tracing::info!(message_id = %event.id, "msg received");
    })?;

    tracing::info!(
        events = stats.events,
        archived = stats.archived,
        archive_failures = stats.archive_failures,
        acknowledged = stats.acknowledged,
        ack_failures = stats.ack_failures,
        transient_errors = stats.transient_errors,
        "consumer finished"
    );
    Ok(())
}

fn replay(start: &str, end: &str, config: &AppConfig) -> Result<()> {
    let range = TimeRange::parse(start, end)?;
    match app::replay(config, &range)? {
        ReplayOutcome::NoMessagesFound => println!("No messages found"),
        outcome => println!("{}", outcome),
    }
    Ok(())
}

/// Initialize the tracing subscriber; LOG_LEVEL wins over the flag
fn init_logging(flag_level: &str) -> Result<()> {
    let level = std::env::var("LOG_LEVEL")
        .map(|l| l.to_lowercase())
        .unwrap_or_else(|_| flag_level.to_string());

    let filter = EnvFilter::try_new(&level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
