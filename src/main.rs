//! Courier - durable in-process message queue engine
//!
//! Main entry point for the courier CLI.

mod cli;

use std::path::Path;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use courier_config::{ConfigStore, ConfigValidator, courier_home};
use courier_queue::{DeadLetterMessage, Message, MessageProcessor, MessageQueue, MessageType};

use cli::{Cli, Commands, ConfigAction};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Initialize tracing with console and file output.
///
/// Log files are written to ~/.courier/logs/ with daily rotation.
fn init_tracing() -> CliResult {
    let log_dir = courier_home().join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("courier")
        .filename_suffix("log")
        .max_log_files(14)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops the background writer.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> CliResult {
    init_tracing()?;

    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => run(&cli.config).await,
        Some(Commands::Inspect { json }) => inspect(&cli.config, json).await,
        Some(Commands::Replay { id }) => replay(&cli.config, &id).await,
        Some(Commands::Config { action }) => handle_config_command(&cli.config, action),
    }
}

/// Open the config file and the durable store behind it, then rebuild state.
async fn open_queue(config_path: &Path) -> Result<MessageQueue, Box<dyn std::error::Error>> {
    let config = ConfigStore::open(config_path)?;
    let queue = MessageQueue::open(config).await?;
    queue.recover().await;
    Ok(queue)
}

/// Processor for heartbeat and status traffic that only logs it.
fn logging_processor() -> MessageProcessor {
    MessageProcessor::from_fn("builtin-logger", |message: Message| async move {
        info!(
            "{} from '{}' to '{}': {}",
            message.message_type.as_str(),
            message.source,
            message.destination,
            message.payload
        );
        Ok(true)
    })
    .with_name("Built-in logger")
    .accepting([MessageType::Heartbeat, MessageType::Status])
    .with_priority(i32::MAX)
}

/// Run the engine until Ctrl-C.
async fn run(config_path: &Path) -> CliResult {
    let queue = open_queue(config_path).await?;
    queue.add_processor(logging_processor());
    queue.start()?;

    info!(
        "Courier running with {} queue(s); press Ctrl-C to stop",
        queue.queue_names().len()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    queue.stop().await?;

    let health = queue.health();
    info!("Stopped with health {:?}", health.status);
    if queue.config().monitoring.metrics_collection {
        info!("Final metrics:\n{}", queue.metrics().export_prometheus());
    }
    Ok(())
}

#[derive(Serialize)]
struct QueueSummary {
    name: String,
    depth: usize,
}

#[derive(Serialize)]
struct InspectReport {
    queues: Vec<QueueSummary>,
    dead_letters: Vec<DeadLetterMessage>,
}

/// Print the durable store contents.
async fn inspect(config_path: &Path, json: bool) -> CliResult {
    let queue = open_queue(config_path).await?;

    let report = InspectReport {
        queues: queue
            .queue_names()
            .into_iter()
            .map(|name| QueueSummary {
                depth: queue.queue_depth(&name),
                name,
            })
            .collect(),
        dead_letters: queue.dead_letter_messages(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.queues.is_empty() {
        println!("No queued messages.");
    } else {
        println!("{:<30} {:>8}", "QUEUE", "DEPTH");
        for summary in &report.queues {
            println!("{:<30} {:>8}", summary.name, summary.depth);
        }
    }

    println!();
    if report.dead_letters.is_empty() {
        println!("No dead letters.");
    } else {
        println!("{:<42} {:<20} {:>7}  REASON", "DEAD LETTER", "QUEUE", "RETRIES");
        for letter in &report.dead_letters {
            println!(
                "{:<42} {:<20} {:>7}  {}",
                letter.id, letter.queue, letter.retry_count, letter.failure_reason
            );
        }
    }
    Ok(())
}

/// Replay one dead letter and flush the result to the store.
async fn replay(config_path: &Path, id: &str) -> CliResult {
    let queue = open_queue(config_path).await?;

    if !queue.replay_dead_letter(id).await? {
        return Err(format!("No dead letter with id '{}'", id).into());
    }
    let synced = queue.sync_to_store().await;
    println!("Replayed {} ({} message records synced)", id, synced);
    Ok(())
}

fn handle_config_command(config_path: &Path, action: ConfigAction) -> CliResult {
    match action {
        ConfigAction::Show => {
            let store = ConfigStore::open(config_path)?;
            print!("{}", toml::to_string_pretty(&store.get())?);
            Ok(())
        }
        ConfigAction::Validate => validate_config(config_path),
    }
}

fn validate_config(config_path: &Path) -> CliResult {
    let config = if config_path.exists() {
        courier_config::ConfigLoader::load(config_path)?
    } else {
        warn!("{} does not exist, validating defaults", config_path.display());
        courier_config::QueueConfig::default()
    };

    let result = ConfigValidator::validate(&config);
    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }

    if result.is_valid() {
        println!("{} is valid", config_path.display());
        Ok(())
    } else {
        Err(format!("{} error(s) in {}", result.errors.len(), config_path.display()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_queue::MessageHandler;
    use serde_json::json;

    #[tokio::test]
    async fn test_logging_processor_accepts_heartbeat_and_status() {
        let processor = logging_processor();
        assert!(processor.accepts(MessageType::Heartbeat));
        assert!(processor.accepts(MessageType::Status));
        assert!(!processor.accepts(MessageType::Command));

        let beat = Message::new("agent", "monitor", MessageType::Heartbeat, json!({}));
        assert!(processor.handler.handle(&beat).await.unwrap());
    }

    #[test]
    fn test_validate_config_reports_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("courier.toml");

        std::fs::write(&path, "[performance]\nbatch_size = 0\n").unwrap();
        assert!(validate_config(&path).is_err());

        std::fs::write(&path, "[performance]\nbatch_size = 5\n").unwrap();
        assert!(validate_config(&path).is_ok());
    }
}
