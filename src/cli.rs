//! CLI definitions for courier.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Courier CLI.
#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Durable in-process message queue engine")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "courier.toml", global = true, env = "COURIER_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the queue engine in foreground (default)
    Run,

    /// Show queue depths and dead letters from the durable store
    Inspect {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Move a dead letter back into its original queue
    Replay {
        /// Dead letter ID
        id: String,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Check the configuration and report errors and warnings
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::parse_from(["courier"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("courier.toml"));
    }

    #[test]
    fn test_parses_replay_with_config() {
        let cli = Cli::parse_from(["courier", "--config", "/etc/courier.toml", "replay", "dlq-1"]);
        assert_eq!(cli.config, PathBuf::from("/etc/courier.toml"));
        match cli.command {
            Some(Commands::Replay { id }) => assert_eq!(id, "dlq-1"),
            _ => panic!("expected replay"),
        }
    }

    #[test]
    fn test_parses_inspect_json_and_config_validate() {
        let cli = Cli::parse_from(["courier", "inspect", "--json"]);
        assert!(matches!(cli.command, Some(Commands::Inspect { json: true })));

        let cli = Cli::parse_from(["courier", "config", "validate"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Validate
            })
        ));
    }
}
