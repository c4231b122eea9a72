//! Liquid Monitor CLI
//!
//! One-shot access to the monitoring engine: sample the host, list
//! containers and services, and manage the alerts and traffic totals kept
//! in the monitor's data file.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{alerts, entities, host, traffic};
use std::path::PathBuf;

/// Liquid Monitor CLI
#[derive(Parser)]
#[command(name = "lmon")]
#[command(author, version, about = "CLI for Liquid Monitor", long_about = None)]
pub struct Cli {
    /// Data file shared with the agent
    #[arg(long, env = "LMON_DATA_FILE", default_value = "data/monitor.json")]
    pub data_file: PathBuf,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show a host sample (CPU, RAM, disk, temperature, network)
    Host {
        /// Seconds between the baseline and the reported sample
        #[arg(long, default_value_t = 1)]
        window: u64,
    },

    /// List running containers and host services
    Entities {
        /// Reconcile traffic totals into the data file
        #[arg(long)]
        persist: bool,

        /// Skip the Docker daemon
        #[arg(long)]
        no_docker: bool,

        /// Seconds between the baseline and the reported batch
        #[arg(long, default_value_t = 1)]
        window: u64,
    },

    /// Manage stored alerts
    #[command(subcommand)]
    Alerts(AlertsCommands),

    /// Show cumulative traffic per entity
    Traffic,
}

#[derive(Subcommand)]
pub enum AlertsCommands {
    /// List recent alerts, newest first
    List {
        /// Maximum number of alerts
        #[arg(long, short, default_value_t = 50)]
        limit: usize,
    },

    /// Evaluate thresholds against a fresh sample and store fired alerts
    Check {
        /// Skip the Docker daemon
        #[arg(long)]
        no_docker: bool,
    },

    /// Mark every alert as read
    Read,

    /// Delete every alert
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Host { window } => {
            host::show_host(window, cli.format).await?;
        }
        Commands::Entities {
            persist,
            no_docker,
            window,
        } => {
            entities::show_entities(&cli.data_file, persist, !no_docker, window, cli.format)
                .await?;
        }
        Commands::Alerts(alerts_cmd) => match alerts_cmd {
            AlertsCommands::List { limit } => {
                alerts::list_alerts(&cli.data_file, limit, cli.format)?;
            }
            AlertsCommands::Check { no_docker } => {
                alerts::check_alerts(&cli.data_file, !no_docker, cli.format).await?;
            }
            AlertsCommands::Read => {
                alerts::mark_read(&cli.data_file, cli.format)?;
            }
            AlertsCommands::Clear => {
                alerts::clear_alerts(&cli.data_file, cli.format)?;
            }
        },
        Commands::Traffic => {
            traffic::show_traffic(&cli.data_file, cli.format)?;
        }
    }

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
    fn test_defaults() {
        let cli = Cli::try_parse_from(["lmon", "traffic"]).unwrap();
        assert_eq!(cli.format, output::OutputFormat::Table);
        assert!(matches!(cli.command, Commands::Traffic));
    }

    #[test]
    fn test_entities_flags() {
        let cli = Cli::try_parse_from([
            "lmon",
            "--format",
            "json",
            "--data-file",
            "/tmp/monitor.json",
            "entities",
            "--persist",
            "--no-docker",
        ])
        .unwrap();

        assert_eq!(cli.format, output::OutputFormat::Json);
        assert_eq!(cli.data_file, PathBuf::from("/tmp/monitor.json"));
        match cli.command {
            Commands::Entities {
                persist,
                no_docker,
                window,
            } => {
                assert!(persist);
                assert!(no_docker);
                assert_eq!(window, 1);
            }
            _ => panic!("expected entities command"),
        }
    }

    #[test]
    fn test_alerts_list_limit() {
        let cli = Cli::try_parse_from(["lmon", "alerts", "list", "--limit", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Alerts(AlertsCommands::List { limit: 5 })
        ));

        let cli = Cli::try_parse_from(["lmon", "alerts", "list"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Alerts(AlertsCommands::List { limit: 50 })
        ));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["lmon", "nonexistent"]).is_err());
        assert!(Cli::try_parse_from(["lmon", "alerts"]).is_err());
    }
}
