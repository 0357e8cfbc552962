//! CLI glue for cwp-backup: command parsing and wiring of the real
//! collaborators (panel client, backup script, S3, filesystem).
//!
//! All pipeline logic lives in [`crate::backup`]; this module only builds the
//! pieces from the loaded [`crate::config::Config`] and reports the outcome.
use crate::archive::CommandArchiver;
use crate::backup::{run_backups, Collaborators};
use crate::contract::RemoveDirAll;
use crate::load_config::{load_config, load_panel_config};
use crate::panel::{self, PanelClient};
use crate::upload::S3Store;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI for cwp-backup: back up panel accounts to object storage.
#[derive(Parser, Debug)]
#[clap(
    name = "cwp-backup",
    version,
    about = "Back up Control Web Panel accounts and upload the archives to S3"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up every panel account and upload the archives
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// List the usernames of all panel accounts
    Accounts {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Suspend a panel account
    Suspend {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        username: String,
    },
    /// Lift the suspension of a panel account
    Unsuspend {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        username: String,
    },
}

/// Async CLI entrypoint for main() and integration tests.
///
/// Individual account failures do not make this return an error; only
/// configuration or account enumeration failures do.
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Run { config } => {
            let config = load_config(config)?;
            config.trace_loaded();
            tracing::info!(command = "run", "Starting backup run");

            let client = PanelClient::from_config(&config.panel)?;
            let archiver = CommandArchiver::from_config(&config.archive);
            let store = S3Store::from_env().await;
            let deps = Collaborators {
                archiver: &archiver,
                store: &store,
                cleaner: &RemoveDirAll,
            };

            let report = run_backups(&config, &client, &deps)
                .await
                .context("Cannot enumerate panel accounts")?;

            for job in report.failed() {
                tracing::warn!(
                    command = "run",
                    username = %job.username,
                    status = %job.status,
                    "Account not backed up this run"
                );
            }
            tracing::info!(
                command = "run",
                total = report.jobs.len(),
                succeeded = report.succeeded().count(),
                "Backup run complete"
            );
            Ok(())
        }
        Commands::Accounts { config } => {
            let panel_config = load_panel_config(config)?;
            let client = PanelClient::from_config(&panel_config)?;
            let usernames = panel::list_accounts(&client).await?;
            for username in usernames {
                println!("{username}");
            }
            Ok(())
        }
        Commands::Suspend { config, username } => {
            let panel_config = load_panel_config(config)?;
            let client = PanelClient::from_config(&panel_config)?;
            let reply = panel::suspend_account(&client, &username).await?;
            tracing::info!(command = "suspend", username = %username, %reply, "Account suspended");
            Ok(())
        }
        Commands::Unsuspend { config, username } => {
            let panel_config = load_panel_config(config)?;
            let client = PanelClient::from_config(&panel_config)?;
            let reply = panel::unsuspend_account(&client, &username).await?;
            tracing::info!(command = "unsuspend", username = %username, %reply, "Account unsuspended");
            Ok(())
        }
    }
}
