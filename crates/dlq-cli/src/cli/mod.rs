//! CLI for the DLQ download queue.

mod commands;
mod control_socket;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use dlq_core::config;
use dlq_core::control::ControlCommand;
use dlq_core::DownloadId;

use commands::{run_completions, run_control, run_fetch, run_man, FetchOptions};

/// Top-level CLI for the DLQ download queue.
#[derive(Debug, Parser)]
#[command(name = "dlq")]
#[command(about = "DLQ: resumable download queue with a concurrency limit", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs; ids are assigned 1..n in argument order.
    Fetch {
        /// Direct HTTP/HTTPS URLs.
        #[arg(required = true)]
        urls: Vec<String>,
        /// Directory for finished files (default: current directory).
        #[arg(long, value_name = "DIR")]
        dest_dir: Option<PathBuf>,
        /// Run at most N transfers at once (default from config).
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
        /// Print events as JSON lines instead of progress text.
        #[arg(long)]
        json: bool,
    },

    /// Pause a download in the running `fetch`, keeping resume data.
    Pause { id: String },

    /// Resume a paused or stopped download.
    Resume { id: String },

    /// Stop a download; it can still be resumed later.
    Cancel { id: String },

    /// Forget a download and discard its partial data.
    Remove { id: String },

    /// Change the concurrency limit of the running `fetch`.
    Limit { n: usize },

    /// Show every download of the running `fetch`.
    Status,

    /// Print a shell completion script.
    Completions { shell: Shell },

    /// Print the man page.
    Man,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<ExitCode> {
        let cli = Cli::parse();
        cli.command.run().await
    }

    async fn run(self) -> Result<ExitCode> {
        let control = match self {
            CliCommand::Fetch {
                urls,
                dest_dir,
                limit,
                json,
            } => {
                let cfg = config::load_or_init()?;
                tracing::debug!("loaded config: {:?}", cfg);
                let dest_dir = match dest_dir {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                let opts = FetchOptions {
                    dest_dir,
                    limit,
                    json,
                };
                return run_fetch(&cfg, &urls, &opts).await;
            }
            CliCommand::Completions { shell } => {
                run_completions(shell);
                return Ok(ExitCode::SUCCESS);
            }
            CliCommand::Man => {
                run_man()?;
                return Ok(ExitCode::SUCCESS);
            }
            CliCommand::Pause { id } => ControlCommand::Pause(DownloadId::new(id)),
            CliCommand::Resume { id } => ControlCommand::Resume(DownloadId::new(id)),
            CliCommand::Cancel { id } => ControlCommand::Cancel(DownloadId::new(id)),
            CliCommand::Remove { id } => ControlCommand::Remove(DownloadId::new(id)),
            CliCommand::Limit { n } => ControlCommand::Limit(n),
            CliCommand::Status => ControlCommand::Status,
        };
        run_control(&control).await?;
        Ok(ExitCode::SUCCESS)
    }
}

#[cfg(test)]
mod tests;
