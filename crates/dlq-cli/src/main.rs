use std::process::ExitCode;

use dlq_core::logging;

mod cli;

use crate::cli::CliCommand;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = logging::init_logging() {
        logging::init_logging_stderr();
        tracing::warn!("file logging unavailable, using stderr: {:#}", err);
    }

    match CliCommand::run_from_args().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("dlq error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
