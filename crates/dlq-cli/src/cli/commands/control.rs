//! `dlq pause|resume|cancel|remove <id>`, `dlq limit <n>`, `dlq status`:
//! forwarded to the running `dlq fetch` over its control socket.

use anyhow::{bail, Result};
use dlq_core::control::{default_control_socket_path, ControlCommand};

use crate::cli::control_socket;

pub async fn run_control(command: &ControlCommand) -> Result<()> {
    let path = default_control_socket_path()?;
    if !path.exists() {
        bail!("no running `dlq fetch` (control socket {} not found)", path.display());
    }
    let reply = control_socket::send_command(&path, command).await?;
    let reply = reply.trim_end();
    if let Some(message) = reply.strip_prefix("error: ") {
        bail!("{}", message);
    }
    match command {
        ControlCommand::Status if reply.is_empty() => println!("No downloads."),
        ControlCommand::Status => println!("{}", reply),
        _ => println!("{}: {}", command, reply),
    }
    Ok(())
}
