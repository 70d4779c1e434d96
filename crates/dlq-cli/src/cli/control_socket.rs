//! Control socket: server (during `dlq fetch`) and client (`dlq pause`, ...).
//! Protocol: one command per line; see `dlq_core::control`.

use anyhow::{Context, Result};
use dlq_core::control::ControlCommand;
use dlq_core::Scheduler;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Binds `path` and spawns a task answering each command line with the
/// result of applying it to `scheduler`.
pub fn spawn_control_listener(
    scheduler: Arc<Scheduler>,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("binding control socket {}", path.display()))?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let scheduler = Arc::clone(&scheduler);
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, &scheduler).await {
                            tracing::debug!("control connection: {}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve(stream: UnixStream, scheduler: &Scheduler) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match line.parse::<ControlCommand>() {
            Ok(command) => {
                tracing::info!(%command, "control command");
                command.apply(scheduler)
            }
            Err(e) => format!("error: {}", e),
        };
        write.write_all(reply.as_bytes()).await?;
        write.write_all(b"\n").await?;
    }
    Ok(())
}

/// Sends one command and returns the full reply.
pub async fn send_command(socket_path: &Path, command: &ControlCommand) -> Result<String> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connecting to {}", socket_path.display()))?;
    stream
        .write_all(format!("{}\n", command).as_bytes())
        .await?;
    stream.shutdown().await?;
    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    Ok(reply)
}
