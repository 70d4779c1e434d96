//! Line-based control protocol for a running queue.
//!
//! A client (e.g. `dlq pause 3` via the control socket) sends one command per
//! line: `pause <id>`, `resume <id>`, `cancel <id>`, `remove <id>`,
//! `limit <n>` or `status`. [`ControlCommand::apply`] runs it against a
//! [`Scheduler`] and produces the reply text.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::record::{DownloadId, RecordSnapshot};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Pause(DownloadId),
    Resume(DownloadId),
    Cancel(DownloadId),
    Remove(DownloadId),
    Limit(usize),
    Status,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{0} needs an argument")]
    MissingArgument(&'static str),
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    #[error("unexpected argument: {0}")]
    Trailing(String),
}

impl FromStr for ControlCommand {
    type Err = ControlParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or(ControlParseError::Empty)?;
        let command = match verb {
            "status" => ControlCommand::Status,
            "limit" => {
                let n = words.next().ok_or(ControlParseError::MissingArgument("limit"))?;
                let n = n
                    .parse()
                    .map_err(|_| ControlParseError::InvalidLimit(n.to_string()))?;
                ControlCommand::Limit(n)
            }
            "pause" => ControlCommand::Pause(id_arg(&mut words, "pause")?),
            "resume" => ControlCommand::Resume(id_arg(&mut words, "resume")?),
            "cancel" => ControlCommand::Cancel(id_arg(&mut words, "cancel")?),
            "remove" => ControlCommand::Remove(id_arg(&mut words, "remove")?),
            other => return Err(ControlParseError::Unknown(other.to_string())),
        };
        if let Some(extra) = words.next() {
            return Err(ControlParseError::Trailing(extra.to_string()));
        }
        Ok(command)
    }
}

fn id_arg<'a>(
    words: &mut impl Iterator<Item = &'a str>,
    verb: &'static str,
) -> Result<DownloadId, ControlParseError> {
    words
        .next()
        .map(DownloadId::new)
        .ok_or(ControlParseError::MissingArgument(verb))
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::Pause(id) => write!(f, "pause {}", id),
            ControlCommand::Resume(id) => write!(f, "resume {}", id),
            ControlCommand::Cancel(id) => write!(f, "cancel {}", id),
            ControlCommand::Remove(id) => write!(f, "remove {}", id),
            ControlCommand::Limit(n) => write!(f, "limit {}", n),
            ControlCommand::Status => f.write_str("status"),
        }
    }
}

impl ControlCommand {
    /// Runs the command and returns the reply: `ok`, `error: <message>`, or
    /// one status line per record.
    pub fn apply(&self, scheduler: &Scheduler) -> String {
        let done = |changed: bool, id: &DownloadId, what: &str| {
            if changed {
                "ok".to_string()
            } else if scheduler.queue_of(id).is_none() {
                format!("error: unknown download {}", id)
            } else {
                format!("error: download {} cannot be {}", id, what)
            }
        };
        match self {
            ControlCommand::Pause(id) => done(scheduler.pause(id), id, "paused"),
            ControlCommand::Cancel(id) => done(scheduler.cancel(id), id, "cancelled"),
            ControlCommand::Resume(id) => done(scheduler.resume(id), id, "resumed"),
            ControlCommand::Remove(id) => match scheduler.remove(id) {
                Some(_) => "ok".to_string(),
                None => format!("error: unknown download {}", id),
            },
            ControlCommand::Limit(n) => {
                scheduler.set_concurrency_limit(*n);
                "ok".to_string()
            }
            ControlCommand::Status => {
                let lines: Vec<String> = scheduler.snapshots().iter().map(status_line).collect();
                lines.join("\n")
            }
        }
    }
}

/// `<id> <state> <received>/<expected|?> <percent>% <url>[ (<error>)]`
pub fn status_line(snap: &RecordSnapshot) -> String {
    let expected = snap
        .progress
        .bytes_expected
        .map(|n| n.to_string())
        .unwrap_or_else(|| "?".to_string());
    let mut line = format!(
        "{} {} {}/{} {:.1}% {}",
        snap.id,
        snap.state,
        snap.progress.bytes_received,
        expected,
        snap.fraction() * 100.0,
        snap.remote_location
    );
    if let Some(err) = &snap.last_error {
        line.push_str(&format!(" ({})", err));
    }
    line
}

/// Default path for the control socket, in the XDG state dir next to `dlq.log`.
pub fn default_control_socket_path() -> anyhow::Result<PathBuf> {
    Ok(crate::logging::state_dir()?.join("control.sock"))
}
