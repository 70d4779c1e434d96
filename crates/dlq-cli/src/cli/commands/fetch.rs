//! `dlq fetch <URL>...` – queue URLs and run them to completion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use dlq_core::config::DlqConfig;
use dlq_core::control::{default_control_socket_path, status_line};
use dlq_core::naming;
use dlq_core::placement::Destination;
use dlq_core::sink::{ChannelSink, DownloadEvent};
use dlq_core::transport::CurlTransport;
use dlq_core::{DownloadId, DownloadRecord, DownloadState, Scheduler};

use crate::cli::control_socket;

const PROGRESS_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub dest_dir: PathBuf,
    pub limit: Option<usize>,
    pub json: bool,
}

pub async fn run_fetch(cfg: &DlqConfig, urls: &[String], opts: &FetchOptions) -> Result<ExitCode> {
    let (transport, transport_events) = CurlTransport::from_config(cfg)?;
    let transport = Arc::new(transport);
    let (sink, mut events) = ChannelSink::channel();
    let limit = opts.limit.unwrap_or(cfg.concurrency_limit);
    let scheduler = Arc::new(
        Scheduler::new(transport.clone(), limit).with_default_sink(Arc::new(sink)),
    );
    let driver = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run_events(transport_events).await })
    };

    let socket_path = default_control_socket_path().ok();
    let listener = socket_path.as_ref().and_then(|path| {
        match control_socket::spawn_control_listener(Arc::clone(&scheduler), path) {
            Ok(handle) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!("control socket unavailable: {:#}", e);
                None
            }
        }
    });

    for record in records_for(urls, &opts.dest_dir, cfg) {
        scheduler.submit(record);
    }

    let mut printer = ProgressPrinter::new(opts.json);
    let mut tick = tokio::time::interval(Duration::from_millis(PROGRESS_INTERVAL_MS));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    while scheduler.has_pending() {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => printer.print(&event),
                None => break,
            },
            _ = tick.tick() => {}
            _ = &mut ctrl_c => {
                interrupted = true;
                pause_all(&scheduler);
                break;
            }
        }
    }
    while let Ok(event) = events.try_recv() {
        printer.print(&event);
    }

    if let Some(handle) = listener {
        handle.abort();
    }
    if let Some(path) = &socket_path {
        let _ = std::fs::remove_file(path);
    }
    driver.abort();

    let snapshots = scheduler.snapshots();
    if !opts.json {
        for snap in &snapshots {
            println!("{}", status_line(snap));
        }
    }
    if interrupted {
        eprintln!("interrupted; partial data kept in {}", transport.temp_dir().display());
        return Ok(ExitCode::from(130));
    }
    let failed = snapshots
        .iter()
        .filter(|s| s.state == DownloadState::Stopped)
        .count();
    if failed > 0 {
        tracing::warn!(failed, "fetch finished with failures");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

/// One record per URL, ids `1..=n`, destination `<dest_dir>/<derived name>`.
fn records_for(urls: &[String], dest_dir: &Path, cfg: &DlqConfig) -> Vec<DownloadRecord> {
    urls.iter()
        .enumerate()
        .map(|(i, url)| {
            let dest = Destination::new(naming::destination_in(dest_dir, url)).with_options(cfg.placement);
            DownloadRecord::new((i + 1).to_string(), url.as_str()).with_destination(dest)
        })
        .collect()
}

fn pause_all(scheduler: &Scheduler) {
    let mut ids = scheduler.ids_in(DownloadState::Active);
    ids.extend(scheduler.ids_in(DownloadState::Waiting));
    for id in ids {
        scheduler.pause(&id);
    }
    tracing::info!("paused all downloads on interrupt");
}

/// Renders sink events: JSON lines, or text with progress throttled per id.
struct ProgressPrinter {
    json: bool,
    last_print: HashMap<DownloadId, Instant>,
}

impl ProgressPrinter {
    fn new(json: bool) -> Self {
        Self {
            json,
            last_print: HashMap::new(),
        }
    }

    fn print(&mut self, event: &DownloadEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("could not encode event: {}", e),
            }
            return;
        }
        match event {
            DownloadEvent::StateChanged { id, state } => println!("[{}] {}", id, state),
            DownloadEvent::Progress {
                id,
                bytes_received,
                bytes_expected,
                progress,
                bytes_per_sec,
                ..
            } => {
                let now = Instant::now();
                let due = self.last_print.get(id).map_or(true, |last| {
                    now.duration_since(*last).as_millis() as u64 >= PROGRESS_INTERVAL_MS
                });
                let finished = bytes_expected.is_some_and(|total| *bytes_received >= total);
                if !due && !finished {
                    return;
                }
                self.last_print.insert(id.clone(), now);
                let done_mib = *bytes_received as f64 / 1_048_576.0;
                let total = bytes_expected
                    .map(|t| format!("{:.1}", t as f64 / 1_048_576.0))
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "[{}] {:.1} / {} MiB ({:.1}%)  {:.2} MiB/s",
                    id,
                    done_mib,
                    total,
                    progress * 100.0,
                    bytes_per_sec / 1_048_576.0
                );
            }
            DownloadEvent::Completed { id, error: None, .. } => println!("[{}] done", id),
            DownloadEvent::Completed {
                id,
                error: Some(error),
                ..
            } => println!("[{}] failed: {}", id, error),
            DownloadEvent::Error { id, error } => println!("[{}] error: {}", id, error),
        }
    }
}
