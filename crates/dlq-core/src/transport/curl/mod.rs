//! libcurl transport: one OS thread and one `Easy` handle per transfer.
//!
//! Bodies stream into `<temp_dir>/<transfer-id>-<filename>.part`. Cancel
//! flips an abort flag that curl's progress callback checks, so
//! `request_cancel` returns immediately; the thread then winds down and
//! reports a (retired) completion. A resumed transfer truncates the partial
//! file to the token offset and asks for `Range: bytes=<offset>-`; a `200`
//! reply means the server ignored the range and the file restarts from zero.

mod headers;
mod token;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use ::curl::easy::{Easy, List};
use anyhow::{Context, Result};
use tokio::sync::mpsc;
use url::Url;

use crate::config::{DlqConfig, TransportConfig};
use crate::error::TransportError;
use crate::naming::derive_filename;
use crate::placement::TEMP_SUFFIX;
use crate::transport::{
    ContinuationToken, TransferFailure, TransferHandle, TransferId, TransferRef, Transport,
    TransportEvent,
};

use self::headers::{follow_location, ResponseHeaders};
use self::token::ResumeToken;

/// [`Transport`] backed by libcurl easy handles on worker threads.
pub struct CurlTransport {
    shared: Arc<Shared>,
}

struct Shared {
    temp_dir: PathBuf,
    options: TransportConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    next_id: AtomicU64,
    running: Mutex<HashMap<TransferId, Arc<TransferControl>>>,
}

impl Shared {
    fn running(&self) -> MutexGuard<'_, HashMap<TransferId, Arc<TransferControl>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
struct ResponseMeta {
    etag: Option<String>,
    total: Option<u64>,
    current_address: Option<String>,
}

/// State shared between a transfer thread and `request_cancel`.
struct TransferControl {
    address: String,
    temp_path: PathBuf,
    abort: AtomicBool,
    keep_partial: AtomicBool,
    /// Artifact bytes written to `temp_path`.
    on_disk: AtomicU64,
    /// Server advertised or honored byte ranges.
    ranges: AtomicBool,
    meta: Mutex<ResponseMeta>,
}

impl TransferControl {
    fn meta(&self) -> MutexGuard<'_, ResponseMeta> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token for the bytes on disk, if the server lets us continue from them.
    fn resume_token(&self) -> Option<ContinuationToken> {
        let offset = self.on_disk.load(Ordering::Acquire);
        if offset == 0 || !self.ranges.load(Ordering::Acquire) {
            return None;
        }
        let meta = self.meta();
        ResumeToken::new(
            &self.address,
            &self.temp_path,
            offset,
            meta.etag.clone(),
            meta.total,
        )
        .encode()
    }
}

impl CurlTransport {
    /// Transport writing partial files under `temp_dir`. Events arrive on the
    /// returned receiver; feed it to [`crate::scheduler::Scheduler::run_events`].
    pub fn new(
        temp_dir: impl Into<PathBuf>,
        options: TransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            temp_dir: temp_dir.into(),
            options,
            events,
            next_id: AtomicU64::new(1),
            running: Mutex::new(HashMap::new()),
        });
        (Self { shared }, rx)
    }

    pub fn from_config(cfg: &DlqConfig) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let temp_dir = cfg
            .resolved_temp_dir()
            .context("preparing partial download directory")?;
        Ok(Self::new(temp_dir, cfg.transport.clone()))
    }

    pub fn temp_dir(&self) -> &Path {
        &self.shared.temp_dir
    }

    /// Number of transfer threads still running.
    pub fn running_count(&self) -> usize {
        self.shared.running().len()
    }

    /// Signals every running transfer to stop, keeping partial files.
    pub fn abort_all(&self) {
        for control in self.shared.running().values() {
            control.keep_partial.store(true, Ordering::Release);
            control.abort.store(true, Ordering::Release);
        }
    }

    fn spawn(&self, address: &str, resume: Option<ResumeToken>) -> Result<TransferHandle, TransportError> {
        Url::parse(address).map_err(|e| TransportError::InvalidAddress(format!("{}: {}", address, e)))?;
        if self.shared.events.is_closed() {
            return Err(TransportError::Rejected("event receiver is gone".into()));
        }

        let id = TransferId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let (temp_path, offset, if_range, known_total) = match resume {
            Some(token) => (token.temp_path, token.offset, token.etag, token.total),
            None => {
                let name = format!("{}-{}{}", id.0, derive_filename(address), TEMP_SUFFIX);
                (self.shared.temp_dir.join(name), 0, None, None)
            }
        };

        let control = Arc::new(TransferControl {
            address: address.to_string(),
            temp_path,
            abort: AtomicBool::new(false),
            keep_partial: AtomicBool::new(false),
            on_disk: AtomicU64::new(offset),
            ranges: AtomicBool::new(offset > 0),
            meta: Mutex::new(ResponseMeta {
                etag: if_range.clone(),
                total: known_total,
                current_address: None,
            }),
        });
        self.shared.running().insert(id, Arc::clone(&control));

        let job = TransferJob {
            shared: Arc::clone(&self.shared),
            control,
            id,
            start_offset: offset,
            if_range,
            known_total,
        };
        let spawned = thread::Builder::new()
            .name(format!("dlq-transfer-{}", id.0))
            .spawn(move || job.run());
        if let Err(e) = spawned {
            self.shared.running().remove(&id);
            return Err(TransportError::Io(e));
        }

        tracing::debug!(transfer = %id, address, offset, "transfer started");
        Ok(TransferHandle {
            id,
            address: address.to_string(),
        })
    }
}

impl Transport for CurlTransport {
    fn start_fresh(&self, address: &str) -> Result<TransferHandle, TransportError> {
        self.spawn(address, None)
    }

    fn start_from_token(
        &self,
        address: &str,
        token: &ContinuationToken,
    ) -> Result<TransferHandle, TransportError> {
        let resume = ResumeToken::decode_for(token, address)?;
        self.spawn(address, Some(resume))
    }

    fn request_cancel(&self, handle: &TransferHandle, want_token: bool) -> Option<ContinuationToken> {
        let control = self.shared.running().get(&handle.id).cloned()?;
        let token = if want_token { control.resume_token() } else { None };
        control.keep_partial.store(token.is_some(), Ordering::Release);
        control.abort.store(true, Ordering::Release);
        tracing::debug!(transfer = %handle.id, want_token, token = token.is_some(), "cancel requested");
        token
    }
}

/// Sequential writer for the partial file.
struct BodyWriter {
    file: File,
    position: u64,
    started: bool,
    expected: Option<u64>,
    error: Option<std::io::Error>,
}

impl BodyWriter {
    fn restart(&mut self) -> std::io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.position = 0;
        Ok(())
    }
}

struct TransferJob {
    shared: Arc<Shared>,
    control: Arc<TransferControl>,
    id: TransferId,
    start_offset: u64,
    if_range: Option<String>,
    known_total: Option<u64>,
}

impl TransferJob {
    fn run(self) {
        let result = self.perform();
        self.shared.running().remove(&self.id);
        let transfer = self.transfer_ref();

        match result {
            Ok(()) => {
                tracing::info!(transfer = %self.id, bytes = self.control.on_disk.load(Ordering::Acquire), "transfer finished");
                self.emit(TransportEvent::ArtifactReady {
                    transfer: transfer.clone(),
                    temp_location: self.control.temp_path.clone(),
                });
                self.emit(TransportEvent::Completed {
                    transfer,
                    outcome: Ok(()),
                });
            }
            Err(err) => {
                let aborted = self.control.abort.load(Ordering::Acquire);
                let continuation = if aborted {
                    // request_cancel already handed out the token, if any
                    if !self.control.keep_partial.load(Ordering::Acquire) {
                        self.discard_partial();
                    }
                    None
                } else {
                    let token = self.control.resume_token();
                    if token.is_none() {
                        self.discard_partial();
                    }
                    token
                };
                tracing::warn!(
                    transfer = %self.id,
                    aborted,
                    resumable = continuation.is_some(),
                    "transfer failed: {:#}",
                    err
                );
                self.emit(TransportEvent::Completed {
                    transfer,
                    outcome: Err(TransferFailure {
                        message: format!("{:#}", err),
                        continuation,
                    }),
                });
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        if self.shared.events.send(event).is_err() {
            tracing::debug!(transfer = %self.id, "event receiver dropped");
        }
    }

    fn transfer_ref(&self) -> TransferRef {
        let mut r = TransferRef {
            transfer: Some(self.id),
            original_address: Some(self.control.address.clone()),
            current_address: None,
        };
        if let Some(current) = self.control.meta().current_address.clone() {
            r = r.with_current_address(current);
        }
        r
    }

    fn discard_partial(&self) {
        if let Err(e) = std::fs::remove_file(&self.control.temp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.control.temp_path.display(), "could not remove partial file: {}", e);
            }
        }
    }

    fn configure(&self, easy: &mut Easy) -> Result<()> {
        let opts = &self.shared.options;
        easy.url(&self.control.address).context("invalid URL")?;
        easy.follow_location(true)?;
        easy.max_redirections(opts.max_redirections)?;
        easy.connect_timeout(opts.connect_timeout())?;
        easy.low_speed_limit(opts.low_speed_limit)?;
        easy.low_speed_time(opts.low_speed_time())?;
        easy.fail_on_error(true)?;
        easy.progress(true)?;
        if self.start_offset > 0 {
            easy.range(&format!("{}-", self.start_offset))?;
            if let Some(etag) = &self.if_range {
                let mut list = List::new();
                list.append(&format!("If-Range: {}", etag))?;
                easy.http_headers(list)?;
            }
        }
        Ok(())
    }

    /// Called once, when the first body bytes of the final response arrive.
    fn on_body_start(&self, body: &mut BodyWriter, headers: &ResponseHeaders) -> std::io::Result<()> {
        let status = headers.status.unwrap_or(0);
        if self.start_offset > 0 && status != 206 {
            tracing::info!(transfer = %self.id, status, "server ignored range request, restarting from zero");
            body.restart()?;
            self.control.on_disk.store(0, Ordering::Release);
        }
        body.expected = headers.expected_total(body.position);
        self.control
            .ranges
            .store(headers.accept_ranges || status == 206, Ordering::Release);
        {
            let mut meta = self.control.meta();
            meta.etag = headers.etag.clone();
            meta.total = body.expected;
        }
        if body.position > 0 {
            self.emit(TransportEvent::Resumed {
                transfer: self.transfer_ref(),
                offset: body.position,
                bytes_expected: body.expected,
            });
        }
        Ok(())
    }

    fn perform(&self) -> Result<()> {
        let temp_path = &self.control.temp_path;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(temp_path)
            .with_context(|| format!("opening {}", temp_path.display()))?;
        file.set_len(self.start_offset)?;
        file.seek(SeekFrom::Start(self.start_offset))?;

        let mut easy = Easy::new();
        self.configure(&mut easy)?;

        let headers = RefCell::new(ResponseHeaders::default());
        let current = RefCell::new(self.control.address.clone());
        let body = RefCell::new(BodyWriter {
            file,
            position: self.start_offset,
            started: false,
            expected: None,
            error: None,
        });

        let performed = {
            let mut transfer = easy.transfer();
            transfer.header_function(|line| {
                let mut h = headers.borrow_mut();
                h.feed(line);
                if h.is_redirect() {
                    if let Some(location) = h.location.take() {
                        let next = follow_location(&current.borrow(), &location);
                        if let Some(next) = next {
                            *current.borrow_mut() = next.clone();
                            self.control.meta().current_address = Some(next);
                        }
                    }
                }
                true
            })?;
            transfer.write_function(|data| {
                // bytes past a handed-out token must not reach the file
                if self.control.abort.load(Ordering::Acquire) {
                    return Ok(0);
                }
                let mut w = body.borrow_mut();
                if !w.started {
                    w.started = true;
                    if let Err(e) = self.on_body_start(&mut w, &headers.borrow()) {
                        w.error = Some(e);
                        return Ok(0);
                    }
                }
                if let Err(e) = w.file.write_all(data) {
                    w.error = Some(e);
                    return Ok(0); // abort transfer
                }
                w.position += data.len() as u64;
                self.control.on_disk.store(w.position, Ordering::Release);
                self.emit(TransportEvent::Progress {
                    transfer: self.transfer_ref(),
                    bytes_written: data.len() as u64,
                    total_bytes_written: w.position,
                    bytes_expected: w.expected,
                });
                Ok(data.len())
            })?;
            transfer.progress_function(|_, _, _, _| !self.control.abort.load(Ordering::Acquire))?;
            transfer.perform()
        };

        let mut body = body.into_inner();
        if let Err(e) = performed {
            if let Some(io) = body.error.take() {
                return Err(anyhow::Error::new(io).context("writing partial file"));
            }
            if e.is_aborted_by_callback() {
                anyhow::bail!("cancelled");
            }
            if e.is_http_returned_error() {
                let code = easy.response_code().unwrap_or(0);
                // a cancel raced a finished transfer and the token covers the whole artifact
                if code == 416 && self.start_offset > 0 && self.known_total == Some(self.start_offset) {
                    return Ok(());
                }
                anyhow::bail!("{} returned HTTP {}", self.control.address, code);
            }
            return Err(anyhow::Error::new(e).context("transfer failed"));
        }

        let code = easy.response_code().context("no response code")?;
        if !(200..300).contains(&code) {
            anyhow::bail!("{} returned HTTP {}", self.control.address, code);
        }
        if let Some(expected) = body.expected {
            if body.position != expected {
                anyhow::bail!("short transfer: {} of {} bytes", body.position, expected);
            }
        }
        body.file.flush().context("flushing partial file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_address_is_rejected_synchronously() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _rx) = CurlTransport::new(dir.path(), TransportConfig::default());
        let err = transport.start_fresh("not a url").unwrap_err();
        assert!(matches!(err, TransportError::InvalidAddress(_)));
        assert!(err.is_permanent());
        assert_eq!(transport.running_count(), 0);
    }

    #[test]
    fn closed_receiver_rejects_new_transfers() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, rx) = CurlTransport::new(dir.path(), TransportConfig::default());
        drop(rx);
        assert!(matches!(
            transport.start_fresh("http://127.0.0.1:9/file"),
            Err(TransportError::Rejected(_))
        ));
        assert!(!TransportError::Rejected("busy".into()).is_permanent());
    }

    #[test]
    fn foreign_token_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _rx) = CurlTransport::new(dir.path(), TransportConfig::default());
        let token = ContinuationToken::new(b"{}".to_vec());
        assert!(matches!(
            transport.start_from_token("http://127.0.0.1:9/file", &token),
            Err(TransportError::InvalidToken(_))
        ));
    }

    #[test]
    fn cancel_of_unknown_transfer_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (transport, _rx) = CurlTransport::new(dir.path(), TransportConfig::default());
        let handle = TransferHandle {
            id: TransferId(99),
            address: "http://127.0.0.1:9/file".into(),
        };
        assert!(transport.request_cancel(&handle, true).is_none());
    }
}
