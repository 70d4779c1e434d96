//! Minimal HTTP/1.1 server for curl transport tests.
//!
//! Serves one static body at any path. `GET` with `Range: bytes=N-` gets a
//! `206` when ranges are enabled. `/moved/<name>` redirects to `/<name>`,
//! `/missing` answers 404. Optionally paces the body so a test can interrupt
//! a transfer halfway.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, omit `Accept-Ranges: bytes` even if ranges work.
    pub advertise_ranges: bool,
    /// Body is written in chunks of this size...
    pub chunk_size: usize,
    /// ...with this pause between chunks.
    pub chunk_delay: Option<Duration>,
    pub etag: Option<String>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            advertise_ranges: true,
            chunk_size: 16 * 1024,
            chunk_delay: None,
            etag: Some("\"v1\"".to_string()),
        }
    }
}

/// One request as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub path: String,
    pub range_start: Option<u64>,
    pub if_range: Option<String>,
}

pub struct RangeServer {
    /// e.g. "http://127.0.0.1:12345"
    pub base: String,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl RangeServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

/// Starts the server on a background thread; it runs until the process exits.
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = opts.clone();
            let log = Arc::clone(&log);
            thread::spawn(move || handle(stream, &body, &opts, &log));
        }
    });
    RangeServer {
        base: format!("http://127.0.0.1:{}", port),
        seen,
    }
}

fn handle(mut stream: TcpStream, body: &[u8], opts: &RangeServerOptions, log: &Mutex<Vec<SeenRequest>>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let seen = parse_request(request);
    log.lock().unwrap().push(seen.clone());

    if seen.path == "/missing" {
        let _ = stream.write_all(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        return;
    }
    if let Some(target) = seen.path.strip_prefix("/moved/") {
        let response = format!(
            "HTTP/1.1 302 Found\r\nLocation: /{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            target
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    let total = body.len() as u64;
    let etag_matches = match (&seen.if_range, &opts.etag) {
        (Some(asked), Some(current)) => asked == current,
        (Some(_), None) => false,
        (None, _) => true,
    };
    let start = seen
        .range_start
        .filter(|_| opts.support_ranges && etag_matches);

    let mut head = String::new();
    let slice = match start {
        Some(start) if start >= total => {
            let response = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                total
            );
            let _ = stream.write_all(response.as_bytes());
            return;
        }
        Some(start) => {
            head.push_str("HTTP/1.1 206 Partial Content\r\n");
            head.push_str(&format!("Content-Range: bytes {}-{}/{}\r\n", start, total - 1, total));
            &body[start as usize..]
        }
        None => {
            head.push_str("HTTP/1.1 200 OK\r\n");
            body
        }
    };
    head.push_str(&format!("Content-Length: {}\r\n", slice.len()));
    if opts.advertise_ranges && opts.support_ranges {
        head.push_str("Accept-Ranges: bytes\r\n");
    }
    if let Some(etag) = &opts.etag {
        head.push_str(&format!("ETag: {}\r\n", etag));
    }
    head.push_str("Connection: close\r\n\r\n");
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }
    for chunk in slice.chunks(opts.chunk_size.max(1)) {
        if stream.write_all(chunk).is_err() {
            return;
        }
        if let Some(delay) = opts.chunk_delay {
            thread::sleep(delay);
        }
    }
}

fn parse_request(request: &str) -> SeenRequest {
    let mut lines = request.lines();
    let path = lines
        .next()
        .and_then(|first| first.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    let mut seen = SeenRequest {
        path,
        range_start: None,
        if_range: None,
    };
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("range") {
            seen.range_start = value
                .strip_prefix("bytes=")
                .and_then(|spec| spec.split_once('-'))
                .and_then(|(start, _)| start.trim().parse().ok());
        } else if name.trim().eq_ignore_ascii_case("if-range") {
            seen.if_range = Some(value.to_string());
        }
    }
    seen
}
