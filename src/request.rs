use std::io::{self, ErrorKind};
use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::method::Method;
use crate::status::StatusCode;

/// How long to wait for a straggling segment once a complete request line has arrived.
const DRAIN_GRACE: Duration = Duration::from_millis(20);

/// How long to wait for each further segment of a body shorter than its `Content-Length`.
const BODY_WAIT: Duration = Duration::from_secs(1);

const READ_CHUNK_SIZE: usize = 4096;

/// Read the raw bytes of a request.
///
/// Waits until `deadline` for the first bytes and returns None if none arrived. After that, reads
/// until nothing more is immediately available or the peer finishes sending. A body that is still
/// short of its declared `Content-Length` gets up to `BODY_WAIT` per segment.
pub fn read_request<C: Channel + ?Sized>(
    channel: &mut C,
    deadline: Instant,
) -> io::Result<Option<Vec<u8>>> {
    if !channel.wait_readable(deadline.saturating_duration_since(Instant::now()))? {
        return Ok(None);
    }

    let mut request = Vec::new();
    let mut buf = [0; READ_CHUNK_SIZE];
    loop {
        let recvd = match channel.read(&mut buf) {
            Ok(0) => break,
            Ok(recvd) => recvd,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        request.extend_from_slice(&buf[..recvd]);

        // keep waiting for the rest of a request line that was split across segments
        let wait = if !request.contains(&b'\n') {
            deadline.saturating_duration_since(Instant::now())
        } else if missing_body_len(&request) > 0 {
            BODY_WAIT
        } else {
            DRAIN_GRACE
        };
        if !channel.wait_readable(wait)? {
            break;
        }
    }
    Ok(Some(request))
}

/// Bytes of entity body still to come, going by the `Content-Length` of a complete header block.
fn missing_body_len(raw: &[u8]) -> usize {
    let blank_line = |pattern: &[u8]| {
        raw.windows(pattern.len())
            .position(|window| window == pattern)
            .map(|i| i + pattern.len())
    };
    let body_start = match (blank_line(&b"\n\n"[..]), blank_line(&b"\n\r\n"[..])) {
        (Some(a), Some(b)) => a.min(b),
        (Some(end), None) | (None, Some(end)) => end,
        (None, None) => return 0,
    };
    Request::parse(&raw[..body_start])
        .header("Content-Length")
        .and_then(|length| length.parse::<usize>().ok())
        .map(|length| length.saturating_sub(raw.len() - body_start))
        .unwrap_or(0)
}

/// A request as received: the request line, header lines, a blank line and the entity body.
#[derive(Debug)]
pub struct Request {
    lines: Vec<String>,
}

impl Request {
    /// Split raw bytes into lines on line feed, dropping a trailing carriage return from each.
    pub fn parse(raw: &[u8]) -> Self {
        let lines = String::from_utf8_lossy(raw)
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
            .collect();
        Self { lines }
    }

    pub fn request_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or("")
    }

    /// Check the request line and return the method and target it names.
    pub fn validate(&self) -> Result<(Method, &str), StatusCode> {
        let fields: Vec<&str> = self.request_line().split(' ').collect();
        let (method, target, version) = match fields.as_slice() {
            [method, target, version] => (*method, *target, *version),
            _ => return Err(StatusCode::BadRequest),
        };
        if !is_supported_version(version) {
            return Err(StatusCode::HttpVersionNotSupported);
        }
        let method = Method::from_token(method).ok_or(StatusCode::BadRequest)?;
        Ok((method, target))
    }

    /// Header lines, in order, up to the first blank line.
    pub fn header_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .skip(1)
            .map(String::as_str)
            .take_while(|line| !is_blank(line))
    }

    /// Value of the first header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_lines().find_map(|line| {
            let (field, value) = line.split_once(':')?;
            if field.trim().eq_ignore_ascii_case(name) {
                Some(value.trim())
            } else {
                None
            }
        })
    }

    /// Non-blank lines after the blank line that ends the headers, or None without such a line.
    pub fn body_lines(&self) -> impl Iterator<Item = &str> {
        let start = self
            .lines
            .iter()
            .skip(1)
            .position(|line| is_blank(line))
            .map(|blank| blank + 2)
            .unwrap_or_else(|| self.lines.len());
        self.lines[start..]
            .iter()
            .map(String::as_str)
            .filter(|line| !is_blank(line))
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Accept "HTTP/<number>" where the number is at most 1.0.
fn is_supported_version(version: &str) -> bool {
    let number = match version.strip_prefix("HTTP/") {
        Some(number) => number,
        None => return false,
    };
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return false;
    }
    number.parse::<f64>().map(|n| n <= 1.0).unwrap_or(false)
}
