//! GET and HEAD: serve files from the server root.

use std::convert::TryFrom;
use std::fs::{File, Metadata};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime};
use log::error;

use crate::encoding::{parse_http_date, HttpDate, UrlDecoded, UrlEncoded};
use crate::request::Request;
use crate::response::{Response, EXPIRES};
use crate::status::StatusCode;
use crate::Server;

pub const DEFAULT_INDEX_NAME: &str = "index.html";

const VISIT_COOKIE: &str = "lasttime";
const VISIT_TIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Process a GET request.
pub fn process_get(server: &Server, request: &Request, target: &str) -> Response {
    let (path, mut file, metadata, lastmod) = match open_target(server, target) {
        Ok(opened) => opened,
        Err(response) => return response,
    };

    // handle If-Modified-Since
    if let Some(since) = request
        .header("If-Modified-Since")
        .and_then(parse_http_date)
    {
        if modified_before(lastmod, since) {
            return Response::new(StatusCode::NotModified).with_header("Expires", EXPIRES);
        }
    }

    if is_index(target) {
        if let Some(last_visit) = last_visit(request) {
            let page = welcome_back_page(&last_visit).into_bytes();
            return file_reply(server, Path::new(DEFAULT_INDEX_NAME), page.len() as u64, lastmod)
                .with_body(page);
        }
    }

    let mut body = Vec::with_capacity(usize::try_from(metadata.len()).unwrap_or(0));
    if let Err(e) = file.read_to_end(&mut body) {
        error!("failed to read {}: {}", path.display(), e);
        return Response::new(StatusCode::InternalServerError);
    }
    file_reply(server, &path, body.len() as u64, lastmod).with_body(body)
}

/// Process a HEAD request: the headers of a GET, without reading the file.
pub fn process_head(server: &Server, target: &str) -> Response {
    match open_target(server, target) {
        Ok((path, _file, metadata, lastmod)) => file_reply(server, &path, metadata.len(), lastmod),
        Err(response) => response,
    }
}

/// Work out the path of the file being requested.
fn resolve(root: &Path, target: &str) -> PathBuf {
    match target.trim_start_matches('/') {
        "" => root.join(DEFAULT_INDEX_NAME),
        relative => root.join(relative),
    }
}

fn is_index(target: &str) -> bool {
    matches!(target.trim_start_matches('/'), "" | DEFAULT_INDEX_NAME)
}

/// Open the requested file, or build the error reply explaining why it can't be served.
fn open_target(
    server: &Server,
    target: &str,
) -> Result<(PathBuf, File, Metadata, SystemTime), Response> {
    let path = resolve(&server.config.root, target);
    let file = File::open(&path).map_err(|e| {
        let status = match e.kind() {
            ErrorKind::NotFound => StatusCode::NotFound,
            ErrorKind::PermissionDenied => StatusCode::Forbidden,
            _ if e.raw_os_error() == Some(libc::ENOTDIR) => StatusCode::NotFound,
            _ => {
                error!("failed to open {}: {}", path.display(), e);
                StatusCode::InternalServerError
            }
        };
        Response::new(status)
    })?;

    let metadata = file.metadata().map_err(|e| {
        error!("fstat() failed on {}: {}", path.display(), e);
        Response::new(StatusCode::InternalServerError)
    })?;
    if !metadata.is_file() {
        return Err(Response::new(StatusCode::Forbidden));
    }

    let lastmod = metadata.modified().map_err(|e| {
        error!("no modification time for {}: {}", path.display(), e);
        Response::new(StatusCode::InternalServerError)
    })?;
    Ok((path, file, metadata, lastmod))
}

/// A 200 reply's headers for a file of `length` bytes.
fn file_reply(server: &Server, path: &Path, length: u64, lastmod: SystemTime) -> Response {
    Response::new(StatusCode::Ok)
        .with_header("Content-Type", server.mime_map.content_type(path))
        .with_header("Content-Length", length)
        .with_header("Last-Modified", HttpDate(lastmod))
        .with_standard_headers()
        .with_header("Set-Cookie", visit_cookie(Local::now()))
}

/// Whether `lastmod` is strictly before `since`, comparing whole seconds.
fn modified_before(lastmod: SystemTime, since: SystemTime) -> bool {
    let seconds = |time: SystemTime| {
        time.duration_since(SystemTime::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    };
    seconds(lastmod) < seconds(since)
}

fn visit_cookie(now: DateTime<Local>) -> String {
    format!(
        "{}={}",
        VISIT_COOKIE,
        UrlEncoded(&now.format(VISIT_TIME_FORMAT).to_string())
    )
}

/// The time of the client's last visit, if it sent a well-formed visit cookie.
fn last_visit(request: &Request) -> Option<String> {
    let value = request.header("Cookie")?.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name == VISIT_COOKIE {
            Some(value)
        } else {
            None
        }
    })?;
    let decoded = UrlDecoded(value).to_string();
    NaiveDateTime::parse_from_str(&decoded, VISIT_TIME_FORMAT).ok()?;
    Some(decoded)
}

fn welcome_back_page(last_visit: &str) -> String {
    format!(
        "<html><head><title>Welcome back</title></head><body>\n\
        <h1>Welcome back</h1>\n\
        <p>Your last visit was at: {}</p>\n\
        </body></html>\n",
        last_visit
    )
}
