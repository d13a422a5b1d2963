//! POST: run a CGI program with the request body on its standard input.

use std::fs;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;

use anyhow::{anyhow, Context, Result};
use log::{error, warn};
use nix::unistd::{access, AccessFlags};

use crate::request::Request;
use crate::response::Response;
use crate::status::StatusCode;
use crate::Server;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const CGI_EXTENSION: &str = ".cgi";

/// Characters that, preceded by '!', form a pair the body decoder drops.
const RESERVED: &[char] = &[
    '!', '*', '\'', '(', ')', ';', ':', '@', '$', '+', ',', '/', '?', '#', '[', ']',
];

/// Process a POST request.
pub fn process_post(server: &Server, request: &Request, target: &str) -> Response {
    let content_length = match request
        .header("Content-Length")
        .and_then(|length| length.parse::<u64>().ok())
    {
        Some(content_length) => content_length,
        None => return Response::new(StatusCode::LengthRequired),
    };
    if request.header("Content-Type") != Some(FORM_CONTENT_TYPE) {
        return Response::new(StatusCode::InternalServerError);
    }

    let (root, script) = match check_executable(&server.config.root, target) {
        Ok(resolved) => resolved,
        Err(status) => return Response::new(status),
    };

    let encoded = request.body_lines().collect::<Vec<_>>().join("\n");
    if encoded.len() as u64 != content_length {
        warn!(
            "payload of {} bytes doesn't match Content-Length {}",
            encoded.len(),
            content_length
        );
    }
    let decoded = decode_body(&encoded);

    let environment = CgiEnvironment {
        content_length,
        script_name: target,
        server_name: &server.host_name,
        server_port: server.config.port,
        from: request.header("From"),
        user_agent: request.header("User-Agent"),
    };
    let output = match execute(&script, &root, &environment, decoded.into_bytes()) {
        Ok(output) => output,
        Err(e) => {
            error!("{:#}", e);
            return Response::new(StatusCode::InternalServerError);
        }
    };

    if output.is_empty() {
        return Response::new(StatusCode::NoContent).with_standard_headers();
    }
    Response::new(StatusCode::Ok)
        .with_header("Content-Type", "text/html")
        .with_header("Content-Length", output.len())
        .with_standard_headers()
        .with_body(output)
}

/// Resolve a script target, returning the canonical root and the script path.
fn check_executable(
    root: &Path,
    target: &str,
) -> std::result::Result<(PathBuf, PathBuf), StatusCode> {
    if !target.ends_with(CGI_EXTENSION) {
        return Err(StatusCode::MethodNotAllowed);
    }

    let root = fs::canonicalize(root).map_err(|e| {
        error!("failed to resolve server root {}: {}", root.display(), e);
        StatusCode::InternalServerError
    })?;
    let script = root.join(target.trim_start_matches('/'));

    let metadata = fs::metadata(&script).map_err(|e| match e.kind() {
        ErrorKind::NotFound => StatusCode::NotFound,
        ErrorKind::PermissionDenied => StatusCode::Forbidden,
        _ if e.raw_os_error() == Some(libc::ENOTDIR) => StatusCode::NotFound,
        _ => {
            error!("failed to stat {}: {}", script.display(), e);
            StatusCode::InternalServerError
        }
    })?;
    if !metadata.is_file() || access(script.as_path(), AccessFlags::X_OK).is_err() {
        return Err(StatusCode::Forbidden);
    }
    Ok((root, script))
}

/// Drop every '!' + reserved character pair from a request body. Nothing else is changed.
pub fn decode_body(encoded: &str) -> String {
    let mut decoded = String::with_capacity(encoded.len());
    let mut chars = encoded.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '!' {
            if let Some(&next) = chars.peek() {
                if RESERVED.contains(&next) || is_pattern_whitespace(next) {
                    chars.next();
                    continue;
                }
            }
        }
        decoded.push(c);
    }
    decoded
}

fn is_pattern_whitespace(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\x0B' | '\x0C' | '\r')
}

/// Variables a CGI program receives on top of the server's environment.
#[derive(Debug)]
struct CgiEnvironment<'a> {
    content_length: u64,
    script_name: &'a str,
    server_name: &'a str,
    server_port: u16,
    from: Option<&'a str>,
    user_agent: Option<&'a str>,
}

impl CgiEnvironment<'_> {
    fn apply(&self, command: &mut Command) {
        command
            .env("CONTENT_LENGTH", self.content_length.to_string())
            .env("SCRIPT_NAME", self.script_name)
            .env("SERVER_NAME", self.server_name)
            .env("SERVER_PORT", self.server_port.to_string());
        for (name, value) in &[("HTTP_FROM", self.from), ("HTTP_USER_AGENT", self.user_agent)] {
            match value {
                Some(value) => command.env(name, value),
                None => command.env_remove(name),
            };
        }
    }
}

/// A child process that is killed and reaped when dropped.
struct ScopedChild(Child);

impl Drop for ScopedChild {
    fn drop(&mut self) {
        self.0.kill().ok();
        self.0.wait().ok();
    }
}

/// Run a CGI program: feed it its input while collecting everything it prints.
///
/// The input is written from a separate thread so a program that echoes more than a pipe buffer
/// can't block both sides.
fn execute(
    script: &Path,
    root: &Path,
    environment: &CgiEnvironment,
    input: Vec<u8>,
) -> Result<Vec<u8>> {
    let mut command = Command::new(script);
    command
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    environment.apply(&mut command);

    let mut child = ScopedChild(
        command
            .spawn()
            .with_context(|| format!("failed to spawn {}", script.display()))?,
    );

    let stdin = child.0.stdin.take().context("child has no stdin")?;
    let writer = thread::Builder::new()
        .name("cgi-stdin".to_string())
        .spawn(move || write_input(stdin, &input))
        .context("failed to spawn input writer")?;

    let mut output = Vec::new();
    let read = child
        .0
        .stdout
        .take()
        .context("child has no stdout")?
        .read_to_end(&mut output);
    if read.is_err() {
        // unblocks the writer
        child.0.kill().ok();
    }
    let written = writer
        .join()
        .map_err(|_| anyhow!("input writer for {} panicked", script.display()))?;
    read.with_context(|| format!("failed to read output of {}", script.display()))?;
    written.with_context(|| format!("failed to write input to {}", script.display()))?;

    let status = child
        .0
        .wait()
        .with_context(|| format!("failed to wait for {}", script.display()))?;
    if !status.success() {
        warn!("{} exited with {}", script.display(), status);
    }
    Ok(output)
}

/// Write all of `input` and close the pipe.
fn write_input(mut stdin: ChildStdin, input: &[u8]) -> io::Result<()> {
    match stdin.write_all(input) {
        // The program exited without reading its input.
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
        result => result,
    }
}
