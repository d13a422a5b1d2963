#![allow(dead_code)]

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;

use tempfile::{tempdir, TempDir};

struct ScopedChild(Child);

impl Drop for ScopedChild {
    fn drop(&mut self) {
        self.0.kill().ok();
        self.0.wait().ok();
    }
}

/// A tinyhttpd process serving a fresh temporary directory.
pub struct Server {
    // Declared first so the process is gone before its directories are removed.
    _child: ScopedChild,
    _stdout: BufReader<ChildStdout>,
    port: u16,
    root: TempDir,
    logs: TempDir,
}

impl Server {
    pub fn new() -> Self {
        Self::with_args(&[])
    }

    pub fn with_args(args: &[&str]) -> Self {
        let root = tempdir().expect("failed to create tempdir");
        let logs = tempdir().expect("failed to create tempdir");

        // Port 0 lets the server pick; the real port is read back from its banner.
        let mut child = ScopedChild(
            Command::new(env!("CARGO_BIN_EXE_tinyhttpd"))
                .current_dir(root.path())
                .args(&["0", "--addr", "127.0.0.1", "--log"])
                .arg(logs.path().join("access.log"))
                .args(args)
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .spawn()
                .expect("failed to spawn tinyhttpd"),
        );
        let mut stdout = BufReader::new(child.0.stdout.take().expect("no stdout"));
        let port = wait_for_banner(&mut stdout);

        Self {
            _child: child,
            _stdout: stdout,
            port,
            root,
            logs,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn create_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.root().join(name);
        fs::write(&path, contents).expect("failed to create file");
        path
    }

    pub fn create_dir(&self, name: &str) {
        fs::create_dir(self.root().join(name)).expect("failed to create directory");
    }

    pub fn create_script(&self, name: &str, contents: &str, mode: u32) {
        let path = self.create_file(name, contents.as_bytes());
        fs::set_permissions(&path, fs::Permissions::from_mode(mode))
            .expect("failed to set permissions");
    }

    pub fn connect(&self) -> TcpStream {
        let stream =
            TcpStream::connect(("127.0.0.1", self.port)).expect("failed to connect to tinyhttpd");
        // Set timeouts to prevent tests from hanging
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        stream
            .set_write_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        stream
    }

    /// Send raw request bytes in one write and read the response until the server closes.
    pub fn request(&self, raw: &[u8]) -> Response {
        let mut stream = self.connect();
        stream.write_all(raw).expect("failed to send request");
        read_response(&mut stream)
    }

    pub fn get(&self, target: &str, headers: &[&str]) -> Response {
        let mut raw = format!("GET {} HTTP/1.0\r\n", target);
        for header in headers {
            raw.push_str(header);
            raw.push_str("\r\n");
        }
        raw.push_str("\r\n");
        self.request(raw.as_bytes())
    }

    pub fn post(&self, target: &str, headers: &[&str], body: &str) -> Response {
        let mut raw = format!("POST {} HTTP/1.0\r\n", target);
        for header in headers {
            raw.push_str(header);
            raw.push_str("\r\n");
        }
        raw.push_str("\r\n");
        raw.push_str(body);
        self.request(raw.as_bytes())
    }

    pub fn access_log(&self) -> String {
        fs::read_to_string(self.logs.path().join("access.log")).unwrap_or_default()
    }
}

fn wait_for_banner(stdout: &mut BufReader<ChildStdout>) -> u16 {
    let mut line = String::new();
    loop {
        line.clear();
        let read = stdout.read_line(&mut line).expect("failed to read stdout");
        assert!(read > 0, "tinyhttpd exited before listening");
        if let Some(url) = line.trim_end().strip_prefix("listening on: http://") {
            let port = url.trim_end_matches('/').rsplit(':').next().unwrap();
            return port.parse().expect("invalid port in banner");
        }
    }
}

pub fn read_response<R: Read>(reader: &mut R) -> Response {
    let mut raw = Vec::new();
    reader
        .read_to_end(&mut raw)
        .expect("failed to read response");
    Response::parse(&raw)
}

/// HTTP Response from tinyhttpd.
#[derive(Debug)]
pub struct Response {
    response_line: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn parse(raw: &[u8]) -> Self {
        let split = raw
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .expect("response has no blank line");
        let head = std::str::from_utf8(&raw[..split]).expect("response header is not valid UTF-8");
        let mut lines = head.split("\r\n");
        let response_line = lines.next().unwrap().to_string();
        let headers = lines
            .map(|line| {
                let (name, value) = line.split_once(": ").expect("invalid header");
                (name.to_string(), value.to_string())
            })
            .collect();
        Self {
            response_line,
            headers,
            body: raw[split + 4..].to_vec(),
        }
    }

    pub fn response_line(&self) -> &str {
        &self.response_line
    }

    /// Status code and reason, e.g. "200 OK".
    pub fn status(&self) -> &str {
        self.response_line
            .splitn(2, ' ')
            .nth(1)
            .expect("invalid response line")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).expect("body is not valid UTF-8")
    }
}
