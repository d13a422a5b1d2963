//! A small HTTP/1.0 server: static files for GET and HEAD, CGI programs for POST.
//!
//! Each accepted connection runs on its own thread and answers exactly one request.

pub mod access_log;
pub mod admission;
pub mod cgi;
pub mod channel;
pub mod encoding;
pub mod method;
pub mod mime;
pub mod request;
pub mod response;
pub mod session;
pub mod static_files;
pub mod status;

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::access_log::{Entry, LogSink};
use crate::admission::Admission;
use crate::mime::MimeMap;

/// Tunables for a [`Server`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the server is reachable on, passed to CGI programs.
    pub port: u16,
    /// Directory that request targets resolve against.
    pub root: PathBuf,
    pub max_connections: usize,
    /// How long a client has, from acceptance, to start sending its request.
    pub request_timeout: Duration,
    /// Pause between sending a response and closing the connection.
    pub close_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 0,
            root: PathBuf::from("."),
            max_connections: 50,
            request_timeout: Duration::from_millis(5000),
            close_delay: Duration::from_millis(250),
        }
    }
}

/// State shared by every connection.
#[derive(Debug)]
pub struct Server {
    pub config: Config,
    pub mime_map: MimeMap,
    /// Reported to CGI programs as `SERVER_NAME`.
    pub host_name: String,
    pub(crate) admission: Admission,
    log_sink: Mutex<LogSink>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            admission: Admission::new(config.max_connections),
            config,
            mime_map: MimeMap::default(),
            host_name: host_name(),
            log_sink: Mutex::new(LogSink::default()),
        }
    }

    pub fn with_mime_map(mut self, mime_map: MimeMap) -> Self {
        self.mime_map = mime_map;
        self
    }

    pub fn with_log_sink(mut self, log_sink: LogSink) -> Self {
        self.log_sink = Mutex::new(log_sink);
        self
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.admission.active()
    }

    pub(crate) fn log_access(&self, entry: &Entry) {
        let mut log_sink = self
            .log_sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = log_sink.log(&format!("{}\n", entry)) {
            warn!("failed to write access log: {}", e);
        }
    }

    /// Accept connections forever, serving each on a new thread.
    pub fn serve(self: Arc<Self>, listener: TcpListener) {
        for stream in listener.incoming() {
            let accepted_at = Instant::now();
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                    continue;
                }
            };
            let client = match stream.peer_addr() {
                Ok(addr) => addr.ip(),
                Err(e) => {
                    warn!("failed to get peer address: {}", e);
                    continue;
                }
            };
            debug!("accepted connection from {}", client);

            let server = Arc::clone(&self);
            let spawned = thread::Builder::new()
                .name(format!("conn-{}", client))
                .spawn(move || session::run(&server, stream, client, accepted_at));
            if let Err(e) = spawned {
                warn!("failed to spawn thread for {}: {}", client, e);
            }
        }
    }
}

fn host_name() -> String {
    let mut buf = [0u8; 256];
    match nix::unistd::gethostname(&mut buf) {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!("failed to get host name, using localhost: {}", e);
            "localhost".to_string()
        }
    }
}
