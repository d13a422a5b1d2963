use std::ffi::OsString;
use std::net::{
    AddrParseError, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpListener,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::info;
use nix::sys::signal::{signal, SigHandler, Signal};

use tinyhttpd::access_log::LogSink;
use tinyhttpd::mime::{MimeMap, DEFAULT_MIME_TYPE};
use tinyhttpd::{Config, Server};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("{}/{}.", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let mut options = Options::from_command_line()?;
    let listener = options.create_listener()?;
    let local_addr = listener
        .local_addr()
        .context("failed to get listening address")?;
    println!("listening on: http://{}/", local_addr);

    // a client hanging up mid-response must not kill the server
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigIgn) }
        .context("failed to set SIGPIPE handler")?;

    options.config.port = local_addr.port();
    info!(
        "serving {} with up to {} connections",
        options.config.root.display(),
        options.config.max_connections
    );
    let server = Server::new(options.config)
        .with_mime_map(options.mime_map)
        .with_log_sink(options.log_sink);
    Arc::new(server).serve(listener);
    Ok(())
}

/// Everything the command line controls.
#[derive(Debug, Default)]
struct Options {
    config: Config,
    bindaddr: Option<String>,
    inet6: bool,
    log_sink: LogSink,
    mime_map: MimeMap,
}

impl Options {
    fn from_command_line() -> Result<Self> {
        let mut options = Self::default();
        let mut args = std::env::args();
        let name = args.next().unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        match args.next().as_deref() {
            None | Some("--help") => {
                options.usage(&name); // no port given
                std::process::exit(0);
            }
            Some(port) => {
                options.config.port = port
                    .parse()
                    .with_context(|| format!("port number {} is invalid", port))?;
            }
        };
        while let Some(arg) = args.next().as_deref() {
            match arg {
                "--addr" => {
                    options.bindaddr = Some(args.next().context("missing ip after --addr")?);
                }
                "--ipv6" => options.inet6 = true,
                "--maxconn" => {
                    let number = args.next().context("missing number after --maxconn")?;
                    options.config.max_connections = number
                        .parse()
                        .with_context(|| format!("maxconn number {} is invalid", number))?;
                }
                "--timeout" => {
                    let number = args.next().context("missing number after --timeout")?;
                    let timeout_ms = number
                        .parse::<u64>()
                        .with_context(|| format!("timeout number {} is invalid", number))?;
                    options.config.request_timeout = Duration::from_millis(timeout_ms);
                }
                "--log" => {
                    let filename = args.next().context("missing filename after --log")?;
                    options.log_sink = LogSink::open_file(&OsString::from(filename))?;
                }
                "--syslog" => options.log_sink = LogSink::Syslog,
                "--mimetypes" => {
                    let filename = args.next().context("missing filename after --mimetypes")?;
                    options
                        .mime_map
                        .parse_extension_map_file(&OsString::from(filename))?;
                }
                "--default-mimetype" => {
                    options.mime_map.default_mimetype = args
                        .next()
                        .context("missing string after --default-mimetype")?;
                }
                "--help" => {
                    options.usage(&name);
                    std::process::exit(0);
                }
                _ => {
                    return Err(anyhow!("unknown argument `{}'", arg));
                }
            }
        }
        Ok(options)
    }

    fn usage(&self, argv0: &str) {
        let defaults = Config::default();
        print!(
            "usage:\t{} port [flags]\n\n\
            \tport\n\
            \t\tWhich port to listen on for connections.\n\
            \t\tPass 0 to let the system choose any free port for you.\n\
            \t\tFiles and CGI programs are served from the current directory.\n\n\
            flags:\t--addr ip (default: all)\n\
            \t\tIf multiple interfaces are present, specifies\n\
            \t\twhich one to bind the listening port to.\n\n\
            \t--ipv6\n\
            \t\tListen on IPv6 address.\n\n\
            \t--maxconn number (default: {})\n\
            \t\tSpecifies how many concurrent connections to accept.\n\n\
            \t--timeout ms (default: {})\n\
            \t\tHow long a client has to send its request after connecting.\n\n\
            \t--log filename (default: stdout)\n\
            \t\tSpecifies which file to append the request log to.\n\n\
            \t--syslog\n\
            \t\tUse syslog for request log.\n\n\
            \t--mimetypes filename (optional)\n\
            \t\tParses specified file for extension-MIME associations.\n\n\
            \t--default-mimetype string (optional, default: {})\n\
            \t\tFiles with unknown extensions are served as this mimetype.\n\n",
            argv0,
            defaults.max_connections,
            defaults.request_timeout.as_millis(),
            DEFAULT_MIME_TYPE,
        );
    }

    fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let port = self.config.port;
        Ok(if self.inet6 {
            let addr = Ipv6Addr::from_str(self.bindaddr.as_deref().unwrap_or("::"))?;
            SocketAddr::V6(SocketAddrV6::new(addr, port, 0, 0))
        } else {
            let addr = Ipv4Addr::from_str(self.bindaddr.as_deref().unwrap_or("0.0.0.0"))?;
            SocketAddr::V4(SocketAddrV4::new(addr, port))
        })
    }

    /// Initialize the TcpListener. This is the socket that we accept connections from.
    fn create_listener(&self) -> Result<TcpListener> {
        let socket_addr = self.socket_addr().context("malformed --addr argument")?;
        // Sets `SO_REUSEADDR` implicitly.
        TcpListener::bind(socket_addr)
            .with_context(|| format!("failed to create listening socket for {}", socket_addr))
    }
}
