use std::ffi::{CString, OsStr};
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::net::IpAddr;
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::request::Request;
use crate::status::StatusCode;

/// Where to put the access log.
#[derive(Debug)]
pub enum LogSink {
    Stdout,
    Syslog,
    File(BufWriter<File>),
}

impl LogSink {
    /// Append to `filename`, creating it if needed.
    pub fn open_file(filename: &OsStr) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(filename)
            .with_context(|| format!("failed to open log file {:?}", filename))?;
        Ok(Self::File(BufWriter::new(file)))
    }

    pub fn log(&mut self, message: &str) -> io::Result<()> {
        match self {
            Self::Stdout => {
                print!("{}", message);
                io::stdout().flush()?;
            }
            Self::Syslog => {
                let message = CString::new(message.trim_end())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                unsafe {
                    libc::syslog(
                        libc::LOG_INFO,
                        b"%s\0".as_ptr() as *const libc::c_char,
                        message.as_ptr(),
                    )
                };
            }
            Self::File(file) => {
                write!(file, "{}", message)?;
                file.flush()?;
            }
        }
        Ok(())
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::Stdout
    }
}

/// Common Log Format (CLF) formatted date in local timezone.
pub struct ClfDate(pub SystemTime);

impl std::fmt::Display for ClfDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let datetime = DateTime::<Local>::from(self.0);
        write!(f, "{}", datetime.format("[%d/%b/%Y:%H:%M:%S %z]"))
    }
}

/// Encode string for logging. Logs should not contain control characters or double quotes.
pub struct LogEncoded<'a>(pub &'a str);

impl<'a> std::fmt::Display for LogEncoded<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for c in self.0.chars() {
            if !c.is_ascii() || c.is_ascii_control() || c == '"' {
                let mut buf = [0; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    write!(f, "%{:02X}", b)?;
                }
            } else {
                f.write_char(c)?;
            }
        }
        Ok(())
    }
}

/// One finished connection, as it appears in the access log.
#[derive(Debug)]
pub struct Entry<'a> {
    pub client: IpAddr,
    pub time: SystemTime,
    /// None when nothing was received.
    pub request: Option<&'a Request>,
    pub status: StatusCode,
    pub bytes_sent: usize,
}

impl std::fmt::Display for Entry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let field = |name: &str| self.request.and_then(|request| request.header(name));
        write!(
            f,
            "{} - - {} \"{}\" {} {} \"{}\" \"{}\"",
            self.client,
            ClfDate(self.time),
            LogEncoded(self.request.map(Request::request_line).unwrap_or("-")),
            self.status.code(),
            self.bytes_sent,
            LogEncoded(field("Referer").unwrap_or("")),
            LogEncoded(field("User-Agent").unwrap_or("")),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::fs;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[test]
    fn log_encoded_works() {
        assert_eq!(
            LogEncoded("some\"log\tcrab\u{1F980}").to_string(),
            "some%22log%09crab%F0%9F%A6%80"
        );
    }

    #[test]
    fn clf_date_works() {
        // contains system's local timezone
        assert!(
            ClfDate(SystemTime::UNIX_EPOCH + Duration::from_secs(1620965123))
                .to_string()
                .contains("May/2021")
        );
    }

    #[test]
    fn entry_format() {
        let request = Request::parse(
            b"GET /a\"b HTTP/1.0\r\nUser-Agent: crab\r\nReferer: http://x/\r\n\r\n",
        );
        let entry = Entry {
            client: IpAddr::V4(Ipv4Addr::LOCALHOST),
            time: SystemTime::now(),
            request: Some(&request),
            status: StatusCode::NotFound,
            bytes_sent: 28,
        };
        let line = entry.to_string();
        assert!(line.starts_with("127.0.0.1 - - ["));
        assert!(line.ends_with("] \"GET /a%22b HTTP/1.0\" 404 28 \"http://x/\" \"crab\""));
    }

    #[test]
    fn entry_without_request() {
        let entry = Entry {
            client: IpAddr::V4(Ipv4Addr::LOCALHOST),
            time: SystemTime::now(),
            request: None,
            status: StatusCode::RequestTimeout,
            bytes_sent: 0,
        };
        assert!(entry.to_string().ends_with("] \"-\" 408 0 \"\" \"\""));
    }

    #[test]
    fn file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("access.log");
        fs::write(&path, "old\n").unwrap();
        let mut sink = LogSink::open_file(path.as_os_str()).unwrap();
        sink.log("first\n").unwrap();
        sink.log("second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old\nfirst\nsecond\n");
    }

    #[test]
    fn file_sink_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("access.log");
        assert!(LogSink::open_file(path.as_os_str()).is_err());
    }
}
