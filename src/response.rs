use std::io::Write;

use crate::status::StatusCode;

pub const SUPPORTED_VERSION: &str = "HTTP/1.0";
pub const CRLF: &str = "\r\n";

/// Sentinel sent in every `Expires` header.
pub const EXPIRES: &str = "Fri, 01 Jan 2021 01:00:00 GMT";
pub const ALLOW: &str = "GET, POST, HEAD";
pub const CONTENT_ENCODING: &str = "identity";

/// A status line, ordered headers, and an optional payload.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: Option<Vec<u8>>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl ToString) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    /// Attach a payload. The caller declares its `Content-Length`.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    /// Add `Allow`, `Expires` and `Content-Encoding`, sent with every successful reply.
    pub fn with_standard_headers(self) -> Self {
        self.with_header("Expires", EXPIRES)
            .with_header("Allow", ALLOW)
            .with_header("Content-Encoding", CONTENT_ENCODING)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Serialize for the wire: status line, headers, blank line, payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writing to a Vec can't fail.
        write!(out, "{} {}{}", SUPPORTED_VERSION, self.status, CRLF).ok();
        for (name, value) in &self.headers {
            write!(out, "{}: {}{}", name, value, CRLF).ok();
        }
        out.extend_from_slice(CRLF.as_bytes());
        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bare_status() {
        assert_eq!(
            Response::new(StatusCode::NotImplemented).to_bytes(),
            b"HTTP/1.0 501 Not Implemented\r\n\r\n"
        );
    }

    #[test]
    fn headers_then_raw_body() {
        let response = Response::new(StatusCode::Ok)
            .with_header("Content-Type", "application/octet-stream")
            .with_header("Content-Length", 3)
            .with_body(vec![0, 0xff, b'\n']);
        let mut expected = b"HTTP/1.0 200 OK\r\n\
            Content-Type: application/octet-stream\r\n\
            Content-Length: 3\r\n\
            \r\n"
            .to_vec();
        expected.extend_from_slice(&[0, 0xff, b'\n']);
        assert_eq!(response.to_bytes(), expected);
        assert_eq!(response.header("content-length"), Some("3"));
    }

    #[test]
    fn standard_headers_in_order() {
        let response = Response::new(StatusCode::NoContent).with_standard_headers();
        assert_eq!(
            String::from_utf8(response.to_bytes()).unwrap(),
            "HTTP/1.0 204 No Content\r\n\
            Expires: Fri, 01 Jan 2021 01:00:00 GMT\r\n\
            Allow: GET, POST, HEAD\r\n\
            Content-Encoding: identity\r\n\
            \r\n"
        );
    }
}
