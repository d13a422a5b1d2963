use crate::request::Request;
use crate::response::Response;
use crate::status::StatusCode;
use crate::{cgi, static_files, Server};

/// Request methods the server knows about. Only GET, HEAD and POST are implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Link,
    Unlink,
}

impl Method {
    /// Look up a method token. Tokens are case-sensitive.
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "GET" => Self::Get,
            "HEAD" => Self::Head,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "LINK" => Self::Link,
            "UNLINK" => Self::Unlink,
            _ => return None,
        })
    }

    pub fn is_implemented(self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Post)
    }

    /// Build the response for a validated request.
    pub fn handle(self, server: &Server, request: &Request, target: &str) -> Response {
        match self {
            Self::Get => static_files::process_get(server, request, target),
            Self::Head => static_files::process_head(server, target),
            Self::Post => cgi::process_post(server, request, target),
            Self::Put | Self::Delete | Self::Link | Self::Unlink => {
                Response::new(StatusCode::NotImplemented)
            }
        }
    }
}
