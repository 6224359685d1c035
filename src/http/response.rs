//! Response serialization.
//!
//! # Responsibilities
//! - Status line, headers, one `Set-Cookie` line per cookie, blank line
//! - Default `Server` and `Connection: close`, overridable by later headers
//! - Body bytes, omitted for HEAD or when a relay takes over the socket

use http::StatusCode;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::headers::Headers;

/// A response ready to be written to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    reason: String,
    headers: Headers,
    cookies: Vec<String>,
    body: Vec<u8>,
}

impl Response {
    /// Start a response carrying the default `Server` and `Connection` headers.
    pub fn new(status: StatusCode, server: &str) -> Self {
        Self::with_reason(
            status.as_u16(),
            status.canonical_reason().unwrap_or(""),
            server,
        )
    }

    /// Start a response with an arbitrary status code and reason phrase,
    /// as relayed from an upstream.
    pub fn with_reason(status: u16, reason: impl Into<String>, server: &str) -> Self {
        let mut headers = Headers::new();
        headers.insert("Server", server);
        headers.insert("Connection", "close");
        Self {
            status,
            reason: reason.into(),
            headers,
            cookies: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Plain text response with a `Content-Length`.
    pub fn text(status: StatusCode, server: &str, message: impl Into<String>) -> Self {
        Self::new(status, server)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(message.into().into_bytes())
    }

    /// HTML response with a `Content-Length`.
    pub fn html(status: StatusCode, server: &str, page: String) -> Self {
        Self::new(status, server)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(page.into_bytes())
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Add one `Set-Cookie` line. Cookies are never collapsed.
    pub fn set_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    pub fn set_cookies<I, S>(mut self, cookies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cookies.extend(cookies.into_iter().map(Into::into));
        self
    }

    /// Replace the body and set `Content-Length` to match.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.headers.insert("Content-Length", body.len().to_string());
        self.body = body;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Serialize the status line and header block, including the blank line.
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        for cookie in &self.cookies {
            head.push_str("Set-Cookie: ");
            head.push_str(cookie);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        head.into_bytes()
    }

    /// Write only the head. Used when a relay streams the body itself.
    pub async fn write_head<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.head_bytes()).await?;
        writer.flush().await
    }

    /// Write head and, unless `include_body` is false (HEAD), the body.
    pub async fn write_to<W>(&self, writer: &mut W, include_body: bool) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut bytes = self.head_bytes();
        if include_body {
            bytes.extend_from_slice(&self.body);
        }
        writer.write_all(&bytes).await?;
        writer.flush().await
    }
}
