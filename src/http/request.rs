//! Request reading and parsing.
//!
//! # Responsibilities
//! - Read exactly one request line and one header block from the client
//! - Enforce the cumulative header ceiling before anything is interpreted
//! - Read a small form body for POST, bounded by `Content-Length`
//!
//! # Design Decisions
//! - Header lines without a colon are skipped, not rejected
//! - Duplicate headers collapse to the last value (see [`Headers`])
//! - The same line/header primitives parse upstream response heads

use http::StatusCode;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::config::LimitsConfig;
use crate::http::headers::Headers;

/// Methods the proxy answers; everything else is a 405.
pub const ALLOWED_METHODS: &str = "GET, HEAD, POST";

/// Client-side protocol failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed before a complete request was received")]
    ConnectionClosed,

    #[error("malformed request line {0:?}")]
    MalformedRequest(String),

    #[error("request head exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },

    #[error("invalid Content-Length {0:?}")]
    InvalidContentLength(String),

    #[error("declared body of {declared} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { declared: usize, limit: usize },

    #[error("method {0} not supported")]
    MethodNotAllowed(String),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Status used to answer the client, `None` when there is nobody left
    /// to answer.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ProtocolError::ConnectionClosed => None,
            ProtocolError::PayloadTooLarge { .. } => Some(StatusCode::PAYLOAD_TOO_LARGE),
            ProtocolError::MethodNotAllowed(_) => Some(StatusCode::METHOD_NOT_ALLOWED),
            ProtocolError::MalformedRequest(_)
            | ProtocolError::HeadersTooLarge { .. }
            | ProtocolError::InvalidContentLength(_)
            | ProtocolError::Io(_) => Some(StatusCode::BAD_REQUEST),
        }
    }
}

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    /// Upper-cased method.
    pub method: String,
    /// Request target as sent, including any raw query.
    pub target: String,
    pub version: String,
    pub headers: Headers,
    /// Form body, only ever read for POST.
    pub body: Option<Vec<u8>>,
}

impl IncomingRequest {
    /// Path component of the request target.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// Raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }
}

/// Outcome of reading one bounded line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Line {
    Eof,
    TooLong,
    Data(Vec<u8>),
}

/// Read up to and including `\n`, refusing lines longer than `limit`.
/// A final line without terminator is returned as data.
pub(crate) async fn read_line_limited<R>(reader: &mut R, limit: usize) -> std::io::Result<Line>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', &mut line)
        .await?;

    if read == 0 {
        return Ok(Line::Eof);
    }
    if !line.ends_with(b"\n") && read >= limit {
        return Ok(Line::TooLong);
    }
    Ok(Line::Data(line))
}

/// Split a request line into `(METHOD, target, version)`.
pub fn parse_request_line(line: &str) -> Result<(String, String, String), ProtocolError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [method, target, version] => Ok((
            method.to_ascii_uppercase(),
            target.to_string(),
            version.to_string(),
        )),
        _ => Err(ProtocolError::MalformedRequest(line.trim().to_string())),
    }
}

/// Split a header line at its first colon. Lines without a colon, or with
/// an empty name, yield `None`.
pub fn parse_header_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value.trim()))
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

/// Read header lines until a blank line or end of stream. The cumulative
/// size of non-blank lines is capped at `limit`.
pub(crate) async fn read_header_block<R>(
    reader: &mut R,
    limit: usize,
) -> Result<Headers, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = Headers::new();
    let mut total = 0usize;

    loop {
        let line = match read_line_limited(reader, limit).await? {
            Line::Eof => break,
            Line::TooLong => return Err(ProtocolError::HeadersTooLarge { limit }),
            Line::Data(line) => line,
        };
        if is_blank(&line) {
            break;
        }

        total += line.len();
        if total > limit {
            return Err(ProtocolError::HeadersTooLarge { limit });
        }

        let text = String::from_utf8_lossy(&line);
        match parse_header_line(&text) {
            Some((name, value)) => headers.insert(name, value),
            None => tracing::trace!(line = %text.trim_end(), "Skipping malformed header line"),
        }
    }

    Ok(headers)
}

/// Read the request line and header block.
pub async fn read_request_head<R>(
    reader: &mut R,
    max_header_bytes: usize,
) -> Result<IncomingRequest, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let request_line = match read_line_limited(reader, max_header_bytes).await? {
        Line::Eof => return Err(ProtocolError::ConnectionClosed),
        Line::TooLong => {
            return Err(ProtocolError::HeadersTooLarge {
                limit: max_header_bytes,
            })
        }
        Line::Data(line) => line,
    };

    let (method, target, version) = parse_request_line(&String::from_utf8_lossy(&request_line))?;
    let headers = read_header_block(reader, max_header_bytes).await?;

    Ok(IncomingRequest {
        method,
        target,
        version,
        headers,
        body: None,
    })
}

/// Read a form body of `Content-Length` bytes, refusing anything over
/// `limit` before a single body byte is consumed.
pub async fn read_form_body<R>(
    reader: &mut R,
    headers: &Headers,
    limit: usize,
) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let declared = match headers.get("Content-Length") {
        None => return Ok(None),
        Some(raw) if raw.is_empty() => return Ok(None),
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ProtocolError::InvalidContentLength(raw.to_string()))?,
    };

    if declared > limit {
        return Err(ProtocolError::PayloadTooLarge { declared, limit });
    }
    if declared == 0 {
        return Ok(None);
    }

    let mut body = vec![0u8; declared];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(e)
        }
    })?;
    Ok(Some(body))
}

/// Read a complete request: head, method check, then the form body for POST.
pub async fn read_request<R>(
    reader: &mut R,
    limits: &LimitsConfig,
) -> Result<IncomingRequest, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut request = read_request_head(reader, limits.max_header_bytes).await?;

    match request.method.as_str() {
        "GET" | "HEAD" => {}
        "POST" => {
            request.body =
                read_form_body(reader, &request.headers, limits.max_form_body_bytes).await?;
        }
        other => return Err(ProtocolError::MethodNotAllowed(other.to_string())),
    }

    Ok(request)
}
