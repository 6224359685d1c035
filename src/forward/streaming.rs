//! Streaming relay for continuous-image resources.
//!
//! # Responsibilities
//! - Open a dedicated upstream connection and send one `Connection: close` GET
//! - Parse one status line and header block, leniently
//! - Relay the body chunk by chunk, flushing each chunk before reading the next
//!
//! # Design Decisions
//! - Setup (connect, TLS, head) has a deadline; the relay has none, since
//!   a live stream may idle between frames
//! - Anything that goes wrong before the head is written is a setup failure
//!   and still yields a 502; afterwards every termination is a clean end
//! - The upstream is closed on every exit path, best effort

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tokio_rustls::TlsConnector;

use crate::config::{LimitsConfig, UpstreamConfig};
use crate::forward::upstream::{tls_connector, UpstreamConn};
use crate::forward::UpstreamError;
use crate::http::request::{read_header_block, read_line_limited, Line};
use crate::http::{Headers, Response};
use crate::session::Target;

/// Why a relay stopped. None of these are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Upstream finished its side.
    UpstreamClosed,
    /// Upstream read failed after the head, e.g. a reset.
    UpstreamReset,
    /// Writing to the client failed.
    ClientGone,
    /// HEAD request: only the head was relayed.
    HeadOnly,
}

impl StreamEnd {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEnd::UpstreamClosed => "upstream_closed",
            StreamEnd::UpstreamReset => "upstream_reset",
            StreamEnd::ClientGone => "client_gone",
            StreamEnd::HeadOnly => "head_only",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub status: u16,
    /// Body bytes delivered to the client.
    pub bytes: u64,
    pub end: StreamEnd,
}

/// Parsed upstream response head.
#[derive(Debug)]
struct UpstreamHead {
    status: u16,
    reason: String,
    headers: Headers,
}

pub struct StreamingForwarder {
    tls: TlsConnector,
    user_agent: String,
    setup_timeout: Duration,
    close_grace: Duration,
    chunk_size: usize,
    max_header_bytes: usize,
}

impl StreamingForwarder {
    pub fn new(upstream: &UpstreamConfig, limits: &LimitsConfig) -> Result<Self, UpstreamError> {
        Ok(Self {
            tls: tls_connector()?,
            user_agent: upstream.user_agent.clone(),
            setup_timeout: Duration::from_secs(upstream.timeout_secs),
            close_grace: Duration::from_millis(upstream.close_grace_ms),
            chunk_size: limits.stream_chunk_bytes,
            max_header_bytes: limits.max_header_bytes,
        })
    }

    /// Relay `path_and_query` from `target` to `client`.
    ///
    /// `cookies` are added to the relayed head. An `Err` means nothing has
    /// been written to the client yet.
    pub async fn relay<W>(
        &self,
        target: &Target,
        path_and_query: &str,
        client: &mut W,
        cookies: &[String],
        include_body: bool,
    ) -> Result<StreamSummary, UpstreamError>
    where
        W: AsyncWrite + Unpin,
    {
        let deadline = Instant::now() + self.setup_timeout;

        let mut conn = match timeout_at(deadline, UpstreamConn::open(target, &self.tls)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(UpstreamError::StreamSetup(e.to_string())),
            Err(_) => return Err(self.setup_timed_out()),
        };

        let head = match timeout_at(deadline, self.request_head(&mut conn, target, path_and_query)).await {
            Ok(Ok(head)) => head,
            Ok(Err(e)) => {
                conn.close(self.close_grace).await;
                return Err(e);
            }
            Err(_) => {
                conn.close(self.close_grace).await;
                return Err(self.setup_timed_out());
            }
        };

        let summary = self.pump(&mut conn, head, client, cookies, include_body).await;
        conn.close(self.close_grace).await;
        Ok(summary)
    }

    fn setup_timed_out(&self) -> UpstreamError {
        UpstreamError::StreamSetup(format!(
            "no response head within {:?}",
            self.setup_timeout
        ))
    }

    async fn request_head(
        &self,
        conn: &mut UpstreamConn,
        target: &Target,
        path_and_query: &str,
    ) -> Result<UpstreamHead, UpstreamError> {
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
            path_and_query,
            target.authority(),
            self.user_agent
        );
        let setup = |e: std::io::Error| UpstreamError::StreamSetup(e.to_string());

        let io = conn.io();
        io.write_all(request.as_bytes()).await.map_err(setup)?;
        io.flush().await.map_err(setup)?;

        let status_line = match read_line_limited(io, self.max_header_bytes).await.map_err(setup)? {
            Line::Data(line) => line,
            Line::Eof => {
                return Err(UpstreamError::StreamSetup(
                    "upstream closed before sending a status line".into(),
                ))
            }
            Line::TooLong => {
                return Err(UpstreamError::StreamSetup("status line too long".into()))
            }
        };
        let status_line = String::from_utf8_lossy(&status_line);
        let (status, reason) = parse_status_line(&status_line).ok_or_else(|| {
            UpstreamError::StreamSetup(format!(
                "malformed status line {:?}",
                status_line.trim_end()
            ))
        })?;

        let headers = read_header_block(io, self.max_header_bytes)
            .await
            .map_err(|e| UpstreamError::StreamSetup(e.to_string()))?;

        Ok(UpstreamHead {
            status,
            reason,
            headers,
        })
    }

    async fn pump<W>(
        &self,
        conn: &mut UpstreamConn,
        head: UpstreamHead,
        client: &mut W,
        cookies: &[String],
        include_body: bool,
    ) -> StreamSummary
    where
        W: AsyncWrite + Unpin,
    {
        let status = head.status;
        let summary = |bytes, end| StreamSummary { status, bytes, end };

        let mut response = Response::with_reason(head.status, head.reason, &self.user_agent);
        for (name, value) in head.headers.iter() {
            response.headers_mut().insert(name, value);
        }
        response.headers_mut().remove("Content-Length");
        response.headers_mut().insert("Connection", "close");
        let response = response.set_cookies(cookies.iter().cloned());

        if let Err(e) = response.write_head(client).await {
            tracing::debug!(error = %e, "Client left before stream head was written");
            return summary(0, StreamEnd::ClientGone);
        }
        if !include_body {
            return summary(0, StreamEnd::HeadOnly);
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut bytes = 0u64;
        let end = loop {
            let read = match conn.io().read(&mut buf).await {
                Ok(0) => break StreamEnd::UpstreamClosed,
                Ok(n) => n,
                Err(e) => {
                    tracing::debug!(peer = %conn.peer(), error = %e, "Upstream stream interrupted");
                    break StreamEnd::UpstreamReset;
                }
            };

            if let Err(e) = write_chunk(client, &buf[..read]).await {
                if is_disconnect(&e) {
                    tracing::debug!(error = %e, "Client disconnected mid-stream");
                } else {
                    tracing::warn!(error = %e, "Client write failed mid-stream");
                }
                break StreamEnd::ClientGone;
            }
            bytes += read as u64;
        };

        summary(bytes, end)
    }
}

/// Write one chunk and wait for it to drain.
async fn write_chunk<W>(client: &mut W, chunk: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    client.write_all(chunk).await?;
    client.flush().await
}

/// Errors that mean the peer went away rather than something broke.
pub fn is_disconnect(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        error.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

/// Parse `HTTP/x.y CODE [reason...]`. The reason phrase is optional.
fn parse_status_line(line: &str) -> Option<(u16, String)> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let status = parts
        .next()?
        .parse::<u16>()
        .ok()
        .filter(|code| (100..=999).contains(code))?;
    let reason = parts.collect::<Vec<_>>().join(" ");
    Some((status, reason))
}
