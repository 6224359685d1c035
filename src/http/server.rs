//! Connection supervisor and accept loop.
//!
//! # Responsibilities
//! - Accept connections and run one task per connection
//! - Read one request, resolve its session state, dispatch it, close
//! - Answer protocol errors with a status and no session work
//! - Cancel in-flight connections on shutdown and drain them, bounded
//!
//! # Design Decisions
//! - One request per connection; every response carries `Connection: close`
//! - No state shared between connection tasks besides read-only config and
//!   the forwarders
//! - Failures in one connection are logged and never reach the accept loop

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::Instrument;

use crate::config::{LimitsConfig, ProxyConfig};
use crate::forward::{BufferedForwarder, FetchPool, StreamingForwarder, UpstreamError};
use crate::http::form::selection_form;
use crate::http::request::{read_request, IncomingRequest, ProtocolError, ALLOWED_METHODS};
use crate::http::response::Response;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionId, ConnectionTracker, Listener, ListenerError};
use crate::observability::metrics;
use crate::session::cookies::{expired_cookie, selection_cookies, PROXY_TARGET};
use crate::session::{resolve, ForwardPlan, SessionState};

/// Upstream headers that describe the upstream connection or framing
/// rather than the payload.
const HOP_BY_HOP: &[&str] = &["connection", "keep-alive", "transfer-encoding", "content-length"];

const LINGER_TIMEOUT: Duration = Duration::from_secs(1);
const LINGER_MAX_BYTES: u64 = 256 * 1024;

/// Shared, read-only state handed to every connection.
pub struct AppState {
    pub limits: LimitsConfig,
    pub stream_suffixes: Vec<String>,
    pub server_name: String,
    pub fetches: FetchPool,
    pub streams: StreamingForwarder,
}

impl AppState {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, UpstreamError> {
        let buffered = BufferedForwarder::new(&config.upstream, &config.limits)?;
        Ok(Self {
            limits: config.limits.clone(),
            stream_suffixes: config.upstream.stream_suffixes.clone(),
            server_name: config.upstream.user_agent.clone(),
            fetches: FetchPool::new(buffered, config.upstream.max_concurrent_fetches),
            streams: StreamingForwarder::new(&config.upstream, &config.limits)?,
        })
    }
}

/// HTTP server for the forwarding proxy.
pub struct HttpServer {
    state: Arc<AppState>,
    drain_timeout: Duration,
}

impl HttpServer {
    pub fn new(config: &ProxyConfig) -> Result<Self, UpstreamError> {
        Ok(Self {
            state: Arc::new(AppState::from_config(config)?),
            drain_timeout: Duration::from_secs(config.shutdown.drain_timeout_secs),
        })
    }

    /// Accept connections until `shutdown` fires, then cancel the
    /// connections still open and wait for them, up to the drain timeout.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(address = %addr, "HTTP server starting");

        let tracker = ConnectionTracker::new();
        let mut stop = shutdown.subscribe();

        loop {
            let accepted = tokio::select! {
                _ = stop.triggered() => break,
                accepted = listener.accept() => accepted,
            };

            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Accept(e)) => {
                    // Typically EMFILE or a connection reset while queued.
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let guard = tracker.track();
            let connection_id = guard.id();
            let state = Arc::clone(&self.state);
            let mut cancel = shutdown.subscribe();
            let span = tracing::info_span!("connection", connection_id = %connection_id, peer = %peer);

            tokio::spawn(
                async move {
                    let _permit = permit;
                    let _guard = guard;
                    tokio::select! {
                        _ = serve_connection(stream, peer, connection_id, &state) => {}
                        _ = cancel.triggered() => {
                            tracing::debug!("Connection cancelled by shutdown");
                        }
                    }
                }
                .instrument(span),
            );
        }

        drop(listener);
        let open = tracker.active_count();
        tracing::info!(open_connections = open, "Stopped accepting, draining connections");
        if !tracker.drain(self.drain_timeout).await {
            tracing::warn!(
                remaining = tracker.active_count(),
                timeout = ?self.drain_timeout,
                "Drain timed out"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Serve exactly one request on `stream`, then close it.
pub async fn serve_connection<S>(stream: S, peer: SocketAddr, id: ConnectionId, state: &AppState)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let started = Instant::now();
    let (read_half, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    let mut rejected = false;
    let (outcome, status) = match read_request(&mut reader, &state.limits).await {
        Ok(request) => {
            tracing::debug!(
                method = %request.method,
                target = %request.target,
                "Request received"
            );
            dispatch(&request, &mut writer, state).await
        }
        Err(error) => {
            rejected = true;
            reject(error, &mut writer, state).await
        }
    };

    if let Err(e) = writer.shutdown().await {
        tracing::trace!(error = %e, "Client shutdown failed");
    }
    if rejected {
        discard_pending(&mut reader).await;
    }

    if let Some(status) = status {
        metrics::record_request(outcome, status, started.elapsed());
        tracing::info!(
            connection_id = %id,
            peer = %peer,
            outcome,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request completed"
        );
    }
}

/// Read and drop what the client is still sending after a rejection, so
/// closing with unread input does not reset the connection before the
/// error response arrives.
async fn discard_pending<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut sink = tokio::io::sink();
    let mut limited = (&mut *reader).take(LINGER_MAX_BYTES);
    let _ = tokio::time::timeout(LINGER_TIMEOUT, tokio::io::copy(&mut limited, &mut sink)).await;
}

/// Answer a request that could not be read. Returns `None` for status
/// when nobody is left to answer.
async fn reject<W>(error: ProtocolError, writer: &mut W, state: &AppState) -> (&'static str, Option<u16>)
where
    W: AsyncWrite + Unpin,
{
    let Some(status) = error.status() else {
        tracing::debug!("Client closed before sending a request");
        return ("protocol_error", None);
    };

    tracing::debug!(error = %error, status = status.as_u16(), "Rejecting request");
    let message = match &error {
        ProtocolError::PayloadTooLarge { .. } => "Form too large",
        ProtocolError::MethodNotAllowed(_) => "Method not supported",
        _ => "Bad Request",
    };
    let mut response = Response::text(status, &state.server_name, message);
    if status == StatusCode::METHOD_NOT_ALLOWED {
        response = response.header("Allow", ALLOWED_METHODS);
    }

    send(&response, writer, true).await;
    ("protocol_error", Some(status.as_u16()))
}

/// Act on the session state of one request.
async fn dispatch<W>(
    request: &IncomingRequest,
    writer: &mut W,
    state: &AppState,
) -> (&'static str, Option<u16>)
where
    W: AsyncWrite + Unpin,
{
    let session = resolve(request);
    let outcome = session.name();
    let include_body = !request.is_head();
    let server = state.server_name.as_str();

    let response = match &session {
        SessionState::Reset { prefill } => {
            Response::html(StatusCode::OK, server, selection_form(prefill.as_deref()))
                .set_cookie(expired_cookie(PROXY_TARGET))
        }
        SessionState::NoSelection {
            prefill,
            stale_cookie,
        } => {
            let response = Response::html(StatusCode::OK, server, selection_form(prefill.as_deref()));
            if *stale_cookie {
                tracing::debug!("Expiring unusable ProxyTarget cookie");
                response.set_cookie(expired_cookie(PROXY_TARGET))
            } else {
                response
            }
        }
        SessionState::InvalidSubmission { candidate } => {
            tracing::info!(candidate = %candidate, "Rejected target submission");
            Response::text(StatusCode::BAD_REQUEST, server, "Invalid target URL")
        }
        SessionState::NewSelectionViaPost { target } => {
            tracing::info!(target = %target.as_submitted(), "Target selected");
            Response::new(StatusCode::SEE_OTHER, server)
                .header("Location", "/")
                .set_cookies(selection_cookies(target.as_submitted()))
                .body(Vec::new())
        }
        SessionState::NewSelectionViaQuery { .. } | SessionState::ActiveSession { .. } => {
            let Some(plan) = ForwardPlan::for_state(&session, request, &state.stream_suffixes) else {
                return (outcome, None);
            };
            if plan.streaming {
                return (outcome, relay(&plan, writer, state, include_body).await);
            }
            fetch(plan, state).await
        }
    };

    send(&response, writer, include_body).await;
    (outcome, Some(response.status()))
}

/// Buffered forward, always producing a response.
async fn fetch(plan: ForwardPlan, state: &AppState) -> Response {
    let server = state.server_name.as_str();
    let ForwardPlan {
        target,
        upstream_path,
        set_cookies,
        ..
    } = plan;

    match state.fetches.fetch(target.clone(), upstream_path.clone()).await {
        Ok(upstream) => {
            tracing::debug!(
                upstream = %target.authority(),
                path = %upstream_path,
                status = upstream.status,
                bytes = upstream.body.len(),
                truncated = upstream.truncated,
                "Upstream fetch complete"
            );
            let mut response = Response::with_reason(upstream.status, upstream.reason, server);
            for (name, value) in upstream.headers.iter() {
                if !HOP_BY_HOP.iter().any(|hop| name.eq_ignore_ascii_case(hop)) {
                    response.headers_mut().insert(name, value);
                }
            }
            response.body(upstream.body).set_cookies(set_cookies)
        }
        Err(error) => upstream_failure(&error, "Remote fetch failed", server),
    }
}

/// Streaming forward. On setup failure answers 502 itself; returns the
/// status actually sent, if any.
async fn relay<W>(
    plan: &ForwardPlan,
    writer: &mut W,
    state: &AppState,
    include_body: bool,
) -> Option<u16>
where
    W: AsyncWrite + Unpin,
{
    let result = state
        .streams
        .relay(
            &plan.target,
            &plan.upstream_path,
            writer,
            &plan.set_cookies,
            include_body,
        )
        .await;

    match result {
        Ok(summary) => {
            metrics::record_stream_bytes(summary.bytes);
            tracing::info!(
                upstream = %plan.target.authority(),
                path = %plan.upstream_path,
                bytes = summary.bytes,
                end = summary.end.as_str(),
                "Stream ended"
            );
            Some(summary.status)
        }
        Err(error) => {
            let response = upstream_failure(&error, "Stream setup failed", &state.server_name);
            send(&response, writer, include_body).await;
            Some(response.status())
        }
    }
}

/// 502 that clears the active target. `LastTarget` is kept.
fn upstream_failure(error: &UpstreamError, prefix: &str, server: &str) -> Response {
    metrics::record_upstream_failure(error.kind());
    tracing::warn!(error = %error, kind = error.kind(), "Upstream failure");
    Response::text(StatusCode::BAD_GATEWAY, server, format!("{}: {}", prefix, error))
        .set_cookie(expired_cookie(PROXY_TARGET))
}

async fn send<W>(response: &Response, writer: &mut W, include_body: bool)
where
    W: AsyncWrite + Unpin,
{
    if let Err(e) = response.write_to(writer, include_body).await {
        tracing::debug!(error = %e, status = response.status(), "Client went away before the response was written");
    }
}
