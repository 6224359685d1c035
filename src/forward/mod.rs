//! Upstream forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! ForwardPlan
//!     ├─ streaming == false → pool.rs (bounded spawn) → buffered.rs (reqwest GET, 16 MiB cap)
//!     └─ streaming == true  → streaming.rs → upstream.rs (TCP/TLS) → byte relay to client
//! ```
//!
//! # Design Decisions
//! - One upstream connection per request, closed afterwards
//! - No retries: a failure clears the session and the user re-selects
//! - Streaming has a setup deadline but no read timeout

pub mod buffered;
pub mod pool;
pub mod streaming;
pub mod upstream;

pub use buffered::BufferedForwarder;
pub use pool::FetchPool;
pub use streaming::{StreamEnd, StreamSummary, StreamingForwarder};

use std::time::Duration;
use thiserror::Error;

use crate::http::Headers;

/// Upstream failures. All of them degrade to a 502 for the client.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connect failure or malformed response on the buffered path.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// Failed before any byte reached the client on the streaming path.
    #[error("stream setup failed: {0}")]
    StreamSetup(String),

    /// The fetch task panicked or was cancelled.
    #[error("fetch worker failed: {0}")]
    Worker(String),

    /// The client could not be built at startup.
    #[error("client setup failed: {0}")]
    Client(String),
}

impl UpstreamError {
    /// Label used for the failure metric.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Unavailable(_) => "unavailable",
            UpstreamError::Timeout(_) => "timeout",
            UpstreamError::StreamSetup(_) => "stream_setup",
            UpstreamError::Worker(_) => "worker",
            UpstreamError::Client(_) => "client",
        }
    }
}

/// A fully buffered upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Set when the body hit the size cap and was cut short.
    pub truncated: bool,
}
