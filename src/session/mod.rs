//! Target selection subsystem.
//!
//! # Data Flow
//! ```text
//! IncomingRequest
//!     → state.rs (cookies + submission → SessionState)
//!     → target.rs (validate candidate / cookie value)
//!     → paths.rs (upstream path, query filtering, stream detection)
//!     → ForwardPlan handed to a forwarder
//! ```
//!
//! # Design Decisions
//! - All session state lives in client cookies; nothing is shared between
//!   connections
//! - A corrupted cookie degrades to "no session", never to an error

pub mod cookies;
pub mod paths;
pub mod state;
pub mod target;

pub use state::{resolve, SessionState, RESET_PATH};
pub use target::{validate, Scheme, Target};

use crate::http::IncomingRequest;

/// Everything a forwarder needs for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPlan {
    pub target: Target,
    /// Path and query sent upstream.
    pub upstream_path: String,
    /// Cookies to set on the response that carries data.
    pub set_cookies: Vec<String>,
    /// Use the streaming relay instead of a buffered fetch.
    pub streaming: bool,
}

impl ForwardPlan {
    /// Plan a forward for a state that leads to one; `None` otherwise.
    pub fn for_state(
        state: &SessionState,
        request: &IncomingRequest,
        stream_suffixes: &[String],
    ) -> Option<Self> {
        let (target, upstream_path, set_cookies) = match state {
            SessionState::NewSelectionViaQuery { target } => (
                target,
                paths::upstream_path(target, None, request.query()),
                cookies::selection_cookies(target.as_submitted()),
            ),
            SessionState::ActiveSession { target } => (
                target,
                paths::upstream_path(target, Some(request.path()), request.query()),
                Vec::new(),
            ),
            _ => return None,
        };

        Some(Self {
            streaming: paths::is_stream_path(&upstream_path, stream_suffixes),
            target: target.clone(),
            upstream_path,
            set_cookies,
        })
    }
}
