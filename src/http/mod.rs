//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (one task per connection, one request per connection)
//!     → request.rs (request line, headers, small form body)
//!     → [session layer resolves the state]
//!     → form.rs (selection page) | [forward layer]
//!     → response.rs (status, headers, Set-Cookie lines, body)
//!     → Connection closed
//! ```
//!
//! # Design Decisions
//! - Minimal HTTP/1.1: no keep-alive, no chunked request bodies, no pipelining
//! - Parsing is lenient where browsers and cameras are sloppy (header lines),
//!   strict where memory is at stake (sizes)

pub mod form;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;

pub use headers::Headers;
pub use request::{read_request, IncomingRequest, ProtocolError};
pub use response::Response;
pub use server::{serve_connection, AppState, HttpServer};
