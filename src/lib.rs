//! Nomad Proxy library.
//!
//! A single-target HTTP forwarding proxy. Each browser picks an upstream
//! through a small form; the choice lives in a cookie and every later
//! request is forwarded to it, with continuous-image streams relayed
//! chunk by chunk.

// Core subsystems
pub mod config;
pub mod forward;
pub mod http;
pub mod net;
pub mod session;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use net::Listener;
