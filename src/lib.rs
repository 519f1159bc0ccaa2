//! Unblocking web proxy library.
//!
//! A client asks for `/<percent-encoded target URL>`; the proxy fetches the
//! target, rewrites every link in it to point back through the proxy, caches
//! the result and returns it.

pub mod cache;
pub mod codec;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod rewrite;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
