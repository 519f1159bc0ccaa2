//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID)
//!     → handler.rs (route: landing page, static file, or proxied target)
//!         → codec → cache → upstream → rewrite → cache
//!     → response.rs (errors to status codes)
//!     → Send to client
//! ```

pub mod handler;
pub mod request;
pub mod response;
pub mod server;
pub mod shell;

pub use handler::X_PROXY_CACHE;
pub use request::X_REQUEST_ID;
pub use response::ProxyError;
pub use server::{AppState, HttpServer, ServerError};
