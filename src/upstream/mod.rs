//! Upstream fetching subsystem.
//!
//! # Data Flow
//! ```text
//! TargetReference + inbound headers
//!     → client.rs (resolve host, forward safe header subset, no redirects)
//!     → retry.rs (bounded, jittered retries when enabled)
//!     → decompress.rs (gzip / deflate / br, Content-Encoding stripped)
//!     → UpstreamResponse (immutable, handed to the rewriter)
//! ```
//!
//! A body past `max_body_bytes` is not buffered: the response carries what was
//! read so far plus the live remainder, still encoded, for passthrough.
//!
//! # Design Decisions
//! - Redirects are intercepted, never followed; the handler rewrites `Location`
//! - Non-2xx statuses are successful fetches, the client sees the real error page
//! - `Fetcher` is a trait so a headless renderer or test double can stand in

pub mod client;
pub mod decompress;
pub mod retry;

pub use client::HttpFetcher;
pub use decompress::DecompressError;

use std::fmt;
use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, StatusCode};
use bytes::Bytes;
use futures_util::Stream;
use thiserror::Error;

use crate::codec::TargetReference;

/// Produces the upstream view of a target.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `target`, forwarding what is safe from the inbound request headers.
    async fn fetch(
        &self,
        target: &TargetReference,
        inbound: &HeaderMap,
    ) -> Result<UpstreamResponse, FetchError>;
}

/// Unread tail of an upstream body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// An upstream response, normally with its body fully read and decompressed.
pub struct UpstreamResponse {
    pub status: StatusCode,
    /// Upstream headers, minus `Content-Encoding`/`Content-Length` once decoded.
    pub headers: HeaderMap,
    pub content_type: Option<String>,
    /// Encoding still applied to `body` when it could not be decoded.
    pub content_encoding: Option<String>,
    pub body: Bytes,
    /// Present when the body outgrew the buffer: `body` is the raw prefix
    /// already read and the rest follows from this stream.
    pub remainder: Option<BodyStream>,
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_type", &self.content_type)
            .field("content_encoding", &self.content_encoding)
            .field("body", &self.body.len())
            .field("streaming", &self.remainder.is_some())
            .finish()
    }
}

impl UpstreamResponse {
    /// Build a response from parts, reading the content type from the headers.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_encoding = headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Self {
            status,
            headers,
            content_type,
            content_encoding,
            body: body.into(),
            remainder: None,
        }
    }

    /// A response relayed as-is: `prefix` was read before the limit was hit.
    pub fn passthrough(status: StatusCode, headers: HeaderMap, prefix: Bytes, remainder: BodyStream) -> Self {
        let mut response = Self::new(status, headers, prefix);
        response.remainder = Some(remainder);
        response
    }

    /// True when upstream asked for the response not to be stored.
    pub fn forbids_storage(&self) -> bool {
        self.headers
            .get_all(header::CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
    }
}

/// Errors from the fetch pipeline. None of them carry request headers or cookies.
#[derive(Debug, Error)]
pub enum FetchError {
    /// DNS resolution of the target host failed.
    #[error("upstream unreachable: could not resolve host '{host}'")]
    HostUnreachable { host: String },

    /// The fetch did not complete within the configured timeout.
    #[error("upstream '{host}' timed out after {secs}s")]
    Timeout { host: String, secs: u64 },

    /// The connection was refused or reset before a response arrived.
    #[error("upstream unreachable: connection to '{host}' failed")]
    ConnectionRefused { host: String },

    /// TLS negotiation with the upstream failed.
    #[error("upstream unreachable: TLS handshake with '{host}' failed")]
    Tls { host: String },

    /// The body claimed an encoding it could not be decoded from.
    #[error("upstream body from '{host}' could not be decoded: {source}")]
    Body {
        host: String,
        #[source]
        source: DecompressError,
    },

    /// Any other client failure.
    #[error("upstream request to '{host}' failed: {message}")]
    Other { host: String, message: String },
}

impl FetchError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::HostUnreachable { .. } => "host_unreachable",
            FetchError::Timeout { .. } => "timeout",
            FetchError::ConnectionRefused { .. } => "connection_refused",
            FetchError::Tls { .. } => "tls",
            FetchError::Body { .. } => "body",
            FetchError::Other { .. } => "other",
        }
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout { .. } | FetchError::ConnectionRefused { .. }
        )
    }
}
