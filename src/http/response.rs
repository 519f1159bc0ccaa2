//! Mapping of pipeline failures to HTTP responses.
//!
//! Bodies are plain text naming the offending input or host. They never echo
//! request headers or cookies.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::codec::DecodeError;
use crate::upstream::FetchError;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The request path does not name a usable target.
    #[error("bad request: {0}")]
    Decode(#[from] DecodeError),

    /// The target could not be fetched.
    #[error("{0}")]
    Fetch(#[from] FetchError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Decode(_) => StatusCode::BAD_REQUEST,
            ProxyError::Fetch(FetchError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Fetch(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("{}\n", self),
        )
            .into_response()
    }
}
