//! Inbound request dispatch.
//!
//! # States
//! ```text
//! "/"                         Empty        → landing page
//! "/robots.txt"               static       → robots policy
//! "/<file>" in static dir     static       → file as-is
//! "/<encoded target>[?query]" CacheLookup  → hit: cached body
//!                             Fetching     → fetch → rewrite → store → respond
//!                                          → oversized body: relay as-is
//! ```
//! Every state ends in a response; nothing outlives the request.

use std::io;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::{stream, StreamExt};

use crate::cache::{CacheEntry, Tier};
use crate::codec;
use crate::http::request;
use crate::http::response::ProxyError;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::rewrite::{RewrittenDocument, OCTET_STREAM};
use crate::upstream::{BodyStream, UpstreamResponse};

/// Response header reporting how the body was produced.
pub const X_PROXY_CACHE: HeaderName = HeaderName::from_static("x-proxy-cache");

enum Route<'a> {
    Empty,
    Robots,
    Target(&'a str),
}

fn route(segment: &str) -> Route<'_> {
    match segment {
        "" => Route::Empty,
        "robots.txt" => Route::Robots,
        other => Route::Target(other),
    }
}

/// Entry point for every GET/HEAD request.
pub async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();
    let request_id = request::request_id(&headers).to_string();

    // The raw path keeps its percent-encoding; the codec decodes exactly once.
    let path = uri.path();
    let segment = path.strip_prefix('/').unwrap_or(path);

    let (response, cache) = match route(segment) {
        Route::Empty => (state.shell.home().await, "none"),
        Route::Robots => (state.shell.robots(), "none"),
        Route::Target(segment) => match state.shell.file(segment).await {
            Some(response) => (response, "none"),
            None => match serve_target(&state, segment, uri.query(), &headers).await {
                Ok(served) => served,
                Err(e) => {
                    tracing::warn!(
                        request_id = %request_id,
                        status = e.status().as_u16(),
                        error = %e,
                        "Proxy request failed"
                    );
                    (e.into_response(), "none")
                }
            },
        },
    };

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        status = response.status().as_u16(),
        cache,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Request complete"
    );
    metrics::record_request(method.as_str(), response.status().as_u16(), cache, start);
    response
}

/// CacheLookup, then Fetching on a miss.
async fn serve_target(
    state: &AppState,
    segment: &str,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<(Response, &'static str), ProxyError> {
    let target = codec::decode_with_query(segment, query)?;

    if let Some(entry) = state.cache.lookup(target.cache_key()).await {
        let tier = entry.tier.as_str();
        tracing::debug!(url = %target, tier, "Cache hit");
        return Ok((cached_response(entry), tier));
    }

    let mut upstream = state.fetcher.fetch(&target, headers).await.map_err(|e| {
        metrics::record_upstream_error(e.kind());
        e
    })?;
    let client_headers = state.rewriter.response_headers(&upstream.headers, &target);

    if let Some(remainder) = upstream.remainder.take() {
        tracing::info!(url = %target, status = upstream.status.as_u16(), "Relaying oversized body uncached");
        return Ok((relayed_response(upstream, client_headers, remainder), "relay"));
    }

    let document = state.rewriter.rewrite_response(&upstream, &target);

    tracing::info!(
        url = %target,
        status = upstream.status.as_u16(),
        kind = document.kind.as_str(),
        bytes = document.body.len(),
        "Fetched"
    );

    if is_cacheable(state, &upstream, &document) {
        let entry = CacheEntry::new(
            target.cache_key(),
            document.body.clone(),
            document.content_type.clone(),
        )
        .with_response(upstream.status, client_headers.clone());
        state.cache.store(entry).await;
    }

    Ok((fresh_response(upstream.status, client_headers, document), "miss"))
}

/// Only complete, successful, storable bodies are cached. Redirects and
/// error pages never are.
fn is_cacheable(state: &AppState, upstream: &UpstreamResponse, document: &RewrittenDocument) -> bool {
    if !upstream.status.is_success() || document.content_encoding.is_some() {
        return false;
    }
    if state.respect_no_store && upstream.forbids_storage() {
        tracing::debug!("Upstream forbids storage, not caching");
        return false;
    }
    true
}

fn fresh_response(status: StatusCode, mut headers: HeaderMap, document: RewrittenDocument) -> Response {
    set_header(&mut headers, header::CONTENT_TYPE, &document.content_type);
    if let Some(encoding) = &document.content_encoding {
        set_header(&mut headers, header::CONTENT_ENCODING, encoding);
    }
    headers.insert(X_PROXY_CACHE, HeaderValue::from_static("MISS"));

    (status, headers, Body::from(document.body)).into_response()
}

/// The bytes already read, then the rest of the upstream body, untouched.
fn relayed_response(upstream: UpstreamResponse, mut headers: HeaderMap, remainder: BodyStream) -> Response {
    let content_type = upstream.content_type.as_deref().unwrap_or(OCTET_STREAM);
    set_header(&mut headers, header::CONTENT_TYPE, content_type);
    if let Some(encoding) = &upstream.content_encoding {
        set_header(&mut headers, header::CONTENT_ENCODING, encoding);
    }
    headers.insert(X_PROXY_CACHE, HeaderValue::from_static("MISS"));

    let status = upstream.status;
    let prefix = upstream.body;
    let body = Body::from_stream(stream::once(async move { Ok::<_, io::Error>(prefix) }).chain(remainder));
    (status, headers, body).into_response()
}

/// Replays the stored status and headers, then labels the tier.
fn cached_response(entry: CacheEntry) -> Response {
    let mut headers = entry.headers;
    set_header(&mut headers, header::CONTENT_TYPE, &entry.content_type);
    let label = match entry.tier {
        Tier::Memory => "HIT-MEMORY",
        Tier::Disk => "HIT-DISK",
    };
    headers.insert(X_PROXY_CACHE, HeaderValue::from_static(label));

    (entry.status, headers, Body::from(entry.payload)).into_response()
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "Dropping header with invalid value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_classification() {
        assert!(matches!(route(""), Route::Empty));
        assert!(matches!(route("robots.txt"), Route::Robots));
        assert!(matches!(
            route("https%3A%2F%2Fexample.com%2Frobots.txt"),
            Route::Target("https%3A%2F%2Fexample.com%2Frobots.txt")
        ));
        assert!(matches!(route("example.com"), Route::Target("example.com")));
    }
}
