//! Response header filtering and redirect interception.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use super::links::proxify;
use crate::config::RewriteConfig;

/// Connection-scoped headers that never cross a proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers describing a body or origin that no longer match what the client receives.
const BODY_AND_ORIGIN: &[&str] = &[
    "content-length",
    "content-encoding",
    "content-type",
    "set-cookie",
    "alt-svc",
    "strict-transport-security",
];

const FRAME_GUARDS: &[&str] = &[
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
];

/// Headers of the upstream response that may be passed on to the client.
///
/// `Location` and `Refresh` are rewritten to proxy paths resolved against
/// `target`; everything connection-, body- or origin-specific is dropped.
pub fn client_headers(upstream: &HeaderMap, target: &Url, options: &RewriteConfig) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());

    for (name, value) in upstream {
        let key = name.as_str();
        if HOP_BY_HOP.contains(&key) || BODY_AND_ORIGIN.contains(&key) {
            continue;
        }
        if options.neutralize_frame_guards && FRAME_GUARDS.contains(&key) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    rewrite_location(&mut headers, target);
    rewrite_refresh(&mut headers, target);
    headers
}

/// Point a redirect back through the proxy.
pub fn rewrite_location(headers: &mut HeaderMap, target: &Url) {
    let Some(location) = headers.get(header::LOCATION).and_then(|v| v.to_str().ok()) else {
        return;
    };
    if let Some(value) = proxify(location, target).and_then(|p| HeaderValue::from_str(&p).ok()) {
        tracing::debug!(location = %location, rewritten = ?value, "Rewriting redirect location");
        headers.insert(header::LOCATION, value);
    }
}

fn rewrite_refresh(headers: &mut HeaderMap, target: &Url) {
    let refresh = HeaderName::from_static("refresh");
    let Some(value) = headers.get(&refresh).and_then(|v| v.to_str().ok()) else {
        return;
    };
    let Some((delay, rest)) = value.split_once(|c: char| c == ';' || c == ',') else {
        return;
    };
    let rest = rest.trim_start();
    let reference = match rest.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("url=") => &rest[4..],
        _ => rest,
    };
    if let Some(proxied) = proxify(reference.trim_matches(|c: char| c == '"' || c == '\''), target) {
        if let Ok(new_value) = HeaderValue::from_str(&format!("{}; url={}", delay.trim(), proxied)) {
            headers.insert(refresh, new_value);
        }
    }
}
