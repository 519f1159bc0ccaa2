//! URL codec: maps target URLs into and out of the proxy's path space.
//!
//! # Data Flow
//! ```text
//! GET /https%3A%2F%2Fexample.com%2Fpage?b=2&a=1
//!     → strip mount prefix "/"
//!     → percent-decode once          "https://example.com/page"
//!     → append sorted inbound query  "https://example.com/page?a=1&b=2"
//!     → default scheme to https
//!     → parse → TargetReference
//!
//! TargetReference / resolved Url
//!     → encode → "https%3A%2F%2Fexample.com%2Fpage%3Fa%3D1%26b%3D2"
//!     → proxy_path → "/https%3A%2F%2F..."
//! ```

pub mod target;

pub use target::TargetReference;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::{form_urlencoded, Url};

/// Errors raised while turning a request path into a target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// No target was given after the mount prefix.
    #[error("no target URL given")]
    Empty,

    /// The decoded text is not a parseable URL.
    #[error("'{input}' is not a valid URL: {reason}")]
    Malformed { input: String, reason: String },

    /// The target uses a scheme the fetcher cannot speak.
    #[error("'{scheme}' URLs cannot be proxied")]
    UnsupportedScheme { scheme: String },
}

static SCHEME_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("valid scheme regex"));

// Some clients and intermediaries merge "//" in paths, leaving "https:/host".
static COLLAPSED_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)(https?):/([^/])").expect("valid collapsed scheme regex"));

/// Decode a path segment with no inbound query.
pub fn decode(segment: &str) -> Result<TargetReference, DecodeError> {
    decode_with_query(segment, None)
}

/// Decode a path segment, appending the inbound request's query parameters.
///
/// Query pairs are re-serialized sorted by key so equivalent requests share
/// one cache key.
pub fn decode_with_query(segment: &str, query: Option<&str>) -> Result<TargetReference, DecodeError> {
    if segment.trim().is_empty() {
        return Err(DecodeError::Empty);
    }

    let decoded = urlencoding::decode(segment).map_err(|e| DecodeError::Malformed {
        input: segment.to_string(),
        reason: e.to_string(),
    })?;
    let mut target = decoded.trim().to_string();
    if let Some(hash) = target.find('#') {
        target.truncate(hash);
    }
    if target.is_empty() {
        return Err(DecodeError::Empty);
    }

    if let Some(query) = query.map(normalize_query).filter(|q| !q.is_empty()) {
        target.push(if target.contains('?') { '&' } else { '?' });
        target.push_str(&query);
    }

    let target = COLLAPSED_SCHEME.replace(&target, "$1://$2").into_owned();
    let target = if SCHEME_PREFIX.is_match(&target) {
        target
    } else {
        format!("https://{}", target)
    };

    let mut url = Url::parse(&target).map_err(|e| DecodeError::Malformed {
        input: target.clone(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(DecodeError::UnsupportedScheme {
                scheme: other.to_string(),
            })
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(DecodeError::Malformed {
            input: target,
            reason: "missing host".to_string(),
        });
    }

    url.set_fragment(None);
    Ok(TargetReference::new(url))
}

/// Encode a target as a path segment (no leading slash).
pub fn encode(target: &TargetReference) -> String {
    encode_url(target.url())
}

/// Encode any absolute URL as a path segment.
pub fn encode_url(url: &Url) -> String {
    urlencoding::encode(url.as_str()).into_owned()
}

/// Proxy-relative path for an absolute URL, as written into rewritten content.
pub fn proxy_path(url: &Url) -> String {
    format!("/{}", encode_url(url))
}

fn normalize_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}
