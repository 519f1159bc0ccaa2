//! Content rewriting subsystem.
//!
//! # Data Flow
//! ```text
//! UpstreamResponse (decoded body, declared Content-Type)
//!     → ContentKind::detect (declared type, else sniff, else file extension)
//!     → html.rs / css.rs / js.rs   (every fetchable reference → proxy path)
//!     → headers.rs                 (hop-by-hop and frame guards dropped, Location rewritten)
//!     → RewrittenDocument
//! ```
//!
//! # Design Decisions
//! - Rewriting works on bytes, so documents in any ASCII-compatible charset pass through
//! - References that cannot be resolved are left exactly as written
//! - Bodies of any other type are returned untouched, without a copy

pub mod css;
pub mod headers;
pub mod html;
pub mod js;
pub mod links;

use axum::http::HeaderMap;
use bytes::Bytes;

use crate::codec::TargetReference;
use crate::config::RewriteConfig;
use crate::upstream::UpstreamResponse;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// What a body is, as far as rewriting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    Script,
    Other,
}

impl ContentKind {
    /// Classify a declared `Content-Type` value.
    pub fn from_content_type(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "text/html" | "application/xhtml+xml" => ContentKind::Html,
            "text/css" => ContentKind::Css,
            "application/javascript"
            | "text/javascript"
            | "application/x-javascript"
            | "application/ecmascript"
            | "text/ecmascript" => ContentKind::Script,
            _ => ContentKind::Other,
        }
    }

    /// Determine the kind and effective content type of a body.
    ///
    /// A declared type wins. Otherwise the body is sniffed for markup and
    /// finally the target's file extension is consulted.
    pub fn detect(content_type: Option<&str>, body: &[u8], target: &TargetReference) -> (Self, String) {
        if let Some(declared) = content_type.map(str::trim).filter(|ct| !ct.is_empty()) {
            return (Self::from_content_type(declared), declared.to_string());
        }

        if looks_like_html(body) {
            return (ContentKind::Html, "text/html".to_string());
        }

        let guessed = mime_guess::from_path(target.url().path())
            .first_raw()
            .unwrap_or(OCTET_STREAM);
        (Self::from_content_type(guessed), guessed.to_string())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Html => "html",
            ContentKind::Css => "css",
            ContentKind::Script => "script",
            ContentKind::Other => "other",
        }
    }
}

fn looks_like_html(body: &[u8]) -> bool {
    let body = body.strip_prefix(b"\xef\xbb\xbf").unwrap_or(body);
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let head = &body[start..body.len().min(start + 16)];
    [&b"<!doctype html"[..], b"<html", b"<head", b"<body"]
        .iter()
        .any(|marker| head.len() >= marker.len() && head[..marker.len()].eq_ignore_ascii_case(marker))
}

/// A body ready to be served and cached.
#[derive(Debug, Clone)]
pub struct RewrittenDocument {
    pub kind: ContentKind,
    pub content_type: String,
    /// Coding still applied to `body`; only set for bodies passed through undecoded.
    pub content_encoding: Option<String>,
    pub body: Bytes,
}

/// Rewrites fetched content so every reference routes back through the proxy.
#[derive(Debug, Clone, Default)]
pub struct Rewriter {
    options: RewriteConfig,
}

impl Rewriter {
    pub fn new(options: RewriteConfig) -> Self {
        Self { options }
    }

    /// Rewrite `body` fetched from `target`.
    pub fn rewrite(&self, body: &Bytes, content_type: Option<&str>, target: &TargetReference) -> RewrittenDocument {
        let (kind, content_type) = ContentKind::detect(content_type, body, target);
        let base = target.url();

        let body = match kind {
            ContentKind::Html => Bytes::from(html::rewrite(body, base, &self.options)),
            ContentKind::Css => Bytes::from(css::rewrite(body, base)),
            ContentKind::Script if self.options.rewrite_scripts => Bytes::from(js::rewrite(body, base)),
            ContentKind::Script | ContentKind::Other => body.clone(),
        };

        RewrittenDocument {
            kind,
            content_type,
            content_encoding: None,
            body,
        }
    }

    /// Rewrite an upstream response body. Bodies still carrying an unknown
    /// coding cannot be inspected and pass through as-is.
    pub fn rewrite_response(&self, upstream: &UpstreamResponse, target: &TargetReference) -> RewrittenDocument {
        match &upstream.content_encoding {
            Some(encoding) => RewrittenDocument {
                kind: ContentKind::Other,
                content_type: upstream
                    .content_type
                    .clone()
                    .unwrap_or_else(|| OCTET_STREAM.to_string()),
                content_encoding: Some(encoding.clone()),
                body: upstream.body.clone(),
            },
            None => self.rewrite(&upstream.body, upstream.content_type.as_deref(), target),
        }
    }

    /// Upstream headers that are passed on to the client.
    pub fn response_headers(&self, upstream: &HeaderMap, target: &TargetReference) -> HeaderMap {
        headers::client_headers(upstream, target.url(), &self.options)
    }
}
