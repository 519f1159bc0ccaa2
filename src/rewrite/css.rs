//! Stylesheet rewriting: `url(...)` references and `@import` strings.

use once_cell::sync::Lazy;
use regex::bytes::{Captures, Regex};
use url::Url;

use super::links::{proxify_bytes, splice_group, HTTP_SCHEMES};

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i-u)\burl\(\s*(?:"([^"\r\n]*)"|'([^'\r\n]*)'|([^"'\s)]+))\s*\)"#)
        .expect("valid css url regex")
});

// `@import url(...)` is covered by CSS_URL; this handles the bare string form.
static CSS_IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i-u)@import\s+(?:"([^"\r\n]*)"|'([^'\r\n]*)')"#).expect("valid css import regex")
});

static ESCAPED_QUOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i-u)&(?:(quot|#34|#x22)|apos|#39|#x27);").expect("valid entity regex")
});

/// Rewrite every stylesheet reference in `css` to its proxy path.
pub fn rewrite(css: &[u8], base: &Url) -> Vec<u8> {
    rewrite_with(css, base, false)
}

/// Rewrite a `style` attribute value, which may carry HTML character references.
///
/// Escaped quotes are unescaped for matching and escaped again afterwards.
pub fn rewrite_inline(css: &[u8], base: &Url) -> Vec<u8> {
    if !ESCAPED_QUOTE.is_match(css) {
        return rewrite_with(css, base, true);
    }
    let unescaped = ESCAPED_QUOTE.replace_all(css, |caps: &Captures<'_>| {
        if caps.get(1).is_some() {
            b"\"".to_vec()
        } else {
            b"'".to_vec()
        }
    });
    let rewritten = rewrite_with(&unescaped, base, true);
    let mut out = Vec::with_capacity(rewritten.len() + 16);
    for &byte in &rewritten {
        match byte {
            b'"' => out.extend_from_slice(b"&quot;"),
            b'\'' => out.extend_from_slice(b"&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn rewrite_with(css: &[u8], base: &Url, html_escaped: bool) -> Vec<u8> {
    let rewrite_ref = |raw: &[u8]| proxify_bytes(raw, base, HTTP_SCHEMES, html_escaped);

    let pass = CSS_URL.replace_all(css, |caps: &Captures<'_>| {
        splice_group(caps, &[1, 2, 3], rewrite_ref)
    });
    CSS_IMPORT
        .replace_all(&pass, |caps: &Captures<'_>| splice_group(caps, &[1, 2], rewrite_ref))
        .into_owned()
}
