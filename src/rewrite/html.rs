//! HTML rewriting.
//!
//! The document is tokenized just far enough to tell comments, `<script>`
//! and `<style>` blocks and start tags apart. Start tags have their URL
//! attributes rewritten in place; everything between tags is copied through
//! byte for byte, so documents in any ASCII-compatible charset survive.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::bytes::{Captures, Regex};
use url::Url;

use super::links::{decode_entities, proxify_bytes, splice_group, HTTP_SCHEMES};
use super::{css, js};
use crate::config::RewriteConfig;

static HTML_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is-u)(?P<comment><!--.*?-->)|(?P<script_open><script\b(?:"[^"]*"|'[^']*'|[^'">])*>)(?P<script_body>.*?)(?P<script_close></script\s*>)|(?P<style_open><style\b(?:"[^"]*"|'[^']*'|[^'">])*>)(?P<style_body>.*?)(?P<style_close></style\s*>)|(?P<tag><[a-z][a-z0-9:-]*(?:"[^"]*"|'[^']*'|[^'">])*>)"#,
    )
    .expect("valid html token regex")
});

static TAG_PARTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is-u)^<([a-z][a-z0-9:-]*)(.*)>$").expect("valid tag regex"));

// Groups: 1 leading whitespace, 2 name, 3 "=", 4/5/6 double, single, unquoted value.
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s-u)(\s+)([^\s"'>/=]+)(?:(\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#)
        .expect("valid attribute regex")
});

static BASE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is-u)<base\b((?:"[^"]*"|'[^']*'|[^'">])*)>"#).expect("valid base regex")
});

static REFRESH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is-u)^\s*[0-9.]+\s*[;,]\s*(?:url\s*=\s*)?['"]?([^'"]+?)['"]?\s*$"#)
        .expect("valid refresh regex")
});

const VALUE_GROUPS: &[usize] = &[4, 5, 6];

/// Rewrite an HTML document fetched from `document`.
pub fn rewrite(html: &[u8], document: &Url, options: &RewriteConfig) -> Vec<u8> {
    let base = effective_base(html, document);

    HTML_TOKEN
        .replace_all(html, |caps: &Captures<'_>| {
            if let Some(open) = caps.name("script_open") {
                let body = caps.name("script_body").map_or(&b""[..], |m| m.as_bytes());
                let close = caps.name("script_close").map_or(&b""[..], |m| m.as_bytes());

                let mut out = rewrite_tag(open.as_bytes(), &base, options);
                if options.rewrite_scripts && is_javascript(open.as_bytes()) {
                    out.extend_from_slice(&js::rewrite(body, &base));
                } else {
                    out.extend_from_slice(body);
                }
                out.extend_from_slice(close);
                out
            } else if let Some(open) = caps.name("style_open") {
                let body = caps.name("style_body").map_or(&b""[..], |m| m.as_bytes());
                let close = caps.name("style_close").map_or(&b""[..], |m| m.as_bytes());

                let mut out = rewrite_tag(open.as_bytes(), &base, options);
                out.extend_from_slice(&css::rewrite(body, &base));
                out.extend_from_slice(close);
                out
            } else if let Some(tag) = caps.name("tag") {
                rewrite_tag(tag.as_bytes(), &base, options)
            } else {
                caps[0].to_vec()
            }
        })
        .into_owned()
}

/// The URL relative references resolve against: `<base href>` when present.
fn effective_base(html: &[u8], document: &Url) -> Url {
    BASE_TAG
        .captures(html)
        .and_then(|caps| attribute_value(&caps[1], "href"))
        .and_then(|href| document.join(&href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or_else(|| document.clone())
}

/// Rewrite one start tag. Returns an empty buffer when the tag is dropped.
fn rewrite_tag(tag: &[u8], base: &Url, options: &RewriteConfig) -> Vec<u8> {
    let Some(parts) = TAG_PARTS.captures(tag) else {
        return tag.to_vec();
    };
    let raw_name = &parts[1];
    let name = String::from_utf8_lossy(raw_name).to_ascii_lowercase();
    let attrs = &parts[2];

    let mut refresh = false;
    if name == "meta" {
        let http_equiv = attribute_value(attrs, "http-equiv").map(|v| v.to_ascii_lowercase());
        match http_equiv.as_deref() {
            Some("content-security-policy" | "content-security-policy-report-only" | "x-frame-options")
                if options.neutralize_frame_guards =>
            {
                return Vec::new();
            }
            Some("refresh") => refresh = true,
            _ => {}
        }
    }

    let rewritten = ATTRIBUTE.replace_all(attrs, |caps: &Captures<'_>| {
        let attr = String::from_utf8_lossy(&caps[2]).to_ascii_lowercase();
        match attr.as_str() {
            "integrity" if name == "script" || name == "link" => Vec::new(),
            "href" | "src" | "action" | "formaction" | "poster" | "background" | "cite"
            | "xlink:href" => splice_group(caps, VALUE_GROUPS, |raw| {
                proxify_bytes(raw, base, HTTP_SCHEMES, true)
            }),
            "data" if name == "object" => splice_group(caps, VALUE_GROUPS, |raw| {
                proxify_bytes(raw, base, HTTP_SCHEMES, true)
            }),
            "srcset" | "imagesrcset" => {
                splice_group(caps, VALUE_GROUPS, |raw| rewrite_srcset_bytes(raw, base))
            }
            "style" => splice_group(caps, VALUE_GROUPS, |raw| Some(css::rewrite_inline(raw, base))),
            "content" if refresh => splice_group(caps, VALUE_GROUPS, |raw| rewrite_refresh(raw, base)),
            _ => caps[0].to_vec(),
        }
    });

    let mut out = Vec::with_capacity(tag.len() + 64);
    out.push(b'<');
    out.extend_from_slice(raw_name);
    out.extend_from_slice(&rewritten);
    out.push(b'>');
    out
}

/// Look up an attribute on a start tag, entity-decoded and trimmed.
fn attribute_value(attrs: &[u8], wanted: &str) -> Option<String> {
    let caps = ATTRIBUTE
        .captures_iter(attrs)
        .find(|caps| caps[2].eq_ignore_ascii_case(wanted.as_bytes()))?;
    let raw = VALUE_GROUPS.iter().find_map(|&i| caps.get(i))?;
    let text = String::from_utf8_lossy(raw.as_bytes());
    Some(decode_entities(&text).trim().to_string())
}

fn is_javascript(open_tag: &[u8]) -> bool {
    let Some(parts) = TAG_PARTS.captures(open_tag) else {
        return true;
    };
    match attribute_value(&parts[2], "type") {
        None => true,
        Some(kind) => {
            let kind = kind.to_ascii_lowercase();
            kind.is_empty() || kind == "module" || kind.contains("javascript") || kind.contains("ecmascript")
        }
    }
}

fn rewrite_refresh(raw: &[u8], base: &Url) -> Option<Vec<u8>> {
    let caps = REFRESH.captures(raw)?;
    let out = splice_group(&caps, &[1], |target| proxify_bytes(target, base, HTTP_SCHEMES, true));
    (out != raw).then_some(out)
}

fn rewrite_srcset_bytes(raw: &[u8], base: &Url) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(raw).ok()?;
    let decoded: Cow<'_, str> = decode_entities(text);
    let out = rewrite_srcset(&decoded, base);
    (out != text).then(|| out.into_bytes())
}

/// Rewrite each candidate URL of a `srcset`, keeping descriptors and separators.
///
/// A candidate URL runs to the next whitespace; a URL ending in commas has
/// no descriptors. This keeps commas inside `data:` URLs intact.
pub fn rewrite_srcset(value: &str, base: &Url) -> String {
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(value.len() + 64);
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
            i += 1;
        }
        out.push_str(&value[start..i]);
        if i >= bytes.len() {
            break;
        }

        let url_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut url_end = i;
        while url_end > url_start && bytes[url_end - 1] == b',' {
            url_end -= 1;
        }

        let url = &value[url_start..url_end];
        match super::links::proxify(url, base) {
            Some(proxied) => out.push_str(&proxied),
            None => out.push_str(url),
        }
        out.push_str(&value[url_end..i]);
        if url_end < i {
            continue;
        }

        let descriptor_start = i;
        let mut depth = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => break,
                _ => {}
            }
            i += 1;
        }
        out.push_str(&value[descriptor_start..i]);
    }

    out
}
