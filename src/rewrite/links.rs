//! Resolution of a single reference into its proxy path.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::bytes::Captures;
use regex::Regex;
use url::Url;

use crate::codec;

/// Schemes fetched through the proxy.
pub const HTTP_SCHEMES: &[&str] = &["http", "https"];

/// Schemes accepted where a WebSocket endpoint is expected.
pub const SOCKET_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

static EXPLICIT_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*):").expect("valid scheme regex"));

/// Resolve `reference` against `base` and encode it as a proxy path.
///
/// Returns `None` when the reference must be left exactly as written:
/// empty values, fragments, foreign schemes (`data:`, `mailto:`,
/// `javascript:`, ...) and anything that fails to resolve.
pub fn proxify(reference: &str, base: &Url) -> Option<String> {
    proxify_with(reference, base, HTTP_SCHEMES)
}

pub fn proxify_with(reference: &str, base: &Url, schemes: &[&str]) -> Option<String> {
    let trimmed = reference.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    if let Some(caps) = EXPLICIT_SCHEME.captures(trimmed) {
        let scheme = caps[1].to_ascii_lowercase();
        if !schemes.contains(&scheme.as_str()) {
            return None;
        }
    }

    let mut resolved = base.join(trimmed).ok()?;
    if !schemes.contains(&resolved.scheme()) || resolved.host_str().is_none() {
        return None;
    }

    // The fragment stays with the browser; it is not part of the target.
    let fragment = resolved.fragment().map(str::to_string);
    resolved.set_fragment(None);
    let mut path = codec::proxy_path(&resolved);
    if let Some(fragment) = fragment {
        path.push('#');
        path.push_str(&fragment);
    }
    Some(path)
}

/// Byte-level wrapper: the reference must be UTF-8 to be rewritten.
pub fn proxify_bytes(raw: &[u8], base: &Url, schemes: &[&str], html_escaped: bool) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(raw).ok()?;
    let text = if html_escaped {
        decode_entities(text)
    } else {
        Cow::Borrowed(text)
    };
    proxify_with(&text, base, schemes).map(String::into_bytes)
}

/// Rebuild a match with the first participating group in `groups` replaced.
///
/// Everything outside the group (quotes, whitespace, surrounding syntax) is
/// copied through untouched, and so is the group itself when `rewrite`
/// declines.
pub fn splice_group<F>(caps: &Captures<'_>, groups: &[usize], rewrite: F) -> Vec<u8>
where
    F: FnOnce(&[u8]) -> Option<Vec<u8>>,
{
    let whole = &caps[0];
    let whole_start = caps.get(0).map_or(0, |m| m.start());

    let Some(group) = groups.iter().find_map(|&i| caps.get(i)) else {
        return whole.to_vec();
    };
    let Some(replacement) = rewrite(group.as_bytes()) else {
        return whole.to_vec();
    };

    let start = group.start() - whole_start;
    let end = group.end() - whole_start;
    let mut out = Vec::with_capacity(whole.len() + replacement.len());
    out.extend_from_slice(&whole[..start]);
    out.extend_from_slice(&replacement);
    out.extend_from_slice(&whole[end..]);
    out
}

/// Decode the character references that commonly appear inside URL attributes.
pub fn decode_entities(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    let mut out = value.to_string();
    for (entity, ch) in [
        ("&quot;", "\""),
        ("&#34;", "\""),
        ("&apos;", "'"),
        ("&#39;", "'"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&#38;", "&"),
        ("&#x26;", "&"),
        ("&amp;", "&"),
    ] {
        out = out.replace(entity, ch);
    }
    Cow::Owned(out)
}
