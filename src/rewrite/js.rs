//! Script rewriting for the network calls that take a literal URL.
//!
//! Only string literals are touched: `fetch("...")`, `new WebSocket("...")`
//! and `xhr.open("GET", "...")`. URLs assembled at runtime are out of reach
//! of a textual rewrite and are left alone.

use once_cell::sync::Lazy;
use regex::bytes::{Captures, Regex};
use url::Url;

use super::links::{proxify_bytes, splice_group, HTTP_SCHEMES, SOCKET_SCHEMES};

// Template literals are only rewritten when they contain no substitutions.
const LITERAL: &str = r#"(?:"([^"\\\r\n]*)"|'([^'\\\r\n]*)'|`([^`\\$]*)`)"#;

static FETCH_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?-u)\bfetch\(\s*{}", LITERAL)).expect("valid fetch regex")
});

static WEBSOCKET_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?-u)\bnew\s+WebSocket\(\s*{}", LITERAL)).expect("valid websocket regex")
});

static XHR_OPEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r#"(?-u)\.open\(\s*["'][A-Za-z]+["']\s*,\s*{}"#,
        LITERAL
    ))
    .expect("valid xhr open regex")
});

/// Rewrite literal URLs passed to network calls in `script`.
pub fn rewrite(script: &[u8], base: &Url) -> Vec<u8> {
    let http = |raw: &[u8]| proxify_bytes(raw, base, HTTP_SCHEMES, false);
    let socket = |raw: &[u8]| proxify_bytes(raw, base, SOCKET_SCHEMES, false);

    let pass = FETCH_CALL.replace_all(script, |caps: &Captures<'_>| splice_group(caps, &[1, 2, 3], http));
    let pass = XHR_OPEN
        .replace_all(&pass, |caps: &Captures<'_>| splice_group(caps, &[1, 2, 3], http))
        .into_owned();
    WEBSOCKET_CALL
        .replace_all(&pass, |caps: &Captures<'_>| splice_group(caps, &[1, 2, 3], socket))
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(js: &str) -> String {
        let base = Url::parse("https://app.example.com/index.html").unwrap();
        String::from_utf8(rewrite(js.as_bytes(), &base)).unwrap()
    }

    #[test]
    fn test_fetch_literal() {
        assert_eq!(
            run(r#"fetch("/api/items", { method: "GET" })"#),
            r#"fetch("/https%3A%2F%2Fapp.example.com%2Fapi%2Fitems", { method: "GET" })"#
        );
        assert_eq!(
            run("window.fetch('https://cdn.example.net/data.json')"),
            "window.fetch('/https%3A%2F%2Fcdn.example.net%2Fdata.json')"
        );
    }

    #[test]
    fn test_xhr_open() {
        assert_eq!(
            run(r#"xhr.open("POST", "/submit", true)"#),
            r#"xhr.open("POST", "/https%3A%2F%2Fapp.example.com%2Fsubmit", true)"#
        );
    }

    #[test]
    fn test_websocket() {
        assert_eq!(
            run("const ws = new WebSocket(`wss://live.example.com/feed`);"),
            "const ws = new WebSocket(`/wss%3A%2F%2Flive.example.com%2Ffeed`);"
        );
    }

    #[test]
    fn test_dynamic_urls_are_left_alone() {
        for js in [
            "fetch(url)",
            "fetch(`/api/${id}`)",
            "fetch(\"/a\\\"b\")",
            "prefetch = 1; refetch(\"/x\")",
            "window.open(\"/popup\")",
        ] {
            assert_eq!(run(js), js);
        }
    }
}
