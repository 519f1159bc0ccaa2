//! End-to-end request flow through the router against a local upstream.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tempfile::TempDir;
use tower::ServiceExt;

use unblock_proxy::upstream::FetchError;

mod common;
use common::{body_text, get, header, proxied, FailingFetcher, MockReply, MockUpstream};

fn clip() -> Vec<u8> {
    (0..4096u32).map(|i| (i % 256) as u8).collect()
}

async fn site() -> MockUpstream {
    MockUpstream::start(|target| match target {
        "/page" => MockReply::new(
            200,
            "text/html; charset=utf-8",
            r#"<html><head><link rel="stylesheet" href="style.css"></head>
<body><a href="/next">next</a><img src="https://cdn.test/logo.png"></body></html>"#,
        )
        .header("Set-Cookie", "session=abc")
        .header("Content-Security-Policy", "default-src 'self'"),
        "/style.css" => MockReply::new(200, "text/css", "body{background:url(/bg.png)}"),
        "/toc" => MockReply::new(200, "text/html", r#"<a href="/toc#top">top</a><h1 id="top">Contents</h1>"#),
        "/theme.css" => MockReply::new(200, "text/css", "a{color:red}")
            .header("ETag", "\"v7\"")
            .header("Cache-Control", "public, max-age=600"),
        "/clip.mp4" => MockReply::new(200, "video/mp4", clip()),
        "/old" => MockReply::new(302, "text/html", "").header("Location", "/new"),
        "/private" => MockReply::new(200, "text/html", "<p>secret</p>")
            .header("Cache-Control", "private, no-store"),
        t if t.starts_with("/search") => MockReply::new(200, "text/plain", "results"),
        _ => MockReply::new(404, "text/html", "<h1>nope</h1>"),
    })
    .await
}

#[tokio::test]
async fn test_html_links_are_rewritten_and_page_is_cached_in_memory() {
    let upstream = site().await;
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let path = proxied(&upstream.url("/page"));
    let first = get(&server, &path).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, "x-proxy-cache"), Some("MISS"));
    assert!(header(&first, "content-type").unwrap().starts_with("text/html"));
    assert!(header(&first, "set-cookie").is_none());
    assert!(header(&first, "content-security-policy").is_none());
    assert!(header(&first, "x-request-id").is_some());

    let html = body_text(first).await;
    assert!(html.contains(&proxied(&upstream.url("/next"))), "{}", html);
    assert!(html.contains(&proxied(&upstream.url("/style.css"))), "{}", html);
    assert!(html.contains(&proxied("https://cdn.test/logo.png")), "{}", html);

    let second = get(&server, &path).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header(&second, "x-proxy-cache"), Some("HIT-MEMORY"));
    assert!(header(&second, "set-cookie").is_none());
    assert_eq!(body_text(second).await, html);
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_fragment_links_share_one_target() {
    let upstream = site().await;
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let page = proxied(&upstream.url("/toc"));
    let html = body_text(get(&server, &page).await).await;
    assert!(html.contains(&format!("href=\"{}#top\"", page)), "{}", html);

    // A fragment that did reach the server still names the same document.
    let with_fragment = get(&server, &format!("{}%23top", page)).await;
    assert_eq!(with_fragment.status(), StatusCode::OK);
    assert_eq!(header(&with_fragment, "x-proxy-cache"), Some("HIT-MEMORY"));
    assert_eq!(upstream.hits(), 1);
    assert_eq!(upstream.requests(), vec!["/toc".to_string()]);
}

#[tokio::test]
async fn test_cache_hit_replays_upstream_headers() {
    let upstream = site().await;
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let path = proxied(&upstream.url("/theme.css"));
    let first = get(&server, &path).await;
    assert_eq!(header(&first, "etag"), Some("\"v7\""));

    let second = get(&server, &path).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header(&second, "x-proxy-cache"), Some("HIT-DISK"));
    assert_eq!(header(&second, "etag"), Some("\"v7\""));
    assert_eq!(header(&second, "cache-control"), Some("public, max-age=600"));
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_body_over_buffer_limit_is_relayed_uncached() {
    let upstream = site().await;
    let dir = TempDir::new().unwrap();
    let mut config = common::test_config(&dir);
    config.upstream.max_body_bytes = 1024;
    let server = common::server(config).await;

    let path = proxied(&upstream.url("/clip.mp4"));
    for _ in 0..2 {
        let response = get(&server, &path).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "content-type"), Some("video/mp4"));
        assert_eq!(header(&response, "x-proxy-cache"), Some("MISS"));
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), clip().as_slice());
    }
    assert_eq!(upstream.hits(), 2);
}

#[tokio::test]
async fn test_stylesheet_is_rewritten_and_cached_on_disk() {
    let upstream = site().await;
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let path = proxied(&upstream.url("/style.css"));
    let first = get(&server, &path).await;
    assert_eq!(first.status(), StatusCode::OK);
    let css = body_text(first).await;
    assert!(css.contains(&proxied(&upstream.url("/bg.png"))), "{}", css);

    let second = get(&server, &path).await;
    assert_eq!(header(&second, "x-proxy-cache"), Some("HIT-DISK"));
    assert!(header(&second, "content-type").unwrap().starts_with("text/css"));
    assert_eq!(body_text(second).await, css);
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_error_status_passes_through_uncached() {
    let upstream = site().await;
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let path = proxied(&upstream.url("/missing"));
    for _ in 0..2 {
        let response = get(&server, &path).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(header(&response, "x-proxy-cache"), Some("MISS"));
        assert!(body_text(response).await.contains("nope"));
    }
    assert_eq!(upstream.hits(), 2);
}

#[tokio::test]
async fn test_redirect_location_stays_on_proxy() {
    let upstream = site().await;
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let response = get(&server, &proxied(&upstream.url("/old"))).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let expected = proxied(&upstream.url("/new"));
    assert_eq!(header(&response, "location"), Some(expected.as_str()));

    get(&server, &proxied(&upstream.url("/old"))).await;
    assert_eq!(upstream.hits(), 2, "redirects are not cached");
}

#[tokio::test]
async fn test_no_store_responses_are_not_cached() {
    let upstream = site().await;
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let path = proxied(&upstream.url("/private"));
    get(&server, &path).await;
    let second = get(&server, &path).await;
    assert_eq!(header(&second, "x-proxy-cache"), Some("MISS"));
    assert_eq!(upstream.hits(), 2);
}

#[tokio::test]
async fn test_request_query_is_forwarded_in_sorted_order() {
    let upstream = site().await;
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let path = format!("{}?q=rust&a=1", proxied(&upstream.url("/search")));
    let response = get(&server, &path).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.requests(), vec!["/search?a=1&q=rust".to_string()]);
}

#[tokio::test]
async fn test_unresolvable_host_is_bad_gateway() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(FailingFetcher::new(|target| FetchError::HostUnreachable {
        host: target.host().unwrap_or_default().to_string(),
    }));
    let server = common::server_with(common::test_config(&dir), fetcher.clone()).await;

    let response = get(&server, &proxied("https://nowhere.invalid/")).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(body_text(response).await.contains("nowhere.invalid"));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_upstream_timeout_is_gateway_timeout() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(FailingFetcher::new(|target| FetchError::Timeout {
        host: target.host().unwrap_or_default().to_string(),
        secs: 30,
    }));
    let server = common::server_with(common::test_config(&dir), fetcher).await;

    let response = get(&server, &proxied("https://slow.test/")).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_unsupported_scheme_is_rejected_before_fetching() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(FailingFetcher::new(|_| FetchError::Other {
        host: String::new(),
        message: "unreachable".into(),
    }));
    let server = common::server_with(common::test_config(&dir), fetcher.clone()).await;

    let response = get(&server, &proxied("ftp://files.test/a.txt")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("ftp"));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_landing_page_and_robots() {
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let home = get(&server, "/").await;
    assert_eq!(home.status(), StatusCode::OK);
    assert!(body_text(home).await.contains("<form"));

    let robots = get(&server, "/robots.txt").await;
    assert_eq!(robots.status(), StatusCode::OK);
    assert_eq!(body_text(robots).await, "User-agent: *\nDisallow:");
}

#[tokio::test]
async fn test_static_file_wins_over_schemeless_target() {
    let dir = TempDir::new().unwrap();
    let static_dir = dir.path().join("public");
    std::fs::create_dir(&static_dir).unwrap();
    std::fs::write(static_dir.join("sw.js"), "// worker").unwrap();

    let mut config = common::test_config(&dir);
    config.shell.static_dir = Some(static_dir);
    let fetcher = Arc::new(FailingFetcher::new(|_| FetchError::Other {
        host: String::new(),
        message: "unreachable".into(),
    }));
    let server = common::server_with(config, fetcher.clone()).await;

    let response = get(&server, "/sw.js").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "// worker");
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_client_request_id_is_kept_and_other_methods_rejected() {
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let response = server
        .router()
        .oneshot(
            Request::get("/robots.txt")
                .header("x-request-id", "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(header(&response, "x-request-id"), Some("abc-123"));

    let response = server
        .router()
        .oneshot(Request::post("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
