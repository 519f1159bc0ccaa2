//! Serving over a real socket and draining on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;

use unblock_proxy::Shutdown;

mod common;
use common::{proxied, MockReply, MockUpstream};

#[tokio::test]
async fn test_serves_over_tcp_and_stops_on_shutdown() {
    let upstream = MockUpstream::start(|_| MockReply::new(200, "text/html", "<a href=\"/a\">a</a>")).await;
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Arc::new(Shutdown::new());

    let handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(listener, &shutdown).await })
    };

    let client = reqwest::Client::new();
    let url = format!("http://{}{}", addr, proxied(&upstream.url("/")));
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-proxy-cache").unwrap(),
        "MISS"
    );
    let body = response.text().await.unwrap();
    assert!(body.contains(&proxied(&upstream.url("/a"))), "{}", body);

    shutdown.trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server should stop after shutdown")
        .unwrap();
    assert!(result.is_ok());
    assert!(client.get(&url).send().await.is_err());
}

#[tokio::test]
async fn test_shutdown_before_run_returns_promptly() {
    let dir = TempDir::new().unwrap();
    let server = common::server(common::test_config(&dir)).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let shutdown = Shutdown::new();
    shutdown.trigger();

    tokio::time::timeout(Duration::from_secs(5), server.run(listener, &shutdown))
        .await
        .expect("run should return when shutdown already fired")
        .unwrap();
}
