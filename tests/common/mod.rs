//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;

use unblock_proxy::cache::CacheService;
use unblock_proxy::codec::TargetReference;
use unblock_proxy::config::ProxyConfig;
use unblock_proxy::upstream::{FetchError, Fetcher, UpstreamResponse};
use unblock_proxy::HttpServer;

/// A canned upstream reply.
pub struct MockReply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl MockReply {
    pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", content_type.to_string())],
            body: body.into(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// A plain HTTP/1.1 upstream on an ephemeral port.
pub struct MockUpstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    /// Serve `reply(request_target)` for every request.
    pub async fn start<F>(reply: F) -> Self
    where
        F: Fn(&str) -> MockReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let reply = Arc::new(reply);

        let (h, r) = (hits.clone(), requests.clone());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let (hits, requests, reply) = (h.clone(), r.clone(), reply.clone());
                tokio::spawn(async move {
                    let Some(target) = read_request_target(&mut socket).await else {
                        return;
                    };
                    hits.fetch_add(1, Ordering::SeqCst);
                    requests.lock().unwrap().push(target.clone());

                    let reply = reply(&target);
                    let mut head = format!("HTTP/1.1 {} {}\r\n", reply.status, reason(reply.status));
                    for (name, value) in &reply.headers {
                        head.push_str(&format!("{}: {}\r\n", name, value));
                    }
                    head.push_str(&format!(
                        "Content-Length: {}\r\nConnection: close\r\n\r\n",
                        reply.body.len()
                    ));
                    let _ = socket.write_all(head.as_bytes()).await;
                    let _ = socket.write_all(&reply.body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, hits, requests }
    }

    /// Absolute URL of `path` on this upstream.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Request targets (path and query) seen so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request_target(socket: &mut tokio::net::TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let head = String::from_utf8_lossy(&buf);
    head.lines()
        .next()?
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// A fetcher that always fails the same way and counts its calls.
pub struct FailingFetcher {
    pub calls: AtomicUsize,
    error: fn(&TargetReference) -> FetchError,
}

impl FailingFetcher {
    pub fn new(error: fn(&TargetReference) -> FetchError) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            error,
        }
    }
}

#[async_trait]
impl Fetcher for FailingFetcher {
    async fn fetch(
        &self,
        target: &TargetReference,
        _inbound: &HeaderMap,
    ) -> Result<UpstreamResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err((self.error)(target))
    }
}

/// Config with both cache tiers rooted in `dir`.
pub fn test_config(dir: &TempDir) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.cache.disk.directory = dir.path().join("cache");
    config.upstream.timeout_secs = 5;
    config.upstream.connect_timeout_secs = 2;
    config
}

/// Build a server with the real fetcher.
pub async fn server(config: ProxyConfig) -> HttpServer {
    HttpServer::new(config).await.unwrap()
}

/// Build a server around a custom fetcher.
pub async fn server_with(config: ProxyConfig, fetcher: Arc<dyn Fetcher>) -> HttpServer {
    let cache = Arc::new(CacheService::open(&config.cache).await.unwrap());
    HttpServer::from_parts(config, fetcher, cache)
}

/// Proxy path for an absolute URL.
pub fn proxied(url: &str) -> String {
    format!("/{}", urlencoding::encode(url))
}

/// Send a GET through the server's router.
pub async fn get(server: &HttpServer, path: &str) -> Response<Body> {
    server
        .router()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 16 << 20).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

pub fn assert_status(response: &Response<Body>, status: StatusCode) {
    assert_eq!(response.status(), status, "unexpected status for response {:?}", response.headers());
}
