//! HTTP fetcher backed by `reqwest`.
//!
//! # Responsibilities
//! - Resolve the target host up front so DNS failures are reported as such
//! - Forward `User-Agent` and `Accept-Language` (with defaults), never `Host`
//! - Leave redirects to the caller
//! - Buffer the body within a size limit and decode its content-encoding
//! - Hand anything larger back unbuffered and undecoded

use std::error::Error as StdError;
use std::io;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue};
use bytes::Bytes;
use futures_util::TryStreamExt;
use url::Host;

use crate::codec::TargetReference;
use crate::config::{RetryConfig, UpstreamConfig};
use crate::upstream::decompress::{decompress, DecompressError};
use crate::upstream::retry::RetryPolicy;
use crate::upstream::{BodyStream, FetchError, Fetcher, UpstreamResponse};

const ACCEPT_ENCODING: &str = "gzip, deflate, br";

/// Fetches targets over the public internet.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: UpstreamConfig,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: &UpstreamConfig, retries: &RetryConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout())
            // Buffered fetches are bounded as a whole in `fetch`; a relayed
            // body only has to keep moving.
            .read_timeout(config.timeout())
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            retry: RetryPolicy::from_config(retries),
        })
    }

    /// Headers sent upstream, derived from the inbound request.
    pub fn outbound_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();

        let user_agent = inbound
            .get(header::USER_AGENT)
            .cloned()
            .or_else(|| HeaderValue::from_str(&self.config.default_user_agent).ok());
        if let Some(value) = user_agent {
            headers.insert(header::USER_AGENT, value);
        }

        let language = inbound
            .get(header::ACCEPT_LANGUAGE)
            .cloned()
            .or_else(|| HeaderValue::from_str(&self.config.default_accept_language).ok());
        if let Some(value) = language {
            headers.insert(header::ACCEPT_LANGUAGE, value);
        }

        let accept = inbound
            .get(header::ACCEPT)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*/*"));
        headers.insert(header::ACCEPT, accept);
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_ENCODING));
        headers
    }

    async fn resolve(&self, target: &TargetReference) -> Result<(), FetchError> {
        let host = match target.url().host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => return Ok(()),
            None => {
                return Err(FetchError::HostUnreachable {
                    host: String::new(),
                })
            }
        };

        let lookup = tokio::net::lookup_host((host.as_str(), target.port()));
        let resolved = match tokio::time::timeout(self.config.connect_timeout(), lookup).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(_)) | Err(_) => false,
        };
        if resolved {
            Ok(())
        } else {
            tracing::debug!(host = %host, "DNS resolution failed");
            Err(FetchError::HostUnreachable { host })
        }
    }

    async fn fetch_once(
        &self,
        target: &TargetReference,
        headers: &HeaderMap,
    ) -> Result<UpstreamResponse, FetchError> {
        let host = target.host().unwrap_or_default().to_string();
        self.resolve(target).await?;

        let mut response = self
            .client
            .get(target.url().clone())
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| classify(&host, self.config.timeout_secs, e))?;

        let status = response.status();
        let mut response_headers = response.headers().clone();
        let limit = self.config.max_body_bytes;

        if response.content_length().is_some_and(|len| len > limit as u64) {
            tracing::debug!(url = %target, limit, "Declared body over buffer limit, relaying");
            return Ok(UpstreamResponse::passthrough(
                status,
                response_headers,
                Bytes::new(),
                remainder(response),
            ));
        }

        let mut body = Vec::new();
        loop {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| classify(&host, self.config.timeout_secs, e))?;
            let Some(chunk) = chunk else { break };
            body.extend_from_slice(&chunk);
            if body.len() > limit {
                tracing::debug!(url = %target, limit, "Body outgrew buffer limit, relaying");
                return Ok(UpstreamResponse::passthrough(
                    status,
                    response_headers,
                    Bytes::from(body),
                    remainder(response),
                ));
            }
        }

        let encoding = response_headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(encoding) = encoding.filter(|_| !body.is_empty()) {
            match decompress(&encoding, &body, limit) {
                Ok(Some(decoded)) => {
                    body = decoded;
                    response_headers.remove(header::CONTENT_ENCODING);
                    response_headers.remove(header::CONTENT_LENGTH);
                }
                Ok(None) => {}
                Err(DecompressError::TooLarge { .. }) => {
                    tracing::debug!(url = %target, limit, "Decoded body over buffer limit, relaying encoded");
                }
                Err(source) => return Err(FetchError::Body { host, source }),
            }
        }

        tracing::debug!(
            url = %target,
            status = %status,
            bytes = body.len(),
            "Upstream response received"
        );
        Ok(UpstreamResponse::new(status, response_headers, body))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        target: &TargetReference,
        inbound: &HeaderMap,
    ) -> Result<UpstreamResponse, FetchError> {
        let headers = self.outbound_headers(inbound);
        let timeout = self.config.timeout();
        let secs = self.config.timeout_secs;

        self.retry
            .run(|| async {
                match tokio::time::timeout(timeout, self.fetch_once(target, &headers)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        host: target.host().unwrap_or_default().to_string(),
                        secs,
                    }),
                }
            })
            .await
    }
}

fn remainder(response: reqwest::Response) -> BodyStream {
    Box::pin(response.bytes_stream().map_err(io::Error::other))
}

/// Map a client error onto the fetch taxonomy without echoing the URL.
fn classify(host: &str, timeout_secs: u64, err: reqwest::Error) -> FetchError {
    let host = host.to_string();
    if err.is_timeout() {
        return FetchError::Timeout { host, secs: timeout_secs };
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
                    return FetchError::ConnectionRefused { host }
                }
                io::ErrorKind::TimedOut => return FetchError::Timeout { host, secs: timeout_secs },
                _ => {}
            }
        }
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("certificate") || text.contains("tls") || text.contains("handshake") {
            return FetchError::Tls { host };
        }
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return FetchError::HostUnreachable { host };
        }
        source = cause.source();
    }

    if err.is_connect() {
        return FetchError::ConnectionRefused { host };
    }
    FetchError::Other {
        host,
        message: err.without_url().to_string(),
    }
}
