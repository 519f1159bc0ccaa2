//! The resolved identity of the page being proxied.

use std::fmt;

use url::Url;

/// An absolute http(s) URL decoded from the inbound request path.
///
/// Created once per request and never mutated; its string form is the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetReference {
    url: Url,
}

impl TargetReference {
    /// Wrap an already-parsed absolute URL.
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Key shared by both cache tiers.
    pub fn cache_key(&self) -> &str {
        self.url.as_str()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Port to connect to, falling back to the scheme default.
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(443)
    }

    /// Resolve a reference found in this target's content.
    pub fn join(&self, reference: &str) -> Option<Url> {
        self.url.join(reference).ok()
    }
}

impl fmt::Display for TargetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

impl From<Url> for TargetReference {
    fn from(url: Url) -> Self {
        Self::new(url)
    }
}
