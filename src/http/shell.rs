//! Static shell: landing page, robots.txt and files from the static directory.
//!
//! The shell is opaque to the proxy; files are served as-is.

use std::path::PathBuf;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::ShellConfig;

const BUILTIN_HOME: &str = include_str!("../../static/home.html");
const HOME_FILE: &str = "home.html";
const ROBOTS_TXT: &str = "User-agent: *\nDisallow:";

pub struct StaticShell {
    dir: Option<PathBuf>,
}

impl StaticShell {
    pub fn new(config: &ShellConfig) -> Self {
        Self {
            dir: config.static_dir.clone(),
        }
    }

    /// The landing page: `home.html` from the static directory, else the built-in page.
    pub async fn home(&self) -> Response {
        if let Some(dir) = &self.dir {
            let path = dir.join(HOME_FILE);
            match tokio::fs::read(&path).await {
                Ok(body) => return file_response(body, "text/html; charset=utf-8"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read landing page, using built-in");
                }
            }
        }
        file_response(BUILTIN_HOME.as_bytes().to_vec(), "text/html; charset=utf-8")
    }

    pub fn robots(&self) -> Response {
        file_response(ROBOTS_TXT.as_bytes().to_vec(), "text/plain; charset=utf-8")
    }

    /// Serve `segment` from the static directory when it names a regular file there.
    pub async fn file(&self, segment: &str) -> Option<Response> {
        let dir = self.dir.as_ref()?;
        if !is_plain_file_name(segment) {
            return None;
        }

        let path = dir.join(segment);
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        if !metadata.is_file() {
            return None;
        }

        match tokio::fs::read(&path).await {
            Ok(body) => {
                let content_type = mime_guess::from_path(&path).first_or_octet_stream();
                Some(file_response(body, content_type.essence_str()))
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read static file");
                None
            }
        }
    }
}

/// A single path segment that cannot escape the static directory.
fn is_plain_file_name(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.starts_with('.')
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_'))
}

fn file_response(body: Vec<u8>, content_type: &str) -> Response {
    let mut response = (StatusCode::OK, body).into_response();
    if let Ok(value) = HeaderValue::from_str(content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn body_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_plain_file_names() {
        for ok in ["sw.js", "style.css", "favicon.ico", "a-b_c.1.png"] {
            assert!(is_plain_file_name(ok), "{}", ok);
        }
        for bad in ["", ".env", "..", "a/b", "a%2Fb", "https%3A%2F%2Fexample.com", "a\\b"] {
            assert!(!is_plain_file_name(bad), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_builtin_home_without_static_dir() {
        let shell = StaticShell::new(&ShellConfig::default());
        let response = shell.home().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
        assert!(body_of(response).await.contains("<form"));
        assert!(shell.file("sw.js").await.is_none());
    }

    #[tokio::test]
    async fn test_static_dir_overrides_home_and_serves_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("home.html"), "<h1>custom</h1>").unwrap();
        std::fs::write(dir.path().join("sw.js"), "self.addEventListener('fetch', () => {})").unwrap();
        std::fs::create_dir(dir.path().join("assets")).unwrap();

        let shell = StaticShell::new(&ShellConfig {
            static_dir: Some(dir.path().to_path_buf()),
        });
        assert_eq!(body_of(shell.home().await).await, "<h1>custom</h1>");

        let script = shell.file("sw.js").await.unwrap();
        assert!(script.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .contains("javascript"));

        assert!(shell.file("missing.js").await.is_none());
        assert!(shell.file("assets").await.is_none());
    }

    #[tokio::test]
    async fn test_robots() {
        let shell = StaticShell::new(&ShellConfig::default());
        assert_eq!(body_of(shell.robots()).await, "User-agent: *\nDisallow:");
    }
}
