//! File Transport (consumed plugin interface)
//!
//! Downloads tree files from mirror servers and uploads published files.
//! Implementations carry custom HTTP headers from configuration and must
//! forward them verbatim on every request. Downloads have both a connect
//! deadline (set on the client) and a per-request total deadline.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid custom header: {0}")]
    InvalidHeader(String),

    #[error("invalid upload path: {0}")]
    InvalidPath(String),
}

/// File download/upload interface consumed by the sync scheduler.
#[async_trait]
pub trait FileTransport: Send + Sync {
    /// Fetch `filename` from a server into `dest_path`.
    async fn download(
        &self,
        server_url: &str,
        filename: &str,
        dest_path: &Path,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Publish a local file to a server.
    async fn upload(&self, server_url: &str, local_path: &Path) -> Result<(), TransportError>;
}

/// Plain HTTP transport with configured custom headers.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    headers: HeaderMap,
}

impl HttpTransport {
    pub fn new(
        custom_headers: &HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in custom_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidHeader(format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidHeader(format!("{}: {}", name, e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder().connect_timeout(connect_timeout).build()?;

        Ok(Self { client, headers })
    }
}

#[async_trait]
impl FileTransport for HttpTransport {
    async fn download(
        &self,
        server_url: &str,
        filename: &str,
        dest_path: &Path,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let url = format!("{}/{}", server_url.trim_end_matches('/'), filename);
        let response = self
            .client
            .get(&url)
            .headers(self.headers.clone())
            .timeout(timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest_path, &bytes).await?;
        Ok(())
    }

    async fn upload(&self, server_url: &str, local_path: &Path) -> Result<(), TransportError> {
        let filename = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| TransportError::InvalidPath(local_path.display().to_string()))?;
        let url = format!("{}/{}", server_url.trim_end_matches('/'), filename);

        let bytes = tokio::fs::read(local_path).await?;
        let response = self
            .client
            .put(&url)
            .headers(self.headers.clone())
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}
