// ABOUTME: HTTP client for the TiDB status port
// ABOUTME: Streams statistics dumps and probes instance readiness

use crate::client::DiagnosticClient;
use crate::endpoint::Endpoint;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Diagnostic endpoint of one cluster
#[derive(Debug, Clone)]
pub struct HttpDiagnosticClient {
    http: reqwest::Client,
    base: Url,
}

impl HttpDiagnosticClient {
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        let base = Url::parse(&endpoint.status_url())
            .with_context(|| format!("Invalid status address for {}", endpoint))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    /// URL of the statistics dump of `database.table`; names are percent-encoded verbatim.
    pub fn stats_dump_url(&self, database: &str, table: &str) -> Result<Url> {
        self.url_for(&["stats", "dump", database, table])
    }

    fn url_for(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Status address {} cannot carry a path", self.base))?
            .clear()
            .extend(segments);
        Ok(url)
    }

    /// Whether the status endpoint answers `GET /status` successfully
    pub async fn is_ready(&self, timeout: Duration) -> bool {
        let Ok(url) = self.url_for(&["status"]) else {
            return false;
        };
        match self.http.get(url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::trace!("Status probe failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl DiagnosticClient for HttpDiagnosticClient {
    async fn dump_stats(
        &self,
        database: &str,
        table: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        let url = self.stats_dump_url(database, table)?;

        let mut response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to request URL: {}", url))?
            .error_for_status()
            .with_context(|| format!("Statistics dump request failed: {}", url))?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))?
        {
            sink.write_all(&chunk)
                .await
                .context("Failed to write statistics dump")?;
            written += chunk.len() as u64;
        }
        sink.flush().await.context("Failed to flush statistics dump")?;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_dump_url() {
        let client = HttpDiagnosticClient::new(&Endpoint::new("127.0.0.1", 4000, 10080)).unwrap();
        assert_eq!(
            client.stats_dump_url("shop", "Orders").unwrap().as_str(),
            "http://127.0.0.1:10080/stats/dump/shop/Orders"
        );
    }

    #[test]
    fn test_stats_dump_url_encodes_names() {
        let client = HttpDiagnosticClient::new(&Endpoint::new("localhost", 4000, 10080)).unwrap();
        let url = client.stats_dump_url("my db", "a/b").unwrap();
        assert_eq!(url.path(), "/stats/dump/my%20db/a%2Fb");
    }

    #[tokio::test]
    async fn test_is_ready_false_when_nothing_listens() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = HttpDiagnosticClient::new(&Endpoint::new("127.0.0.1", 4000, port)).unwrap();
        assert!(!client.is_ready(Duration::from_millis(200)).await);
    }
}
