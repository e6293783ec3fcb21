//! Catalog payload parsing and remote catalog sources
//!
//! The remote feed is a small CSV-like table: a header line followed by
//! `id,url` rows. Only the first two fields of each row are used.

use crate::{error::CatalogError, types::*};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Anything that can hand back a raw catalog payload
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Fetch the raw payload. Failures are reported as `CatalogError::Network`.
    async fn fetch(&self) -> Result<String, CatalogError>;
}

/// Parse a catalog payload.
///
/// The first line is a header and is discarded. Rows missing either field
/// are dropped. A blank payload, a header-only payload, or one where every
/// row was dropped is `CatalogError::Empty`.
pub fn parse_catalog(text: &str) -> Result<Catalog, CatalogError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::Empty);
    }

    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() < 2 {
        return Err(CatalogError::Empty);
    }

    let entries: Vec<CatalogEntry> = lines[1..].iter().filter_map(|line| parse_row(line)).collect();

    let dropped = lines.len() - 1 - entries.len();
    if dropped > 0 {
        debug!(dropped, "Dropped malformed catalog rows");
    }

    if entries.is_empty() {
        return Err(CatalogError::Empty);
    }

    Ok(Catalog::new(entries))
}

fn parse_row(line: &str) -> Option<CatalogEntry> {
    let mut fields = line.split(',');
    let id = fields.next()?.trim();
    let url = fields.next()?.trim();
    if id.is_empty() || url.is_empty() {
        return None;
    }
    Some(CatalogEntry::new(id, url))
}

/// Catalog source backed by an HTTP endpoint
pub struct HttpCatalogSource {
    client: Client,
    url: String,
    max_attempts: u32,
    backoff_base: Duration,
}

impl HttpCatalogSource {
    pub fn new(url: impl Into<String>) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    async fn fetch_once(&self) -> Result<String, CatalogError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Network(format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<String, CatalogError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once().await {
                Ok(body) => return Ok(body),
                Err(e) if attempt + 1 >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.backoff_base * 2u32.pow(attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "Catalog fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_catalog() {
        let catalog = parse_catalog("id,url\n1,https://a/x.mp4\n2,https://a/y.m3u8").unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(0), Some(&CatalogEntry::new("1", "https://a/x.mp4")));
        assert_eq!(catalog.get(1), Some(&CatalogEntry::new("2", "https://a/y.m3u8")));
    }

    #[test]
    fn test_parse_trims_and_ignores_extra_fields() {
        let catalog = parse_catalog("id,url,title\r\n 5 , https://a/z.webm ,Some title\r\n").unwrap();
        assert_eq!(catalog.get(0), Some(&CatalogEntry::new("5", "https://a/z.webm")));
    }

    #[test]
    fn test_parse_drops_incomplete_rows() {
        let catalog = parse_catalog("id,url\n1\n,https://a/x.mp4\n2,\n3,https://a/ok.mp4").unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(0).unwrap().id, "3");
    }

    #[test]
    fn test_parse_empty_payloads() {
        assert_eq!(parse_catalog(""), Err(CatalogError::Empty));
        assert_eq!(parse_catalog("   \n "), Err(CatalogError::Empty));
        assert_eq!(parse_catalog("id,url"), Err(CatalogError::Empty));
        assert_eq!(parse_catalog("id,url\nbroken\n\n"), Err(CatalogError::Empty));
    }
}
