//! Per-session source caches
//!
//! - [`FailureCache`]: sources that exhausted their retries this session
//! - [`ValidationCache`]: memoized reachability probe results

use crate::error::ValidationFailure;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Session blacklist. Append-only until an explicit reload clears it.
#[derive(Debug, Default)]
pub struct FailureCache {
    urls: HashSet<String>,
}

impl FailureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Returns true if the URL was not already blacklisted
    pub fn add(&mut self, url: impl Into<String>) -> bool {
        self.urls.insert(url.into())
    }

    pub fn clear(&mut self) {
        self.urls.clear();
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Short-timeout reachability check for a source URL
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<(), ValidationFailure>;
}

/// Reachability probe issuing an HTTP HEAD request
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self, url: &str) -> Result<(), ValidationFailure> {
        let failure = |reason: String| ValidationFailure {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(failure(format!("HTTP {}", response.status())))
        }
    }
}

/// URL -> last known reachability. Shared so detached probes can record
/// their results.
#[derive(Debug, Clone, Default)]
pub struct ValidationCache {
    results: Arc<RwLock<HashMap<String, bool>>>,
}

impl ValidationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<bool> {
        self.results.read().get(url).copied()
    }

    /// Overwrites any previous result
    pub fn record(&self, url: &str, reachable: bool) {
        self.results.write().insert(url.to_string(), reachable);
    }

    pub fn clear(&self) {
        self.results.write().clear();
    }

    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }

    /// Memoized check: probes only when the URL has never been checked
    pub async fn check(&self, url: &str, probe: &dyn ReachabilityProbe) -> bool {
        if let Some(reachable) = self.get(url) {
            debug!(url, reachable, "Validation cache hit");
            return reachable;
        }
        self.revalidate(url, probe).await
    }

    /// Probe again and overwrite the cached result
    pub async fn revalidate(&self, url: &str, probe: &dyn ReachabilityProbe) -> bool {
        let reachable = match probe.probe(url).await {
            Ok(()) => true,
            Err(failure) => {
                warn!(url, reason = %failure.reason, "Source failed validation");
                false
            }
        };
        self.record(url, reachable);
        reachable
    }
}
