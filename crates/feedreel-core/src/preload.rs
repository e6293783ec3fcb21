//! Speculative warm-up of the next source

use crate::{backend::MediaHost, cache::FailureCache, types::*};
use std::sync::Arc;
use tracing::debug;

/// What the preloader needs to know about the session
#[derive(Debug, Clone, Copy)]
pub struct PreloadContext<'a> {
    pub status: SessionStatus,
    pub quality: NetworkQuality,
    pub catalog: &'a Catalog,
    pub current_index: usize,
    pub failures: &'a FailureCache,
}

/// Fire-and-forget warm-up of the next entry. Never touches session state.
pub struct Preloader {
    host: Arc<dyn MediaHost>,
    enabled: bool,
}

impl Preloader {
    pub fn new(host: Arc<dyn MediaHost>, enabled: bool) -> Self {
        Self { host, enabled }
    }

    /// Next entry worth warming, if any
    pub fn candidate<'a>(&self, ctx: &PreloadContext<'a>) -> Option<(usize, &'a CatalogEntry)> {
        if !self.enabled
            || ctx.status != SessionStatus::Playing
            || ctx.quality != NetworkQuality::Good
            || ctx.catalog.len() <= 1
        {
            return None;
        }

        let next = ctx.catalog.step(ctx.current_index, Direction::Up)?;
        let entry = ctx.catalog.get(next)?;
        if ctx.failures.has(&entry.url) {
            debug!(index = next, "Skipping preload of failed source");
            return None;
        }
        Some((next, entry))
    }

    /// Warm the next entry when conditions allow. Returns the warmed index.
    pub fn maybe_warm(&self, ctx: &PreloadContext<'_>) -> Option<usize> {
        let (index, entry) = self.candidate(ctx)?;
        debug!(index, url = %entry.url, "Preloading next source");
        self.host.preload(&entry.url);
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedHost;

    fn catalog(n: usize) -> Catalog {
        Catalog::new(
            (0..n)
                .map(|i| CatalogEntry::new(i.to_string(), format!("https://cdn.example/{i}.mp4")))
                .collect(),
        )
    }

    fn ctx<'a>(catalog: &'a Catalog, failures: &'a FailureCache, index: usize) -> PreloadContext<'a> {
        PreloadContext {
            status: SessionStatus::Playing,
            quality: NetworkQuality::Good,
            catalog,
            current_index: index,
            failures,
        }
    }

    #[test]
    fn test_warms_next_with_wraparound() {
        let host = Arc::new(ScriptedHost::default());
        let preloader = Preloader::new(host.clone(), true);
        let catalog = catalog(3);
        let failures = FailureCache::new();

        assert_eq!(preloader.maybe_warm(&ctx(&catalog, &failures, 2)), Some(0));
        assert_eq!(host.preloads(), vec!["https://cdn.example/0.mp4".to_string()]);
    }

    #[test]
    fn test_gated_by_conditions() {
        let host = Arc::new(ScriptedHost::default());
        let preloader = Preloader::new(host.clone(), true);
        let catalog = catalog(3);
        let mut failures = FailureCache::new();

        let mut poor = ctx(&catalog, &failures, 0);
        poor.quality = NetworkQuality::Poor;
        assert!(preloader.candidate(&poor).is_none());

        let mut unknown = ctx(&catalog, &failures, 0);
        unknown.quality = NetworkQuality::Unknown;
        assert!(preloader.candidate(&unknown).is_none());

        let mut loading = ctx(&catalog, &failures, 0);
        loading.status = SessionStatus::Loading;
        assert!(preloader.candidate(&loading).is_none());

        let single = self::catalog(1);
        assert!(preloader.candidate(&ctx(&single, &failures, 0)).is_none());

        failures.add("https://cdn.example/1.mp4");
        assert!(preloader.maybe_warm(&ctx(&catalog, &failures, 0)).is_none());
        assert!(host.preloads().is_empty());
    }

    #[test]
    fn test_disabled() {
        let preloader = Preloader::new(Arc::new(ScriptedHost::default()), false);
        let catalog = catalog(2);
        let failures = FailureCache::new();
        assert!(preloader.candidate(&ctx(&catalog, &failures, 0)).is_none());
    }
}
