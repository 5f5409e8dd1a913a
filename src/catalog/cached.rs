//! Cached catalog provider implementation
//!
//! This module provides a caching wrapper for catalog providers that
//! stores episode listings in a local cache for a limited time.

use super::{CatalogError, CatalogProvider, EpisodeDescriptor};
use crate::cache::CacheStorage;
use tracing::{debug, warn};

/// A caching wrapper for catalog providers
///
/// Listings are cached per series identifier. Cache failures never fail a
/// lookup; the wrapped provider is consulted instead.
pub struct CachedCatalog<P>
where
    P: CatalogProvider,
{
    /// The underlying catalog provider
    provider: P,
    /// Cache storage for episode listings
    cache: CacheStorage<Vec<EpisodeDescriptor>>,
}

impl<P> CachedCatalog<P>
where
    P: CatalogProvider,
{
    /// Creates a new cached catalog wrapping the given provider
    pub(crate) fn new(provider: P, cache: CacheStorage<Vec<EpisodeDescriptor>>) -> Self {
        Self { provider, cache }
    }

    /// The wrapped provider
    #[cfg(test)]
    pub(crate) fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P> CatalogProvider for CachedCatalog<P>
where
    P: CatalogProvider,
{
    fn fetch_episodes(&self, series_id: &str) -> Result<Vec<EpisodeDescriptor>, CatalogError> {
        match self.cache.load(series_id) {
            Ok(Some(episodes)) if !episodes.is_empty() => {
                debug!(series = series_id, "catalog cache hit");
                return Ok(episodes);
            }
            Ok(_) => {}
            Err(e) => warn!(series = series_id, error = %e, "ignoring unreadable catalog cache"),
        }

        self.fetch_and_store(series_id)
    }

    fn refresh_episodes(
        &self,
        series_id: &str,
    ) -> Result<Option<Vec<EpisodeDescriptor>>, CatalogError> {
        self.fetch_and_store(series_id).map(Some)
    }
}

impl<P> CachedCatalog<P>
where
    P: CatalogProvider,
{
    fn fetch_and_store(&self, series_id: &str) -> Result<Vec<EpisodeDescriptor>, CatalogError> {
        let episodes = self.provider.fetch_episodes(series_id)?;

        // Empty listings are not cached so a retry asks the catalog again
        if !episodes.is_empty() {
            if let Err(e) = self.cache.store(series_id, &episodes) {
                warn!(series = series_id, error = %e, "failed to store catalog cache");
            }
        }

        Ok(episodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::EpisodeNumber;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingCatalog {
        calls: AtomicUsize,
        episodes: Vec<EpisodeDescriptor>,
    }

    impl CatalogProvider for CountingCatalog {
        fn fetch_episodes(&self, _: &str) -> Result<Vec<EpisodeDescriptor>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.episodes.clone())
        }
    }

    fn descriptor(n: u32) -> EpisodeDescriptor {
        EpisodeDescriptor {
            session: format!("s{}", n),
            number: EpisodeNumber::from(n),
        }
    }

    #[test]
    fn test_second_lookup_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStorage::open_in(dir.path(), "catalog", Duration::from_secs(60)).unwrap();
        let cached = CachedCatalog::new(
            CountingCatalog {
                calls: AtomicUsize::new(0),
                episodes: vec![descriptor(1), descriptor(2)],
            },
            cache,
        );

        let first = cached.fetch_episodes("bleach").unwrap();
        let second = cached.fetch_episodes("bleach").unwrap();

        assert_eq!(first, second);
        assert_eq!(cached.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_empty_listing_is_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStorage::open_in(dir.path(), "catalog", Duration::from_secs(60)).unwrap();
        let cached = CachedCatalog::new(
            CountingCatalog {
                calls: AtomicUsize::new(0),
                episodes: Vec::new(),
            },
            cache,
        );

        cached.fetch_episodes("bleach").unwrap();
        cached.fetch_episodes("bleach").unwrap();

        assert_eq!(cached.provider.calls.load(Ordering::SeqCst), 2);
    }
}
