//! Episode resolution module
//!
//! Maps a series identifier and a 1-based episode ordinal to the canonical
//! episode reference the downstream tools address.

use crate::catalog::{CatalogError, CatalogProvider, EpisodeNumber};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur while resolving an episode
#[derive(Debug, Error)]
pub enum ResolutionError {
    /// The catalog could not be queried or returned no episodes
    #[error("Catalog unreachable for {series}: {reason}")]
    CatalogUnreachable { series: String, reason: String },

    /// The requested ordinal is outside the series' episode listing
    #[error("Episode {ordinal} is out of range: the series has {episode_count} episode(s)")]
    OutOfRange { ordinal: u32, episode_count: usize },
}

/// A resolved episode, shared read-only by every quality tier of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeReference {
    /// Series identifier as supplied by the requester
    pub series_id: String,
    /// Opaque catalog token addressing the episode
    pub session: String,
    /// Canonical episode number as reported by the catalog
    pub episode_number: EpisodeNumber,
}

/// Resolves episode ordinals against a catalog
pub struct EpisodeResolver<C: CatalogProvider> {
    catalog: C,
}

impl<C: CatalogProvider> EpisodeResolver<C> {
    /// Creates a resolver backed by the given catalog
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    /// Resolves the `ordinal`-th episode (1-based) of `series_id`
    ///
    /// A listing too short for `ordinal` is fetched again from the live
    /// catalog before the ordinal is rejected, so a cached listing never
    /// hides a newly released episode. Uncached catalogs are asked once.
    ///
    /// Fails with [`ResolutionError::CatalogUnreachable`] when the lookup fails
    /// or yields no episodes, and with [`ResolutionError::OutOfRange`] when the
    /// ordinal is not within `1..=episode_count`.
    pub fn resolve(
        &self,
        series_id: &str,
        ordinal: u32,
    ) -> Result<EpisodeReference, ResolutionError> {
        let mut episodes = self
            .catalog
            .fetch_episodes(series_id)
            .map_err(|e| unreachable_error(series_id, &e))?;

        if episodes.len() < ordinal as usize {
            debug!(
                series = series_id,
                ordinal,
                episode_count = episodes.len(),
                "listing too short, refreshing from catalog"
            );
            if let Some(fresh) = self
                .catalog
                .refresh_episodes(series_id)
                .map_err(|e| unreachable_error(series_id, &e))?
            {
                episodes = fresh;
            }
        }

        if episodes.is_empty() {
            return Err(ResolutionError::CatalogUnreachable {
                series: series_id.to_string(),
                reason: "catalog returned no episodes".to_string(),
            });
        }

        let index = (ordinal as usize).checked_sub(1);
        let descriptor = index
            .and_then(|i| episodes.get(i))
            .ok_or(ResolutionError::OutOfRange {
                ordinal,
                episode_count: episodes.len(),
            })?;

        info!(
            series = series_id,
            ordinal,
            episode = %descriptor.number,
            "resolved episode"
        );

        Ok(EpisodeReference {
            series_id: series_id.to_string(),
            session: descriptor.session.clone(),
            episode_number: descriptor.number.clone(),
        })
    }
}

fn unreachable_error(series_id: &str, error: &CatalogError) -> ResolutionError {
    ResolutionError::CatalogUnreachable {
        series: series_id.to_string(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::CacheStorage;
    use crate::catalog::{CachedCatalog, EpisodeDescriptor};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Catalog returning a fixed listing, counting lookups
    pub(crate) struct FixedCatalog {
        pub episodes: Option<Vec<EpisodeDescriptor>>,
        pub lookups: AtomicUsize,
    }

    impl FixedCatalog {
        /// A series with `count` episodes numbered from `first`
        pub fn numbered(count: u32, first: u32) -> Self {
            Self {
                episodes: Some(
                    (0..count)
                        .map(|i| EpisodeDescriptor {
                            session: format!("session-{}", first + i),
                            number: EpisodeNumber::from(first + i),
                        })
                        .collect(),
                ),
                lookups: AtomicUsize::new(0),
            }
        }

        pub fn failing() -> Self {
            Self {
                episodes: None,
                lookups: AtomicUsize::new(0),
            }
        }
    }

    impl CatalogProvider for FixedCatalog {
        fn fetch_episodes(&self, series_id: &str) -> Result<Vec<EpisodeDescriptor>, CatalogError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.episodes
                .clone()
                .ok_or_else(|| CatalogError::RequestError(format!("{} timed out", series_id)))
        }
    }

    #[test]
    fn test_every_valid_ordinal_matches_catalog_entry() {
        // Continuation seasons often start at a number other than 1
        let resolver = EpisodeResolver::new(FixedCatalog::numbered(12, 367));

        for ordinal in 1..=12u32 {
            let reference = resolver.resolve("bleach", ordinal).unwrap();
            let expected = (366 + ordinal).to_string();
            assert_eq!(reference.episode_number.as_str(), expected);
            assert_eq!(reference.session, format!("session-{}", expected));
            assert_eq!(reference.series_id, "bleach");
        }
        assert_eq!(resolver.catalog.lookups.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_out_of_range_ordinals() {
        let resolver = EpisodeResolver::new(FixedCatalog::numbered(12, 1));

        for ordinal in [0, 13, 99] {
            match resolver.resolve("bleach", ordinal) {
                Err(ResolutionError::OutOfRange {
                    ordinal: reported,
                    episode_count,
                }) => {
                    assert_eq!(reported, ordinal);
                    assert_eq!(episode_count, 12);
                }
                other => panic!("expected OutOfRange for {}, got {:?}", ordinal, other),
            }
        }
        // Uncached catalogs are live already, so a short listing is not refetched
        assert_eq!(resolver.catalog.lookups.load(Ordering::SeqCst), 3);
    }

    /// Catalog whose series gains episodes over time
    struct AiringCatalog {
        released: Mutex<u32>,
        lookups: AtomicUsize,
    }

    impl CatalogProvider for AiringCatalog {
        fn fetch_episodes(&self, _: &str) -> Result<Vec<EpisodeDescriptor>, CatalogError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let released = *self.released.lock().unwrap();
            Ok((1..=released)
                .map(|n| EpisodeDescriptor {
                    session: format!("session-{}", n),
                    number: EpisodeNumber::from(n),
                })
                .collect())
        }
    }

    #[test]
    fn test_cached_listing_is_refreshed_for_new_release() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStorage::open_in(dir.path(), "catalog", Duration::from_secs(3600))
            .unwrap();
        let resolver = EpisodeResolver::new(CachedCatalog::new(
            AiringCatalog {
                released: Mutex::new(12),
                lookups: AtomicUsize::new(0),
            },
            cache,
        ));
        let airing = |resolver: &EpisodeResolver<CachedCatalog<AiringCatalog>>| {
            resolver.catalog.provider().lookups.load(Ordering::SeqCst)
        };

        assert_eq!(resolver.resolve("bleach", 12).unwrap().session, "session-12");
        assert_eq!(airing(&resolver), 1);

        *resolver.catalog.provider().released.lock().unwrap() = 13;

        let fresh = resolver.resolve("bleach", 13).unwrap();
        assert_eq!(fresh.session, "session-13");
        assert_eq!(airing(&resolver), 2);

        // The refreshed listing was cached again
        resolver.resolve("bleach", 13).unwrap();
        assert_eq!(airing(&resolver), 2);

        assert!(matches!(
            resolver.resolve("bleach", 14),
            Err(ResolutionError::OutOfRange {
                ordinal: 14,
                episode_count: 13
            })
        ));
        assert_eq!(airing(&resolver), 3);
    }

    #[test]
    fn test_catalog_failure_is_unreachable() {
        let resolver = EpisodeResolver::new(FixedCatalog::failing());
        assert!(matches!(
            resolver.resolve("bleach", 1),
            Err(ResolutionError::CatalogUnreachable { .. })
        ));
    }

    #[test]
    fn test_empty_catalog_is_unreachable() {
        let resolver = EpisodeResolver::new(FixedCatalog::numbered(0, 1));
        assert!(matches!(
            resolver.resolve("bleach", 1),
            Err(ResolutionError::CatalogUnreachable { .. })
        ));
    }
}
