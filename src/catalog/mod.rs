/// Episode catalog lookup.
///
/// This module provides the episode descriptor returned by a catalog, the
/// trait catalog providers implement, and the AnimePahe-backed provider with
/// its caching wrapper.
mod animepahe;
mod animepahe_types;
mod cached;

pub use animepahe::AnimePaheCatalog;
pub use cached::CachedCatalog;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during a catalog lookup.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Request to the catalog failed
    #[error("Request failed: {0}")]
    RequestError(String),

    /// Failed to parse the catalog's JSON response
    #[error("Failed to parse catalog response: {0}")]
    ParseError(String),

    /// The requested series was not found
    #[error("Series not found: {0}")]
    SeriesNotFound(String),
}

/// Canonical episode number as reported by the catalog.
///
/// Catalogs occasionally number recap or special episodes fractionally
/// (`12.5`), so the number is kept in its textual form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeNumber(String);

impl EpisodeNumber {
    /// The number as text, suitable for filenames and messages
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u32> for EpisodeNumber {
    fn from(number: u32) -> Self {
        Self(number.to_string())
    }
}

impl From<&serde_json::Number> for EpisodeNumber {
    fn from(number: &serde_json::Number) -> Self {
        // Whole-valued floats ("5.0") are shown as "5"
        match number.as_f64() {
            Some(value) if value.fract() == 0.0 && value >= 0.0 && value <= u32::MAX as f64 => {
                Self((value as u32).to_string())
            }
            _ => Self(number.to_string()),
        }
    }
}

impl fmt::Display for EpisodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single entry of a series' episode listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeDescriptor {
    /// Opaque catalog token addressing this episode
    pub session: String,
    /// Canonical episode number
    pub number: EpisodeNumber,
}

/// Trait for catalogs that can enumerate the episodes of a series.
pub trait CatalogProvider: Send + Sync {
    /// Fetches the ordered episode listing for a series.
    ///
    /// # Arguments
    ///
    /// * `series_id` - The series identifier as supplied by the requester
    ///
    /// # Returns
    ///
    /// The episodes in ascending order. An empty listing is not an error at
    /// this level; callers decide what it means.
    fn fetch_episodes(&self, series_id: &str) -> Result<Vec<EpisodeDescriptor>, CatalogError>;

    /// Fetches the listing again from the live catalog, bypassing any local
    /// copy.
    ///
    /// Returns `None` for providers whose [`fetch_episodes`] is always live,
    /// since a second lookup could not return anything newer.
    ///
    /// [`fetch_episodes`]: CatalogProvider::fetch_episodes
    fn refresh_episodes(
        &self,
        _series_id: &str,
    ) -> Result<Option<Vec<EpisodeDescriptor>>, CatalogError> {
        Ok(None)
    }
}

impl<P: CatalogProvider + ?Sized> CatalogProvider for Box<P> {
    fn fetch_episodes(&self, series_id: &str) -> Result<Vec<EpisodeDescriptor>, CatalogError> {
        (**self).fetch_episodes(series_id)
    }

    fn refresh_episodes(
        &self,
        series_id: &str,
    ) -> Result<Option<Vec<EpisodeDescriptor>>, CatalogError> {
        (**self).refresh_episodes(series_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_episode_number_from_json() {
        let whole: serde_json::Number = serde_json::from_str("5").unwrap();
        let float_whole: serde_json::Number = serde_json::from_str("7.0").unwrap();
        let fractional: serde_json::Number = serde_json::from_str("12.5").unwrap();

        assert_eq!(EpisodeNumber::from(&whole).as_str(), "5");
        assert_eq!(EpisodeNumber::from(&float_whole).as_str(), "7");
        assert_eq!(EpisodeNumber::from(&fractional).as_str(), "12.5");
    }
}
