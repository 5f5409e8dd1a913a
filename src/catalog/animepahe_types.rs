/// AnimePahe API response types for deserialization.
///
/// These structures mirror the JSON returned by the `m=release` endpoint.
use serde::Deserialize;

/// One page of the release listing.
#[derive(Debug, Deserialize)]
pub(super) struct ReleasePage {
    /// Number of the last available page (1-based)
    #[serde(default = "default_last_page")]
    pub last_page: u32,
    /// Episodes on this page; absent when the series has no releases
    #[serde(default)]
    pub data: Option<Vec<ReleaseEpisode>>,
}

/// A single release entry.
#[derive(Debug, Deserialize)]
pub(super) struct ReleaseEpisode {
    /// Episode number, integral or fractional
    pub episode: serde_json::Number,
    /// Opaque episode session token
    pub session: String,
}

fn default_last_page() -> u32 {
    1
}
