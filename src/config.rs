//! Runtime configuration
//!
//! A [`CourierConfig`] value is built once by the front end and handed to the
//! orchestrator. Nothing in the crate reads configuration from global state.

use crate::request::DEFAULT_QUALITIES;
use std::path::PathBuf;
use std::time::Duration;

/// How the external resolver produces a fetchable source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SourceMode {
    /// The resolver prints a direct URL which the fetch tool downloads
    #[default]
    Url,
    /// The resolver downloads the file itself into the working directory
    Direct,
}

/// Configuration injected into the orchestrator
#[derive(Debug, Clone)]
pub struct CourierConfig {
    /// Root directory under which every job gets its own staging directory
    pub download_root: PathBuf,
    /// Resolver program name or path
    pub resolver_program: String,
    /// Accelerated fetch program name or path
    pub fetcher_program: String,
    /// Resolver mode for this deployment
    pub source_mode: SourceMode,
    /// Parallel connections requested from the fetch tool
    pub fetch_connections: u8,
    /// Minimum progress increase, in percentage points, worth a notification
    pub progress_threshold: u8,
    /// How long to wait for an artifact to appear after a fetch
    pub artifact_wait: Duration,
    /// Upper bound for a single external invocation; `None` waits forever
    pub process_timeout: Option<Duration>,
    /// Quality tiers used when a request does not name any
    pub default_qualities: Vec<u32>,
    /// Base URL of the episode catalog
    pub catalog_base_url: String,
    /// How long catalog listings are cached; zero disables the cache
    pub catalog_cache_ttl: Duration,
    /// Directory receiving per-quality tool logs, if any
    pub log_dir: Option<PathBuf>,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            download_root: default_download_root(),
            resolver_program: "animepahe-cli".to_string(),
            fetcher_program: "aria2c".to_string(),
            source_mode: SourceMode::Url,
            fetch_connections: 16,
            progress_threshold: 10,
            artifact_wait: Duration::from_secs(5),
            process_timeout: None,
            default_qualities: DEFAULT_QUALITIES.to_vec(),
            catalog_base_url: "https://animepahe.ru".to_string(),
            catalog_cache_ttl: Duration::from_secs(60 * 60),
            log_dir: None,
        }
    }
}

/// Platform directories for this application
pub(crate) fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "episode-courier", "episode-courier")
}

/// Default download root
///
/// Returns the platform-specific data directory:
/// - Linux: ~/.local/share/episode-courier/downloads/
/// - macOS: ~/Library/Application Support/org.episode-courier.episode-courier/downloads/
/// - Windows: %APPDATA%\episode-courier\episode-courier\data\downloads\
///
/// Falls back to `./downloads` when no home directory can be determined.
pub fn default_download_root() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("downloads"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}
