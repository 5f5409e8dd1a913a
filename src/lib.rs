//! Episode Courier - Download anime episodes in several qualities and deliver them
//!
//! This library turns a short text request (`<series> [episode]`) into one
//! download job. The job resolves the episode against the AnimePahe catalog,
//! asks an external resolver for a source per quality tier, fetches it with
//! an accelerated downloader, and hands every finished file to a
//! [`NotificationSink`]. Tiers fail independently and every job ends with a
//! summary.

mod artifact;
mod cache;
mod catalog;
mod config;
mod download_executor;
mod external_tool;
mod file_operations;
mod notification;
mod orchestrator;
mod progress;
mod request;
mod resolver;
mod source_locator;
mod staging;

use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

// Re-export error types
pub use artifact::ArtifactError;
pub use cache::CacheError;
pub use catalog::CatalogError;
pub use external_tool::ExternalToolError;
pub use notification::DeliveryError;
pub use orchestrator::{JobAbort, StageError};
pub use request::ParseError;
pub use resolver::ResolutionError;

// Re-export pipeline types
pub use artifact::{ArtifactFile, ArtifactLocator, CanonicalName};
pub use catalog::{AnimePaheCatalog, CatalogProvider, EpisodeDescriptor, EpisodeNumber};
pub use config::{CourierConfig, SourceMode, default_download_root};
pub use download_executor::{Aria2Executor, DownloadExecutor, ExecutionResult, OutputHint};
pub use external_tool::CancellationToken;
pub use file_operations::{format_artifact_name, sanitize_filename};
pub use notification::{ConsoleSink, NotificationSink, StatusHandle};
pub use orchestrator::{
    Job, JobHandle, JobRunner, JobSummary, QualityOrchestrator, QualityTask, TaskState,
    job_directory,
};
pub use progress::{ProgressSample, ProgressThrottle, parse_progress_line};
pub use request::{DEFAULT_QUALITIES, DownloadRequest, RequestTarget, parse_request, series_slug};
pub use resolver::{EpisodeReference, EpisodeResolver};
pub use source_locator::{CliSourceLocator, LocateTarget, Source, SourceLocator, TierContext};
pub use staging::{JobId, JobStaging};

/// Usage hint shown when a request cannot be parsed
pub const USAGE: &str = "Usage: <series link or id> [episode number]";

/// Top-level error type for starting jobs
#[derive(Debug, Error)]
pub enum CourierError {
    /// The request text could not be parsed
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The worker thread for a job could not be started
    #[error("Failed to start job: {0}")]
    Spawn(#[from] io::Error),
}

/// Handles one incoming request message
///
/// Parses `text`, applies `qualities` (when non-empty) and starts the job on
/// a worker thread. A malformed request is answered with an error status on
/// `sink` and no job is started.
///
/// # Errors
///
/// Returns [`CourierError::Parse`] for malformed requests and
/// [`CourierError::Spawn`] when no worker thread could be created.
pub fn handle_message(
    runner: &JobRunner,
    text: &str,
    qualities: &[u32],
    sink: Arc<dyn NotificationSink>,
) -> Result<JobHandle, CourierError> {
    let request = match parse_request(text) {
        Ok(request) => request.with_qualities(qualities),
        Err(e) => {
            if let Err(delivery) = sink.post_status(&format!("❌ {}\n\n{}", e, USAGE)) {
                tracing::warn!(error = %delivery, "failed to post parse error");
            }
            return Err(e.into());
        }
    };

    let handle = runner.spawn(request, sink)?;
    info!(job = %handle.id(), "job queued");
    Ok(handle)
}
