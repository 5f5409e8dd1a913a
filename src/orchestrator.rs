//! Quality orchestration module
//!
//! Runs one job: resolves the episode once, then drives every requested
//! quality tier through source location, download and artifact verification
//! in declared order. A failing tier is recorded and reported, and the next
//! tier proceeds regardless. Every job ends with a summary notification.

use crate::artifact::{ArtifactError, ArtifactFile, ArtifactLocator, CanonicalName};
use crate::catalog::{AnimePaheCatalog, CachedCatalog, CatalogProvider};
use crate::cache::CacheStorage;
use crate::config::CourierConfig;
use crate::download_executor::{Aria2Executor, DownloadExecutor, OutputHint};
use crate::external_tool::{CancellationToken, ExternalToolError};
use crate::file_operations::format_artifact_name;
use crate::notification::{DeliveryError, NotificationSink, StatusHandle};
use crate::request::{DownloadRequest, RequestTarget};
use crate::resolver::{EpisodeReference, EpisodeResolver, ResolutionError};
use crate::source_locator::{CliSourceLocator, LocateTarget, Source, SourceLocator, TierContext};
use crate::staging::{JobId, JobStaging};
use humansize::{BINARY, format_size};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{error, info, warn};

/// Lifecycle state of one quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not started yet
    Pending,
    /// Asking the resolver for a source
    Resolving,
    /// Fetching the source
    Downloading,
    /// Locating and checking the produced file
    Verifying,
    /// Artifact handed to the notification sink
    Delivered,
    /// Stopped by an error
    Failed,
}

impl TaskState {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Delivered | TaskState::Failed)
    }

    fn can_advance_to(self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Resolving)
            | (Resolving, Downloading)
            | (Downloading, Verifying)
            | (Verifying, Delivered) => true,
            (current, Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// Errors scoped to a single quality tier
#[derive(Debug, Error)]
pub enum StageError {
    /// An external tool failed
    #[error(transparent)]
    ExternalTool(#[from] ExternalToolError),

    /// The produced file could not be found or verified
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The notification sink rejected the artifact
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    /// The tier's scratch directory could not be prepared
    #[error("Failed to prepare working directory: {0}")]
    Staging(io::Error),

    /// The job was cancelled before the tier started
    #[error("Cancelled before start")]
    Cancelled,
}

/// Progress of one quality tier within a job
#[derive(Debug)]
pub struct QualityTask {
    /// Quality tier, e.g. 720
    pub quality: u32,
    /// Current state
    pub state: TaskState,
    /// Source obtained from the resolver
    pub source: Option<Source>,
    /// Delivered artifacts; whole-series tiers may deliver several
    pub artifacts: Vec<PathBuf>,
    /// Error that stopped the tier
    pub error: Option<StageError>,
}

impl QualityTask {
    fn new(quality: u32) -> Self {
        Self {
            quality,
            state: TaskState::Pending,
            source: None,
            artifacts: Vec::new(),
            error: None,
        }
    }

    fn advance(&mut self, next: TaskState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        info!(quality = self.quality, from = ?self.state, to = ?next, "tier state change");
        self.state = next;
    }

    fn fail(&mut self, error: StageError) {
        warn!(quality = self.quality, state = ?self.state, error = %error, "tier failed");
        self.advance(TaskState::Failed);
        self.error = Some(error);
    }
}

/// Reason a job stopped before any tier ran
#[derive(Debug, Error)]
pub enum JobAbort {
    /// The episode could not be resolved
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The job's staging directory could not be created
    #[error("Failed to create staging directory {}: {source}", .path.display())]
    Staging { path: PathBuf, source: io::Error },
}

/// One processed download request
#[derive(Debug)]
pub struct Job {
    /// Opaque job identifier, also the staging directory name
    pub id: JobId,
    /// The request being served
    pub request: DownloadRequest,
    /// Resolved episode for single-episode requests
    pub episode: Option<EpisodeReference>,
    /// Tiers in processing order; empty when the job was aborted
    pub tasks: Vec<QualityTask>,
    /// Why the job stopped early, if it did
    pub abort: Option<JobAbort>,
}

impl Job {
    /// Counts of delivered and failed tiers
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            requested: self.request.qualities.len(),
            attempted: self.tasks.len(),
            delivered: self
                .tasks
                .iter()
                .filter(|task| task.state == TaskState::Delivered)
                .count(),
            failed: self
                .tasks
                .iter()
                .filter(|task| task.state == TaskState::Failed)
                .map(|task| task.quality)
                .collect(),
        }
    }
}

/// Completion counts of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    /// Number of tiers requested
    pub requested: usize,
    /// Number of tiers that were started
    pub attempted: usize,
    /// Number of tiers delivered
    pub delivered: usize,
    /// Tiers that failed, in processing order
    pub failed: Vec<u32>,
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Delivered {} of {} requested qualities",
            self.delivered, self.requested
        )?;
        if !self.failed.is_empty() {
            let failed: Vec<String> = self.failed.iter().map(|q| format!("{}p", q)).collect();
            write!(f, "; failed: {}", failed.join(", "))?;
        }
        if self.attempted < self.requested {
            write!(f, " ({} attempted)", self.attempted)?;
        }
        Ok(())
    }
}

/// Drives the per-quality pipeline for download jobs
pub struct QualityOrchestrator {
    resolver: EpisodeResolver<Box<dyn CatalogProvider>>,
    locator: Box<dyn SourceLocator>,
    executor: Box<dyn DownloadExecutor>,
    artifacts: ArtifactLocator,
    download_root: PathBuf,
}

impl QualityOrchestrator {
    /// Assembles an orchestrator from explicit stage implementations
    pub fn new(
        catalog: Box<dyn CatalogProvider>,
        locator: Box<dyn SourceLocator>,
        executor: Box<dyn DownloadExecutor>,
        config: &CourierConfig,
    ) -> Self {
        Self {
            resolver: EpisodeResolver::new(catalog),
            locator,
            executor,
            artifacts: ArtifactLocator::new(config.artifact_wait),
            download_root: config.download_root.clone(),
        }
    }

    /// Assembles the standard pipeline: AnimePahe catalog (cached when a TTL
    /// is configured), CLI resolver and aria2c
    pub fn from_config(config: &CourierConfig) -> Self {
        let catalog = AnimePaheCatalog::new(config.catalog_base_url.clone());
        let catalog: Box<dyn CatalogProvider> = if config.catalog_cache_ttl.is_zero() {
            Box::new(catalog)
        } else {
            match CacheStorage::open("catalog", config.catalog_cache_ttl) {
                Ok(cache) => Box::new(CachedCatalog::new(catalog, cache)),
                Err(e) => {
                    warn!(error = %e, "catalog cache unavailable, continuing without it");
                    Box::new(catalog)
                }
            }
        };

        let locator = CliSourceLocator::new(
            config.resolver_program.clone(),
            config.source_mode,
            config.catalog_base_url.clone(),
        )
        .with_timeout(config.process_timeout)
        .with_log_dir(config.log_dir.clone());

        let executor = Aria2Executor::new(
            config.fetcher_program.clone(),
            config.fetch_connections,
            config.progress_threshold,
        )
        .with_timeout(config.process_timeout)
        .with_log_dir(config.log_dir.clone());

        Self::new(catalog, Box::new(locator), Box::new(executor), config)
    }

    /// Runs a job to completion on the current thread
    pub fn run(&self, request: DownloadRequest, sink: &dyn NotificationSink) -> Job {
        self.run_job(JobId::new(), request, sink, &CancellationToken::new())
    }

    /// Runs a job, observing `cancel` at every tier and external invocation
    pub fn run_job(
        &self,
        id: JobId,
        request: DownloadRequest,
        sink: &dyn NotificationSink,
        cancel: &CancellationToken,
    ) -> Job {
        let qualities: Vec<String> = request.qualities.iter().map(|q| format!("{}p", q)).collect();
        info!(job = %id, series = request.series_id(), ordinal = ?request.ordinal(), "job started");
        post(
            sink,
            &format!(
                "🎬 Starting download for:\n{}\n\nQualities: {}",
                describe_target(&request.target),
                qualities.join(", ")
            ),
        );

        let mut job = Job {
            id,
            request,
            episode: None,
            tasks: Vec::new(),
            abort: None,
        };

        if let Err(abort) = self.prepare(&mut job) {
            error!(job = %id, error = %abort, "job aborted");
            post(sink, &format!("❌ Job failed: {}", abort));
            job.abort = Some(abort);
            post(sink, &format!("📊 {}", job.summary()));
            return job;
        }

        let staging = match JobStaging::create(&self.download_root, id) {
            Ok(staging) => staging,
            Err(source) => {
                let abort = JobAbort::Staging {
                    path: job_directory(&self.download_root, id),
                    source,
                };
                error!(job = %id, error = %abort, "job aborted");
                post(sink, &format!("❌ Job failed: {}", abort));
                job.abort = Some(abort);
                post(sink, &format!("📊 {}", job.summary()));
                return job;
            }
        };

        let series_slug = job.request.series_slug();
        for quality in job.request.qualities.clone() {
            let mut task = QualityTask::new(quality);
            let target = match (&job.episode, &job.request.target) {
                (Some(episode), _) => LocateTarget::Episode(episode),
                (None, target) => LocateTarget::Link(series_of(target)),
            };
            let name = CanonicalName {
                series_slug: &series_slug,
                episode_number: job.episode.as_ref().map(|e| e.episode_number.as_str()),
                quality,
                part: None,
            };

            self.run_tier(&mut task, target, name, &staging, sink, cancel);
            job.tasks.push(task);
        }

        let summary = job.summary();
        info!(job = %id, delivered = summary.delivered, failed = ?summary.failed, "job finished");
        post(sink, &format!("📊 {}", summary));
        job
    }

    /// Resolves the episode of single-episode requests
    fn prepare(&self, job: &mut Job) -> Result<(), JobAbort> {
        match &job.request.target {
            RequestTarget::AllEpisodes(_) => Ok(()),
            RequestTarget::SingleEpisode(series, ordinal) => {
                job.episode = Some(self.resolver.resolve(series, *ordinal)?);
                Ok(())
            }
        }
    }

    fn run_tier(
        &self,
        task: &mut QualityTask,
        target: LocateTarget<'_>,
        name: CanonicalName<'_>,
        staging: &JobStaging,
        sink: &dyn NotificationSink,
        cancel: &CancellationToken,
    ) {
        let quality = task.quality;
        let handle = post(sink, &format!("⬇️ Downloading {}p ...", quality));

        let result = if cancel.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            self.drive_tier(task, target, name, staging, sink, handle, cancel)
        };

        match result {
            Ok(()) => {
                task.advance(TaskState::Delivered);
                update(sink, handle, &format!("✅ {}p download complete!", quality));
            }
            Err(e) => {
                update(sink, handle, &format!("❌ {}p failed.\n{}", quality, e));
                task.fail(e);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn drive_tier(
        &self,
        task: &mut QualityTask,
        target: LocateTarget<'_>,
        name: CanonicalName<'_>,
        staging: &JobStaging,
        sink: &dyn NotificationSink,
        handle: Option<StatusHandle>,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let quality = task.quality;
        task.advance(TaskState::Resolving);

        let scratch = staging.tier_scratch(quality).map_err(StageError::Staging)?;
        let ctx = TierContext {
            quality,
            working_dir: scratch.path(),
            cancel,
        };

        let source = self.locator.locate(target, &ctx)?;
        task.source = Some(source.clone());
        task.advance(TaskState::Downloading);

        let hint = OutputHint {
            directory: scratch.path().to_path_buf(),
            stem: format_artifact_name(name.series_slug, name.episode_number, quality, ""),
        };
        let execution = self.executor.execute(&source, &hint, &ctx, &mut |percent: u8| {
            update(sink, handle, &format!("⬇️ Downloading {}p ... {}%", quality, percent));
        })?;

        task.advance(TaskState::Verifying);

        if name.episode_number.is_some() {
            let expected = execution.expected_path.as_deref();
            let found = self.artifacts.locate(expected, scratch.path(), cancel)?;
            let path = self.deliver(found, name, staging, sink)?;
            task.artifacts.push(path);
            return Ok(());
        }

        // A whole-series download yields one file per episode; every one is kept
        let found = self.artifacts.locate_all(scratch.path(), cancel)?;
        let numbered = found.len() > 1;
        let mut first_error = None;
        for (index, artifact) in found.into_iter().enumerate() {
            let name = CanonicalName {
                part: numbered.then_some(index + 1),
                ..name
            };
            match self.deliver(artifact, name, staging, sink) {
                Ok(path) => task.artifacts.push(path),
                Err(e) => {
                    warn!(quality, part = index + 1, error = %e, "series file not delivered");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Moves one artifact to its canonical name and hands it to the sink
    fn deliver(
        &self,
        artifact: ArtifactFile,
        name: CanonicalName<'_>,
        staging: &JobStaging,
        sink: &dyn NotificationSink,
    ) -> Result<PathBuf, StageError> {
        let artifact = self.artifacts.finalize(artifact, staging.job_dir(), name)?;
        sink.post_artifact(&artifact.path, &caption(name, artifact.size))?;
        Ok(artifact.path)
    }
}

fn series_of(target: &RequestTarget) -> &str {
    match target {
        RequestTarget::AllEpisodes(series) | RequestTarget::SingleEpisode(series, _) => series,
    }
}

fn describe_target(target: &RequestTarget) -> String {
    match target {
        RequestTarget::AllEpisodes(series) => series.clone(),
        RequestTarget::SingleEpisode(series, ordinal) => {
            format!("{} (episode {})", series, ordinal)
        }
    }
}

fn caption(name: CanonicalName<'_>, size: u64) -> String {
    let episode = match (name.episode_number, name.part) {
        (Some(number), _) => format!("Episode {}", number),
        (None, Some(part)) => format!("All episodes, part {}", part),
        (None, None) => "All episodes".to_string(),
    };
    format!(
        "{} · {} · {}p · {}",
        name.series_slug,
        episode,
        name.quality,
        format_size(size, BINARY)
    )
}

/// Posts a status message; sink failures are logged and otherwise ignored
fn post(sink: &dyn NotificationSink, text: &str) -> Option<StatusHandle> {
    match sink.post_status(text) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "failed to post status");
            None
        }
    }
}

fn update(sink: &dyn NotificationSink, handle: Option<StatusHandle>, text: &str) {
    let Some(handle) = handle else {
        return;
    };
    if let Err(e) = sink.update_status(handle, text) {
        warn!(error = %e, "failed to update status");
    }
}

/// Runs jobs on dedicated worker threads so callers are never blocked
#[derive(Clone)]
pub struct JobRunner {
    orchestrator: Arc<QualityOrchestrator>,
}

/// A job running on its own thread
pub struct JobHandle {
    id: JobId,
    cancel: CancellationToken,
    thread: JoinHandle<Job>,
}

impl JobHandle {
    /// The job's identifier
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Requests cancellation; running tools are killed and remaining tiers fail
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the job has finished
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the job and returns it
    pub fn join(self) -> thread::Result<Job> {
        self.thread.join()
    }
}

impl JobRunner {
    /// Creates a runner sharing one orchestrator between all jobs
    pub fn new(orchestrator: QualityOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Starts a job on a new worker thread
    pub fn spawn(
        &self,
        request: DownloadRequest,
        sink: Arc<dyn NotificationSink>,
    ) -> io::Result<JobHandle> {
        let id = JobId::new();
        let cancel = CancellationToken::new();
        let orchestrator = Arc::clone(&self.orchestrator);
        let job_cancel = cancel.clone();

        let thread = thread::Builder::new()
            .name(format!("job-{}", id))
            .spawn(move || orchestrator.run_job(id, request, sink.as_ref(), &job_cancel))?;

        Ok(JobHandle { id, cancel, thread })
    }
}

/// Path of the directory holding a job's artifacts
pub fn job_directory(download_root: &Path, id: JobId) -> PathBuf {
    download_root.join(id.to_string())
}
