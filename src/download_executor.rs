//! Download execution module
//!
//! Runs the accelerated fetch tool for URL sources and reports throttled
//! progress while it runs. Batches are fetched one URL after another with
//! progress reported across the whole batch. Direct sources were already
//! downloaded by the resolver, so executing them does nothing.

use crate::external_tool::{ExternalToolError, ToolInvocation};
use crate::progress::{ProgressSample, ProgressThrottle, parse_progress_line};
use crate::source_locator::{Source, TierContext};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Extension assumed when a URL does not reveal one
const DEFAULT_EXTENSION: &str = ".mp4";

/// Where a fetch should put its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputHint {
    /// Directory the file is expected in
    pub directory: PathBuf,
    /// Desired file name without extension
    pub stem: String,
}

impl OutputHint {
    /// Expected path of the output for a given extension (including its dot)
    pub fn expected_path(&self, extension: &str) -> PathBuf {
        self.directory.join(format!("{}{}", self.stem, extension))
    }
}

/// Outcome of a successful execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Path the fetch was told to write, when it wrote exactly one file
    pub expected_path: Option<PathBuf>,
}

/// Trait for running the fetch step of one quality tier
pub trait DownloadExecutor: Send + Sync {
    /// Executes the fetch for `source`, calling `on_progress` with throttled,
    /// strictly increasing percentages
    ///
    /// # Errors
    ///
    /// Returns an [`ExternalToolError`] if the fetch tool cannot be run or
    /// exits unsuccessfully. Unreadable progress output is never an error.
    fn execute(
        &self,
        source: &Source,
        hint: &OutputHint,
        ctx: &TierContext<'_>,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<ExecutionResult, ExternalToolError>;
}

/// Download executor driving `aria2c`
pub struct Aria2Executor {
    program: String,
    connections: u8,
    progress_threshold: u8,
    timeout: Option<Duration>,
    log_dir: Option<PathBuf>,
}

impl Aria2Executor {
    /// Creates an executor for the given fetch program
    pub fn new(program: impl Into<String>, connections: u8, progress_threshold: u8) -> Self {
        Self {
            program: program.into(),
            connections: connections.clamp(1, 16),
            progress_threshold,
            timeout: None,
            log_dir: None,
        }
    }

    /// Bounds each fetch
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Appends fetch output to `{log_dir}/{quality}p.log`
    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    fn invocation(
        &self,
        url: &str,
        directory: &Path,
        file_name: &str,
        quality: u32,
    ) -> ToolInvocation {
        let connections = self.connections.to_string();
        ToolInvocation::new(self.program.clone(), directory)
            .arg("-x")
            .arg(&connections)
            .arg("-s")
            .arg(&connections)
            .arg("-d")
            .arg(directory)
            .arg("-o")
            .arg(file_name)
            .arg("--summary-interval=1")
            .arg("--console-log-level=warn")
            .arg("--allow-overwrite=true")
            .arg("--auto-file-renaming=false")
            .arg(url)
            .timeout(self.timeout)
            .log_to(self.log_dir.as_ref().map(|dir| dir.join(format!("{}p.log", quality))))
    }

    /// Fetches every URL of a batch into `{stem}_{nn}{ext}`, stopping at the
    /// first failure
    fn execute_batch(
        &self,
        urls: &[String],
        hint: &OutputHint,
        ctx: &TierContext<'_>,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<ExecutionResult, ExternalToolError> {
        let total = urls.len().max(1);
        let mut throttle = ProgressThrottle::new(self.progress_threshold);

        for (index, url) in urls.iter().enumerate() {
            let file_name = format!("{}_{:02}{}", hint.stem, index + 1, extension_from_url(url));
            info!(quality = ctx.quality, file = %file_name, part = index + 1, total, "fetching");

            self.invocation(url, &hint.directory, &file_name, ctx.quality)
                .run(ctx.cancel, |line| {
                    let Some(sample) = parse_progress_line(line) else {
                        return;
                    };
                    let overall = (index * 100 + usize::from(sample.percent)) / total;
                    let overall = ProgressSample {
                        percent: overall.min(100) as u8,
                    };
                    if let Some(percent) = throttle.observe(overall) {
                        on_progress(percent);
                    }
                })?;
        }

        Ok(ExecutionResult {
            expected_path: None,
        })
    }
}

impl DownloadExecutor for Aria2Executor {
    fn execute(
        &self,
        source: &Source,
        hint: &OutputHint,
        ctx: &TierContext<'_>,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<ExecutionResult, ExternalToolError> {
        let url = match source {
            Source::Direct => {
                debug!(quality = ctx.quality, "direct source, nothing to fetch");
                return Ok(ExecutionResult {
                    expected_path: None,
                });
            }
            Source::Batch(urls) => return self.execute_batch(urls, hint, ctx, on_progress),
            Source::Url(url) => url,
        };

        let extension = extension_from_url(url);
        let expected_path = hint.expected_path(&extension);
        let file_name = format!("{}{}", hint.stem, extension);

        info!(quality = ctx.quality, file = %file_name, "fetching");

        let mut throttle = ProgressThrottle::new(self.progress_threshold);
        self.invocation(url, &hint.directory, &file_name, ctx.quality)
            .run(ctx.cancel, |line| {
                if let Some(percent) = parse_progress_line(line).and_then(|s| throttle.observe(s)) {
                    on_progress(percent);
                }
            })?;

        Ok(ExecutionResult {
            expected_path: Some(expected_path),
        })
    }
}

/// Guesses a file extension (with leading dot) from a URL's path
fn extension_from_url(url: &str) -> String {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .next()
        .unwrap_or("");

    match path.rsplit_once('.') {
        Some((name, ext))
            if !name.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            format!(".{}", ext.to_ascii_lowercase())
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}
