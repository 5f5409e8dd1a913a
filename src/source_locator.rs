//! Source location module
//!
//! Asks the external resolver for something fetchable for one
//! (episode, quality) pair: either a direct URL, or the file itself written
//! straight into the tier's working directory.

use crate::config::SourceMode;
use crate::external_tool::{CancellationToken, ExternalToolError, ToolInvocation};
use crate::resolver::EpisodeReference;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// What the resolver is asked about
#[derive(Debug, Clone, Copy)]
pub enum LocateTarget<'a> {
    /// A single resolved episode
    Episode(&'a EpisodeReference),
    /// A series link handed through unchanged
    Link(&'a str),
}

/// A fetchable source for one quality tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Direct URL to be downloaded by the fetch tool
    Url(String),
    /// Several URLs, one per episode, from a whole-series request
    Batch(Vec<String>),
    /// The resolver already produced the file in the working directory
    Direct,
}

/// Per-tier context shared by the pipeline stages
#[derive(Debug, Clone, Copy)]
pub struct TierContext<'a> {
    /// Quality tier being processed
    pub quality: u32,
    /// Scratch directory the external tools work in
    pub working_dir: &'a Path,
    /// Cancellation flag of the owning job
    pub cancel: &'a CancellationToken,
}

/// Trait for obtaining a fetchable source for one quality tier
pub trait SourceLocator: Send + Sync {
    /// Locates a source for `target` at the context's quality
    ///
    /// # Errors
    ///
    /// Returns an [`ExternalToolError`] when the resolver cannot be run,
    /// exits unsuccessfully, or (in URL mode) prints no usable URL.
    fn locate(
        &self,
        target: LocateTarget<'_>,
        ctx: &TierContext<'_>,
    ) -> Result<Source, ExternalToolError>;
}

/// Source locator driving an `animepahe-cli` compatible resolver
///
/// The resolver is called as `<program> -l <link> -q <quality>`, with `-x`
/// added in URL mode so that it prints the resolved link instead of
/// downloading. For a series link it prints one link per episode, all of
/// which are kept.
pub struct CliSourceLocator {
    program: String,
    mode: SourceMode,
    catalog_base_url: String,
    timeout: Option<Duration>,
    log_dir: Option<PathBuf>,
}

impl CliSourceLocator {
    /// Creates a locator for the given resolver program and mode
    pub fn new(
        program: impl Into<String>,
        mode: SourceMode,
        catalog_base_url: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            mode,
            catalog_base_url: catalog_base_url.into().trim_end_matches('/').to_string(),
            timeout: None,
            log_dir: None,
        }
    }

    /// Bounds each resolver run
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Appends resolver output to `{log_dir}/{quality}p.log`
    pub fn with_log_dir(mut self, log_dir: Option<PathBuf>) -> Self {
        self.log_dir = log_dir;
        self
    }

    /// Builds the link handed to the resolver
    fn target_link(&self, target: LocateTarget<'_>) -> String {
        match target {
            LocateTarget::Episode(episode) => format!(
                "{}/play/{}/{}",
                self.catalog_base_url,
                crate::catalog::AnimePaheCatalog::series_session(&episode.series_id),
                episode.session
            ),
            LocateTarget::Link(link) if link.contains("://") => link.to_string(),
            LocateTarget::Link(series) => format!("{}/anime/{}", self.catalog_base_url, series),
        }
    }
}

impl SourceLocator for CliSourceLocator {
    fn locate(
        &self,
        target: LocateTarget<'_>,
        ctx: &TierContext<'_>,
    ) -> Result<Source, ExternalToolError> {
        let link = self.target_link(target);

        let mut invocation = ToolInvocation::new(self.program.clone(), ctx.working_dir)
            .arg("-l")
            .arg(&link)
            .arg("-q")
            .arg(ctx.quality.to_string());
        if self.mode == SourceMode::Url {
            invocation = invocation.arg("-x");
        }
        let invocation = invocation
            .timeout(self.timeout)
            .log_to(self.log_dir.as_ref().map(|dir| dir.join(format!("{}p.log", ctx.quality))));

        info!(quality = ctx.quality, link = %link, mode = ?self.mode, "locating source");
        let mut urls = Vec::new();
        let output = invocation.run(ctx.cancel, |line| {
            let line = line.trim();
            if is_url(line) {
                urls.push(line.to_string());
            }
        })?;

        if self.mode == SourceMode::Direct {
            return Ok(Source::Direct);
        }

        let tool = invocation.tool_name();
        let line = output
            .last_line()
            .ok_or(ExternalToolError::EmptyOutput { tool: tool.clone() })?;

        match target {
            LocateTarget::Link(_) if urls.len() > 1 => {
                info!(quality = ctx.quality, count = urls.len(), "resolved series links");
                Ok(Source::Batch(urls))
            }
            _ if is_url(line) => Ok(Source::Url(line.to_string())),
            _ => Err(ExternalToolError::InvalidOutput {
                tool,
                output: line.to_string(),
            }),
        }
    }
}

fn is_url(line: &str) -> bool {
    line.starts_with("http://") || line.starts_with("https://")
}
