//! Artifact location module
//!
//! Finds the file a fetch produced, verifies it, and moves it to its
//! canonical name. When the exact output path is not known (or the tool chose
//! its own name) the search directory is scanned recursively and the most
//! recently modified candidate wins.

use crate::external_tool::CancellationToken;
use crate::file_operations::{format_artifact_name, move_file};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Suffixes of files that download tools use while a transfer is in progress
const IN_PROGRESS_SUFFIXES: &[&str] = &[".aria2", ".part", ".tmp", ".ytdl"];

/// Interval between directory scans while waiting for an artifact
const SCAN_INTERVAL: Duration = Duration::from_millis(250);

/// Errors that can occur while locating or finalizing an artifact
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No candidate file appeared in the search directory
    #[error("No downloaded file found in {}", .search_dir.display())]
    NotFound { search_dir: PathBuf },

    /// The job was cancelled while waiting for a candidate
    #[error("Cancelled while waiting for a downloaded file in {}", .search_dir.display())]
    Cancelled { search_dir: PathBuf },

    /// The selected file is empty
    #[error("Downloaded file {} is empty", .path.display())]
    EmptyFile { path: PathBuf },

    /// A filesystem operation failed
    #[error("Failed to access {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// A file produced by a fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    /// Location of the file
    pub path: PathBuf,
    /// Extension including its leading dot, or empty
    pub extension: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: SystemTime,
}

impl ArtifactFile {
    /// Reads the metadata of the file at `path`
    fn from_path(path: &Path) -> Result<Self, ArtifactError> {
        let metadata = fs::metadata(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        Ok(Self {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default(),
            size: metadata.len(),
            modified,
        })
    }
}

/// Canonical naming of one tier's artifact
#[derive(Debug, Clone, Copy)]
pub struct CanonicalName<'a> {
    /// Filesystem-safe series slug
    pub series_slug: &'a str,
    /// Canonical episode number, `None` for whole-series downloads
    pub episode_number: Option<&'a str>,
    /// Quality tier
    pub quality: u32,
    /// 1-based position of the file when a download produced several
    pub part: Option<usize>,
}

/// Locates, verifies and renames fetched artifacts
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    wait: Duration,
}

impl ArtifactLocator {
    /// Creates a locator that waits up to `wait` for a candidate to appear
    pub fn new(wait: Duration) -> Self {
        Self { wait }
    }

    /// Finds the artifact of a fetch
    ///
    /// Uses `expected` directly if it exists. Otherwise scans `search_dir`
    /// recursively, polling until a candidate appears, the wait elapses or
    /// `cancel` fires, and selects the candidate with the latest modification
    /// time (ties go to the lexicographically greatest path).
    pub fn locate(
        &self,
        expected: Option<&Path>,
        search_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ArtifactFile, ArtifactError> {
        if let Some(path) = expected.filter(|path| path.is_file()) {
            debug!(path = %path.display(), "artifact found at expected path");
            return ArtifactFile::from_path(path);
        }

        let candidates = self.wait_for_candidates(search_dir, cancel)?;
        let skipped = candidates.len().saturating_sub(1);
        let newest = select_newest(candidates).ok_or_else(|| ArtifactError::NotFound {
            search_dir: search_dir.to_path_buf(),
        })?;
        if skipped > 0 {
            warn!(
                path = %newest.path.display(),
                skipped,
                "several files produced, keeping the newest"
            );
        }
        debug!(path = %newest.path.display(), "artifact selected by scan");
        Ok(newest)
    }

    /// Finds every file a multi-file fetch produced, ordered by path
    ///
    /// Waits like [`locate`](Self::locate) until at least one candidate
    /// appears.
    pub fn locate_all(
        &self,
        search_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArtifactFile>, ArtifactError> {
        let mut candidates = self.wait_for_candidates(search_dir, cancel)?;
        candidates.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(count = candidates.len(), dir = %search_dir.display(), "artifacts collected");
        Ok(candidates)
    }

    /// Polls `search_dir` until it holds at least one finished file
    fn wait_for_candidates(
        &self,
        search_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<ArtifactFile>, ArtifactError> {
        let started = Instant::now();
        loop {
            let candidates = scan_for_candidates(search_dir)?;
            if !candidates.is_empty() {
                return Ok(candidates);
            }

            if cancel.is_cancelled() {
                return Err(ArtifactError::Cancelled {
                    search_dir: search_dir.to_path_buf(),
                });
            }
            if started.elapsed() >= self.wait {
                return Err(ArtifactError::NotFound {
                    search_dir: search_dir.to_path_buf(),
                });
            }
            thread::sleep(SCAN_INTERVAL.min(self.wait));
        }
    }

    /// Verifies an artifact and moves it to its canonical name in `destination_dir`
    ///
    /// Empty files are rejected. Files whose content does not look like video
    /// are accepted with a warning, since containers such as HLS playlists are
    /// not recognised by content sniffing.
    pub fn finalize(
        &self,
        artifact: ArtifactFile,
        destination_dir: &Path,
        name: CanonicalName<'_>,
    ) -> Result<ArtifactFile, ArtifactError> {
        if artifact.size == 0 {
            return Err(ArtifactError::EmptyFile {
                path: artifact.path,
            });
        }

        if !is_video_file(&artifact.path) {
            warn!(path = %artifact.path.display(), "artifact content not recognised as video");
        }

        let extension = match name.part {
            Some(part) => format!("_{:02}{}", part, artifact.extension),
            None => artifact.extension.clone(),
        };
        let file_name =
            format_artifact_name(name.series_slug, name.episode_number, name.quality, &extension);
        let destination = destination_dir.join(file_name);

        move_file(&artifact.path, &destination).map_err(|source| ArtifactError::Io {
            path: destination.clone(),
            source,
        })?;

        info!(path = %destination.display(), size = artifact.size, "artifact ready");

        Ok(ArtifactFile {
            path: destination,
            ..artifact
        })
    }
}

/// Picks the most recently modified candidate, breaking ties by path
pub(crate) fn select_newest(candidates: Vec<ArtifactFile>) -> Option<ArtifactFile> {
    candidates.into_iter().max_by(|a, b| {
        a.modified
            .cmp(&b.modified)
            .then_with(|| a.path.cmp(&b.path))
    })
}

/// Recursively collects finished files below `dir_path`
fn scan_for_candidates(dir_path: &Path) -> Result<Vec<ArtifactFile>, ArtifactError> {
    let mut candidates = Vec::new();
    scan_directory_recursive(dir_path, &mut candidates)?;
    Ok(candidates)
}

fn scan_directory_recursive(
    dir_path: &Path,
    candidates: &mut Vec<ArtifactFile>,
) -> Result<(), ArtifactError> {
    let entries = fs::read_dir(dir_path).map_err(|source| ArtifactError::Io {
        path: dir_path.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| ArtifactError::Io {
            path: dir_path.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if path.is_dir() {
            scan_directory_recursive(&path, candidates)?;
        } else if path.is_file() && !is_in_progress(&path) {
            candidates.push(ArtifactFile::from_path(&path)?);
        }
    }

    Ok(())
}

fn is_in_progress(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    IN_PROGRESS_SUFFIXES
        .iter()
        .any(|suffix| name.ends_with(suffix))
}

/// Analyzes a file to determine if it's a video file
///
/// Only reads the first 8KB of the file.
fn is_video_file(file_path: &Path) -> bool {
    const BUFFER_SIZE: usize = 8192;

    let mut file = match File::open(file_path) {
        Ok(f) => f,
        Err(_) => return false,
    };

    let mut buffer = vec![0u8; BUFFER_SIZE];
    let bytes_read = match file.read(&mut buffer) {
        Ok(n) => n,
        Err(_) => return false,
    };
    buffer.truncate(bytes_read);

    infer::is_video(&buffer)
}
