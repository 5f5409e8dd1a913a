//! Staging directory management module
//!
//! Every job works inside its own directory below the download root, named by
//! an opaque job id. Each quality tier additionally gets a scratch directory
//! inside the job directory that is removed, with anything left in it, once
//! the tier is finished. Artifact discovery only ever scans a tier's own
//! scratch directory, so concurrent jobs and sibling tiers cannot pick up
//! each other's files.

use std::fmt;
use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Opaque, sortable job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(ulid::Ulid);

impl JobId {
    /// Generates a fresh job id
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Guard for scratch resources that are cleaned up on drop
#[derive(Debug)]
pub(crate) enum ScratchGuard {
    /// Scratch directory that will be removed recursively when dropped
    Directory(PathBuf),
}

impl ScratchGuard {
    /// Get the path to the scratch resource
    pub(crate) fn path(&self) -> &Path {
        match self {
            ScratchGuard::Directory(path) => path,
        }
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        match self {
            ScratchGuard::Directory(path) => {
                // Silently ignore errors during cleanup
                let _ = fs::remove_dir_all(path);
            }
        }
    }
}

impl Deref for ScratchGuard {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.path()
    }
}

/// The staging directory of one job
#[derive(Debug, Clone)]
pub struct JobStaging {
    job_dir: PathBuf,
}

impl JobStaging {
    /// Creates `{download_root}/{job_id}`
    pub fn create(download_root: &Path, job_id: JobId) -> io::Result<Self> {
        let job_dir = download_root.join(job_id.to_string());
        fs::create_dir_all(&job_dir)?;
        Ok(Self { job_dir })
    }

    /// Directory holding the job's delivered artifacts
    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    /// Creates a fresh scratch directory for one quality tier
    ///
    /// The directory is hidden (`.{quality}p`) and emptied first if a
    /// previous attempt left it behind.
    pub(crate) fn tier_scratch(&self, quality: u32) -> io::Result<ScratchGuard> {
        let path = self.job_dir.join(format!(".{}p", quality));
        if path.exists() {
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        Ok(ScratchGuard::Directory(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_unique() {
        let first = JobId::new();
        let second = JobId::new();
        assert_ne!(first, second);
        assert_eq!(first.to_string().len(), 26);
    }

    #[test]
    fn test_job_staging_layout() {
        let root = tempfile::tempdir().unwrap();
        let job_id = JobId::new();

        let staging = JobStaging::create(root.path(), job_id).unwrap();

        assert_eq!(staging.job_dir(), root.path().join(job_id.to_string()));
        assert!(staging.job_dir().is_dir());
    }

    #[test]
    fn test_tier_scratch_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let staging = JobStaging::create(root.path(), JobId::new()).unwrap();

        let path = {
            let scratch = staging.tier_scratch(720).unwrap();
            fs::write(scratch.join("partial.mp4.aria2"), b"x").unwrap();
            assert!(scratch.is_dir());
            scratch.path().to_path_buf()
        };

        assert!(!path.exists());
        assert!(staging.job_dir().is_dir());
    }

    #[test]
    fn test_tier_scratch_starts_empty() {
        let root = tempfile::tempdir().unwrap();
        let staging = JobStaging::create(root.path(), JobId::new()).unwrap();
        let leftover = staging.job_dir().join(".360p");
        fs::create_dir_all(&leftover).unwrap();
        fs::write(leftover.join("stale.mp4"), b"old").unwrap();

        let scratch = staging.tier_scratch(360).unwrap();

        assert_eq!(fs::read_dir(&*scratch).unwrap().count(), 0);
    }
}
