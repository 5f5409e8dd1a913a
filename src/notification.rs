//! Notification sink module
//!
//! The orchestrator reports status, progress and finished artifacts through
//! [`NotificationSink`] and never depends on a concrete transport.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Error returned when a sink rejects a notification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Number of finished status handles remembered to swallow repeated final updates
const CLOSED_HANDLES: usize = 64;

/// Handle of a posted status message that can be updated later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusHandle(pub u64);

/// Receiver of job status, progress and artifacts
///
/// Implementations must be shareable between worker threads.
pub trait NotificationSink: Send + Sync {
    /// Posts a new status message
    fn post_status(&self, text: &str) -> Result<StatusHandle, DeliveryError>;

    /// Replaces the text of a previously posted status message
    ///
    /// Repeating an identical update must be harmless.
    fn update_status(&self, handle: StatusHandle, text: &str) -> Result<(), DeliveryError>;

    /// Delivers a finished artifact with a caption
    fn post_artifact(&self, path: &Path, caption: &str) -> Result<(), DeliveryError>;
}

/// Sink writing every notification as a line to a writer (stdout by default)
pub struct ConsoleSink<W: Write + Send = io::Stdout> {
    writer: Mutex<W>,
    next_handle: AtomicU64,
    /// Last text per handle so identical updates are printed only once
    texts: Mutex<StatusTexts>,
}

/// Texts of open status messages plus the most recently finished handles
#[derive(Default)]
struct StatusTexts {
    open: HashMap<StatusHandle, String>,
    closed: VecDeque<StatusHandle>,
}

impl StatusTexts {
    /// Records `text` for `handle`, returning whether it differs from the last one
    ///
    /// A status that reaches ✅ or ❌ is finished: its entry is released and
    /// only the handle is kept in a bounded list.
    fn remember(&mut self, handle: StatusHandle, text: &str) -> bool {
        if self.closed.contains(&handle) {
            return false;
        }

        if is_final(text) {
            self.open.remove(&handle);
            if self.closed.len() == CLOSED_HANDLES {
                self.closed.pop_front();
            }
            self.closed.push_back(handle);
            return true;
        }

        match self.open.get_mut(&handle) {
            Some(previous) if previous == text => false,
            Some(previous) => {
                *previous = text.to_string();
                true
            }
            None => {
                self.open.insert(handle, text.to_string());
                true
            }
        }
    }
}

fn is_final(text: &str) -> bool {
    text.starts_with('✅') || text.starts_with('❌')
}

impl ConsoleSink<io::Stdout> {
    /// Creates a sink printing to stdout
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    /// Creates a sink writing to `writer`
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            next_handle: AtomicU64::new(1),
            texts: Mutex::new(StatusTexts::default()),
        }
    }

    /// Consumes the sink, returning the writer
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_line(&self, line: &str) -> Result<(), DeliveryError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DeliveryError("console writer poisoned".to_string()))?;
        writeln!(writer, "{}", line)
            .and_then(|_| writer.flush())
            .map_err(|e| DeliveryError(e.to_string()))
    }

    fn remember(&self, handle: StatusHandle, text: &str) -> bool {
        match self.texts.lock() {
            Ok(mut texts) => texts.remember(handle, text),
            Err(_) => true,
        }
    }
}

impl<W: Write + Send> NotificationSink for ConsoleSink<W> {
    fn post_status(&self, text: &str) -> Result<StatusHandle, DeliveryError> {
        let handle = StatusHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        self.remember(handle, text);
        self.write_line(text)?;
        Ok(handle)
    }

    fn update_status(&self, handle: StatusHandle, text: &str) -> Result<(), DeliveryError> {
        if self.remember(handle, text) {
            self.write_line(&format!("  {}", text))?;
        }
        Ok(())
    }

    fn post_artifact(&self, path: &Path, caption: &str) -> Result<(), DeliveryError> {
        if !path.is_file() {
            return Err(DeliveryError(format!("{} does not exist", path.display())));
        }
        self.write_line(&format!("📦 {} -> {}", caption, path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(sink: ConsoleSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_status_and_updates() {
        let sink = ConsoleSink::new(Vec::new());
        let first = sink.post_status("Downloading 720p ...").unwrap();
        let second = sink.post_status("Downloading 1080p ...").unwrap();
        assert_ne!(first, second);

        sink.update_status(first, "720p: 50%").unwrap();
        sink.update_status(first, "720p: 50%").unwrap();
        sink.update_status(first, "720p: 100%").unwrap();

        assert_eq!(
            output(sink),
            "Downloading 720p ...\nDownloading 1080p ...\n  720p: 50%\n  720p: 100%\n"
        );
    }

    #[test]
    fn test_finished_statuses_are_released() {
        let sink = ConsoleSink::new(Vec::new());
        for quality in 0..200 {
            let handle = sink.post_status(&format!("Downloading {}p ...", quality)).unwrap();
            sink.update_status(handle, "⬇️ Downloading ... 50%").unwrap();
            sink.update_status(handle, "✅ download complete!").unwrap();
        }
        {
            let texts = sink.texts.lock().unwrap();
            assert!(texts.open.is_empty());
            assert_eq!(texts.closed.len(), CLOSED_HANDLES);
        }

        let handle = sink.post_status("Downloading 720p ...").unwrap();
        sink.update_status(handle, "❌ 720p failed.").unwrap();
        sink.update_status(handle, "❌ 720p failed.").unwrap();

        assert_eq!(output(sink).matches("❌ 720p failed.").count(), 1);
    }

    #[test]
    fn test_artifact_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bleach_ep5_720p.mp4");
        std::fs::write(&file, b"x").unwrap();

        let sink = ConsoleSink::new(Vec::new());
        sink.post_artifact(&file, "bleach ep5 720p").unwrap();
        assert!(sink
            .post_artifact(&dir.path().join("missing.mp4"), "missing")
            .is_err());

        assert!(output(sink).contains("bleach ep5 720p"));
    }
}
