//! External tool invocation module
//!
//! Runs the external resolver and fetch programs. Output is streamed line by
//! line to a caller-supplied handler while the child runs, so progress can be
//! reported before the process exits. Every invocation honours a
//! [`CancellationToken`] and an optional timeout.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// How often the child is checked for exit, cancellation and timeout
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of trailing output lines retained per stream
const RETAINED_LINES: usize = 200;

/// How long output is still collected once the child has exited
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Errors that can occur while running an external tool
#[derive(Debug, Error)]
pub enum ExternalToolError {
    /// The program could not be found on PATH or at the configured location
    #[error("{tool} is not installed or not on PATH")]
    NotInstalled { tool: String },

    /// The program was found but could not be started
    #[error("Failed to start {tool}: {source}")]
    SpawnFailed { tool: String, source: io::Error },

    /// Waiting for the program failed
    #[error("Failed while waiting for {tool}: {source}")]
    WaitFailed { tool: String, source: io::Error },

    /// The program exited unsuccessfully
    #[error("{tool} failed with {status}: {stderr}")]
    NonZeroExit {
        tool: String,
        status: String,
        stderr: String,
    },

    /// The program succeeded but produced none of the expected output
    #[error("{tool} produced no output")]
    EmptyOutput { tool: String },

    /// The program's output could not be interpreted
    #[error("{tool} produced unexpected output: {output}")]
    InvalidOutput { tool: String, output: String },

    /// The invocation was cancelled and the child killed
    #[error("{tool} was cancelled")]
    Cancelled { tool: String },

    /// The invocation exceeded its time budget and the child was killed
    #[error("{tool} timed out after {}s", .after.as_secs())]
    TimedOut { tool: String, after: Duration },
}

/// Cooperative cancellation flag shared between a job and its invocations
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every invocation observing this token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Description of a single external program run
#[derive(Debug, Clone)]
pub(crate) struct ToolInvocation {
    program: String,
    args: Vec<OsString>,
    working_dir: PathBuf,
    timeout: Option<Duration>,
    log_file: Option<PathBuf>,
}

/// Captured result of a successful run
#[derive(Debug, Clone, Default)]
pub(crate) struct ToolOutput {
    /// Trailing stdout lines, oldest first
    pub stdout_lines: Vec<String>,
}

impl ToolOutput {
    /// The last non-blank stdout line, trimmed
    pub fn last_line(&self) -> Option<&str> {
        self.stdout_lines
            .iter()
            .rev()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
    }
}

impl ToolInvocation {
    /// Starts describing an invocation of `program` inside `working_dir`
    pub fn new(program: impl Into<String>, working_dir: &Path) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.to_path_buf(),
            timeout: None,
            log_file: None,
        }
    }

    /// Appends one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Kills the child when it runs longer than `timeout`
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Appends the command line and its output to `log_file` after the run
    pub fn log_to(mut self, log_file: Option<PathBuf>) -> Self {
        self.log_file = log_file;
        self
    }

    /// Name used in messages: the program's file name
    pub fn tool_name(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }

    /// Runs the program, handing each stdout line to `on_line` as it arrives
    ///
    /// Lines are split on both `\n` and `\r` since download tools redraw
    /// their progress readout with carriage returns.
    pub fn run<F>(
        &self,
        cancel: &CancellationToken,
        mut on_line: F,
    ) -> Result<ToolOutput, ExternalToolError>
    where
        F: FnMut(&str),
    {
        let tool = self.tool_name();
        let program = which::which(&self.program)
            .map_err(|_| ExternalToolError::NotInstalled { tool: tool.clone() })?;

        debug!(
            tool = %tool,
            args = ?self.args,
            dir = %self.working_dir.display(),
            "starting external tool"
        );

        let mut child = Command::new(&program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExternalToolError::SpawnFailed {
                tool: tool.clone(),
                source,
            })?;

        let (line_tx, line_rx) = mpsc::channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || {
                for line in split_lines(stdout) {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }

        let (stderr_tx, stderr_rx) = mpsc::channel::<Vec<String>>();
        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                let _ = stderr_tx.send(split_lines(stderr).collect());
            });
        }

        let started = Instant::now();
        let mut stdout_tail = VecDeque::with_capacity(RETAINED_LINES);
        let mut record = |line: String| {
            on_line(&line);
            if stdout_tail.len() == RETAINED_LINES {
                stdout_tail.pop_front();
            }
            stdout_tail.push_back(line);
        };
        let mut stream_open = true;

        let status = loop {
            if stream_open {
                match line_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(line) => record(line),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => stream_open = false,
                }
            } else {
                thread::sleep(POLL_INTERVAL);
            }

            // Checked every round: a grandchild may hold stdout open after the child exits
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    kill(&mut child);
                    return Err(ExternalToolError::WaitFailed { tool, source });
                }
            }

            if cancel.is_cancelled() {
                kill(&mut child);
                return Err(ExternalToolError::Cancelled { tool });
            }

            if let Some(limit) = self.timeout {
                if started.elapsed() > limit {
                    kill(&mut child);
                    return Err(ExternalToolError::TimedOut { tool, after: limit });
                }
            }
        };

        // Output still in flight is collected until the pipes close or the grace period ends
        let drain_deadline = Instant::now() + DRAIN_GRACE;
        while stream_open {
            let remaining = drain_deadline.saturating_duration_since(Instant::now());
            match line_rx.recv_timeout(remaining) {
                Ok(line) => record(line),
                Err(_) => stream_open = false,
            }
            if Instant::now() >= drain_deadline {
                break;
            }
        }

        let remaining = drain_deadline.saturating_duration_since(Instant::now());
        let stderr_lines = stderr_rx.recv_timeout(remaining).unwrap_or_else(|_| {
            debug!(tool = %tool, "stderr still open after exit, ignoring it");
            Vec::new()
        });
        let stdout_lines: Vec<String> = stdout_tail.into_iter().collect();

        self.write_log(&status, &stdout_lines, &stderr_lines);

        if !status.success() {
            let start = stderr_lines.len().saturating_sub(RETAINED_LINES);
            return Err(ExternalToolError::NonZeroExit {
                tool,
                status: describe_status(&status),
                stderr: stderr_lines[start..].join("\n").trim().to_string(),
            });
        }

        Ok(ToolOutput { stdout_lines })
    }

    fn write_log(&self, status: &ExitStatus, stdout: &[String], stderr: &[String]) {
        let Some(log_file) = &self.log_file else {
            return;
        };

        let result = (|| -> io::Result<()> {
            if let Some(parent) = log_file.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = OpenOptions::new().create(true).append(true).open(log_file)?;

            let args: Vec<String> = self
                .args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect();
            writeln!(file, "$ {} {}", self.program, args.join(" "))?;
            for line in stdout {
                writeln!(file, "{}", line)?;
            }
            for line in stderr {
                writeln!(file, "{}", line)?;
            }
            writeln!(file, "[{}]", describe_status(status))?;
            Ok(())
        })();

        if let Err(e) = result {
            warn!(path = %log_file.display(), error = %e, "failed to write tool log");
        }
    }
}

fn kill(child: &mut Child) {
    // The child may already have exited; reaping it is all that matters
    let _ = child.kill();
    let _ = child.wait();
}

fn describe_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => "termination by signal".to_string(),
    }
}

/// Splits a byte stream into lines on `\n` and `\r`, skipping empty pieces
fn split_lines<R: Read>(reader: R) -> impl Iterator<Item = String> {
    BufReader::new(reader)
        .split(b'\n')
        .map_while(Result::ok)
        .flat_map(|chunk| {
            chunk
                .split(|b| *b == b'\r')
                .filter(|piece| !piece.is_empty())
                .map(|piece| String::from_utf8_lossy(piece).into_owned())
                .collect::<Vec<String>>()
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writes an executable shell script into `dir` and returns its path
    #[cfg(unix)]
    pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut permissions = fs::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&path, permissions).unwrap();
        path
    }

    #[test]
    fn test_split_lines_handles_carriage_returns() {
        let input: &[u8] = b"first\r\nprogress 1%\rprogress 2%\r\n\nlast";
        let lines: Vec<String> = split_lines(input).collect();
        assert_eq!(lines, vec!["first", "progress 1%", "progress 2%", "last"]);
    }

    #[test]
    fn test_last_line_skips_blank_lines() {
        let output = ToolOutput {
            stdout_lines: vec!["noise".into(), "https://cdn/x.mp4 ".into(), "   ".into()],
        };
        assert_eq!(output.last_line(), Some("https://cdn/x.mp4"));
        assert_eq!(ToolOutput::default().last_line(), None);
    }

    #[test]
    fn test_missing_program_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let result = ToolInvocation::new("episode-courier-no-such-tool-xyz", dir.path())
            .run(&CancellationToken::new(), |_| {});
        assert!(matches!(result, Err(ExternalToolError::NotInstalled { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_streams_lines_and_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "tool.sh", "echo one\necho two\necho oops >&2");

        let mut seen = Vec::new();
        let output = ToolInvocation::new(script.to_string_lossy(), dir.path())
            .run(&CancellationToken::new(), |line| seen.push(line.to_string()))
            .unwrap();

        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(output.last_line(), Some("two"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo 'no such episode' >&2\nexit 3");

        let result = ToolInvocation::new(script.to_string_lossy(), dir.path())
            .run(&CancellationToken::new(), |_| {});

        match result {
            Err(ExternalToolError::NonZeroExit { status, stderr, .. }) => {
                assert_eq!(status, "exit code 3");
                assert_eq!(stderr, "no such episode");
            }
            other => panic!("expected NonZeroExit, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_background_child_holding_stdout_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "detach.sh", "(sleep 5) &\necho done");

        let started = Instant::now();
        let output = ToolInvocation::new(script.to_string_lossy(), dir.path())
            .run(&CancellationToken::new(), |_| {})
            .unwrap();

        assert_eq!(output.last_line(), Some("done"));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "exec sleep 5");

        let started = Instant::now();
        let result = ToolInvocation::new(script.to_string_lossy(), dir.path())
            .timeout(Some(Duration::from_millis(300)))
            .run(&CancellationToken::new(), |_| {});

        assert!(matches!(result, Err(ExternalToolError::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancelled_token_stops_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "exec sleep 5");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = ToolInvocation::new(script.to_string_lossy(), dir.path())
            .run(&cancel, |_| {});

        assert!(matches!(result, Err(ExternalToolError::Cancelled { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_log_file_receives_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "tool.sh", "echo hello\necho warn >&2");
        let log = dir.path().join("logs").join("720p.log");

        ToolInvocation::new(script.to_string_lossy(), dir.path())
            .arg("-q")
            .arg("720")
            .log_to(Some(log.clone()))
            .run(&CancellationToken::new(), |_| {})
            .unwrap();

        let content = fs::read_to_string(&log).unwrap();
        assert!(content.contains("-q 720"));
        assert!(content.contains("hello"));
        assert!(content.contains("warn"));
        assert!(content.contains("[exit code 0]"));
    }
}
