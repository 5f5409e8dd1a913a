//! Download progress parsing and throttling
//!
//! Progress readouts of external tools are free text. Parsing is best-effort:
//! a line without a recognisable percentage simply yields `None` and can
//! never fail a download.

use regex::Regex;
use std::sync::LazyLock;

/// Matches the first `NN%` / `NN.N%` token in a line
static PERCENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").expect("percent pattern is valid")
});

/// A structured progress reading taken from one output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    /// Completion in whole percent, 0 to 100
    pub percent: u8,
}

/// Extracts a percentage from a progress line
///
/// Understands aria2c readouts such as
/// `[#2089b0 400.0KiB/33.2MiB(1%) CN:1 DL:115.7KiB ETA:4m51s]` as well as
/// the `[download]  42.3% of 10MiB` style used by other downloaders.
/// Values above 100 are rejected.
pub fn parse_progress_line(line: &str) -> Option<ProgressSample> {
    let captures = PERCENT_PATTERN.captures(line)?;
    let value: f64 = captures.get(1)?.as_str().parse().ok()?;

    if !(0.0..=100.0).contains(&value) {
        return None;
    }

    Some(ProgressSample {
        percent: value.floor() as u8,
    })
}

/// Limits progress notifications to meaningful steps
///
/// A reading is passed on only when it is at least `threshold` points above
/// the last one passed on, or when it reaches 100. Passed-on values are
/// therefore strictly increasing for the lifetime of the throttle.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    threshold: u8,
    last_reported: u8,
    completed: bool,
}

impl ProgressThrottle {
    /// Creates a throttle reporting steps of at least `threshold` points
    ///
    /// A threshold of zero is treated as one.
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold: threshold.max(1),
            last_reported: 0,
            completed: false,
        }
    }

    /// Feeds one reading, returning it if it should be reported
    pub fn observe(&mut self, sample: ProgressSample) -> Option<u8> {
        if self.completed {
            return None;
        }

        let percent = sample.percent.min(100);
        let step_reached = percent >= self.last_reported.saturating_add(self.threshold);
        let finished = percent == 100 && self.last_reported < 100;

        if step_reached || finished {
            self.last_reported = percent;
            self.completed = percent == 100;
            Some(percent)
        } else {
            None
        }
    }
}
