//! Explicit timing context threaded through a compile.

use serde::Serialize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct TimingEntry {
    pub label: String,
    pub elapsed: Duration,
}

/// Handle returned by [`TimingRecorder::start`]; consumed by `stop`.
#[derive(Debug)]
#[must_use = "a timing token records nothing until it is stopped"]
pub struct TimingToken {
    label: String,
    started: Instant,
}

#[derive(Debug, Default)]
pub struct TimingRecorder {
    entries: Vec<TimingEntry>,
}

impl TimingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, label: impl Into<String>) -> TimingToken {
        TimingToken {
            label: label.into(),
            started: Instant::now(),
        }
    }

    pub fn stop(&mut self, token: TimingToken) -> Duration {
        let elapsed = token.started.elapsed();
        self.entries.push(TimingEntry {
            label: token.label,
            elapsed,
        });
        elapsed
    }

    pub fn entries(&self) -> &[TimingEntry] {
        &self.entries
    }

    pub fn total(&self) -> Duration {
        self.entries.iter().map(|entry| entry.elapsed).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_start_stop_records_entries() {
        let mut timings = TimingRecorder::new();
        let token = timings.start("compile");
        thread::sleep(Duration::from_millis(5));
        let elapsed = timings.stop(token);

        assert!(elapsed >= Duration::from_millis(5));
        assert_eq!(timings.entries().len(), 1);
        assert_eq!(timings.entries()[0].label, "compile");
    }

    #[test]
    fn test_total_sums_entries() {
        let mut timings = TimingRecorder::new();
        assert_eq!(timings.total(), Duration::ZERO);

        for label in ["measure", "measure", "rank"] {
            let token = timings.start(label);
            thread::sleep(Duration::from_millis(1));
            timings.stop(token);
        }

        assert_eq!(timings.entries().len(), 3);
        let sum: Duration = timings.entries().iter().map(|e| e.elapsed).sum();
        assert_eq!(timings.total(), sum);
        assert!(timings.total() >= Duration::from_millis(3));
    }
}
