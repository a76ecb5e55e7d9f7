//! Run progress: counters, rates and ETA

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Discovering,
    Planning,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled)
    }

    /// True while a run owns the orchestrator
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunPhase::Discovering | RunPhase::Planning | RunPhase::Running | RunPhase::Cancelling
        )
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Idle => "idle",
            RunPhase::Discovering => "discovering",
            RunPhase::Planning => "planning",
            RunPhase::Running => "running",
            RunPhase::Cancelling => "cancelling",
            RunPhase::Completed => "completed",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Monotonic run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineState {
    pub discovered: usize,
    pub processed: usize,
    pub skipped: usize,
    pub not_started: usize,
    pub inserted_rows: u64,
    pub failed_batches: usize,
    pub batches_loaded: usize,
}

impl PipelineState {
    /// Files with a final outcome
    pub fn accounted(&self) -> usize {
        self.processed + self.skipped + self.not_started
    }
}

/// Point-in-time view of a run, safe to hand to any thread
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub processed_files: usize,
    pub skipped_files: usize,
    pub not_started_files: usize,
    pub total_files: usize,
    pub inserted_rows: u64,
    pub failed_batches: usize,
    pub batches_loaded: usize,
    pub files_per_sec: f64,
    pub rows_per_sec: f64,
    pub eta_seconds: Option<f64>,
    pub elapsed: Duration,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        ProgressSnapshot::from_state(&PipelineState::default(), Duration::ZERO)
    }
}

impl ProgressSnapshot {
    pub fn from_state(state: &PipelineState, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let done = state.processed + state.skipped;
        let (files_per_sec, rows_per_sec) = if secs > 0.0 {
            (done as f64 / secs, state.inserted_rows as f64 / secs)
        } else {
            (0.0, 0.0)
        };
        let remaining = state.discovered.saturating_sub(state.accounted());
        let eta_seconds = (files_per_sec > 0.0).then(|| remaining as f64 / files_per_sec);

        Self {
            processed_files: state.processed,
            skipped_files: state.skipped,
            not_started_files: state.not_started,
            total_files: state.discovered,
            inserted_rows: state.inserted_rows,
            failed_batches: state.failed_batches,
            batches_loaded: state.batches_loaded,
            files_per_sec,
            rows_per_sec,
            eta_seconds,
            elapsed,
        }
    }

    /// Completed share of discovered files, 0..=100
    pub fn percent(&self) -> f64 {
        if self.total_files == 0 {
            return 100.0;
        }
        (self.processed_files + self.skipped_files + self.not_started_files) as f64 * 100.0
            / self.total_files as f64
    }
}

/// Final totals of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub phase: RunPhase,
    pub discovered: usize,
    pub processed: usize,
    pub skipped: usize,
    pub not_started: usize,
    pub inserted_rows: u64,
    pub failed_batches: usize,
    pub batches_loaded: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn new(phase: RunPhase, state: &PipelineState, elapsed: Duration) -> Self {
        Self {
            phase,
            discovered: state.discovered,
            processed: state.processed,
            skipped: state.skipped,
            not_started: state.not_started,
            inserted_rows: state.inserted_rows,
            failed_batches: state.failed_batches,
            batches_loaded: state.batches_loaded,
            elapsed,
        }
    }

    /// Every discovered file has exactly one outcome
    pub fn is_balanced(&self) -> bool {
        self.processed + self.skipped + self.not_started == self.discovered
    }
}

/// Single-writer owner of [`PipelineState`]
#[derive(Debug)]
pub struct ProgressTracker {
    state: PipelineState,
    started: Instant,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            state: PipelineState::default(),
            started: Instant::now(),
        }
    }

    /// Restart the clock, e.g. when loading begins after discovery
    pub fn restart_clock(&mut self) {
        self.started = Instant::now();
    }

    pub fn add_discovered(&mut self, files: usize) {
        self.state.discovered += files;
    }

    pub fn add_processed(&mut self, files: usize) {
        self.state.processed += files;
    }

    pub fn add_skipped(&mut self, files: usize) {
        self.state.skipped += files;
    }

    pub fn add_not_started(&mut self, files: usize) {
        self.state.not_started += files;
    }

    pub fn add_inserted_rows(&mut self, rows: u64) {
        self.state.inserted_rows += rows;
    }

    pub fn add_failed_batch(&mut self) {
        self.state.failed_batches += 1;
    }

    pub fn add_loaded_batch(&mut self) {
        self.state.batches_loaded += 1;
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::from_state(&self.state, self.elapsed())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_rates_and_eta() {
        let state = PipelineState {
            discovered: 100,
            processed: 15,
            skipped: 5,
            inserted_rows: 40_000,
            ..Default::default()
        };
        let snap = ProgressSnapshot::from_state(&state, Duration::from_secs(10));
        assert_eq!(snap.files_per_sec, 2.0);
        assert_eq!(snap.rows_per_sec, 4000.0);
        assert_eq!(snap.eta_seconds, Some(40.0));
        assert_eq!(snap.percent(), 20.0);
    }

    #[test]
    fn test_snapshot_without_progress_has_no_eta() {
        let state = PipelineState {
            discovered: 10,
            ..Default::default()
        };
        let snap = ProgressSnapshot::from_state(&state, Duration::from_secs(3));
        assert_eq!(snap.files_per_sec, 0.0);
        assert!(snap.eta_seconds.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_elapsed_uses_tokio_clock() {
        let mut tracker = ProgressTracker::new();
        tracker.add_discovered(4);
        tracker.add_processed(2);
        tokio::time::advance(Duration::from_secs(2)).await;

        let snap = tracker.snapshot();
        assert_eq!(snap.elapsed, Duration::from_secs(2));
        assert_eq!(snap.files_per_sec, 1.0);
        assert_eq!(snap.eta_seconds, Some(2.0));
    }

    #[test]
    fn test_phase_flags() {
        assert!(RunPhase::Cancelled.is_terminal());
        assert!(!RunPhase::Cancelling.is_terminal());
        assert!(RunPhase::Cancelling.is_active());
        assert!(!RunPhase::Idle.is_active());
        assert_eq!(RunPhase::Running.to_string(), "running");
    }
}
