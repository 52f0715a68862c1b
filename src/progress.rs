//! Follows ffmpeg's `-progress` report file from a background thread.
//!
//! ffmpeg appends blocks of `key=value` lines to the report file while it encodes.
//! The tracker re-reads the whole file on every tick, takes the newest numeric
//! `out_time_ms` (microseconds of output written) and reports it as a fraction of the
//! expected duration.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Last observed completion ratio, shared between the polling thread and readers.
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    bits: Arc<AtomicU64>,
}

impl ProgressState {
    pub fn ratio(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    fn set(&self, ratio: f64) {
        self.bits.store(ratio.to_bits(), Ordering::Relaxed);
    }
}

/// Owns one progress report file and the thread polling it. Dropping the tracker stops
/// polling and deletes the file.
pub struct ProgressTracker {
    report: Option<TempPath>,
    report_path: PathBuf,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
    state: ProgressState,
}

impl ProgressTracker {
    pub fn start<F>(dir: &Path, total_duration: f64, update: F) -> PipelineResult<Self>
    where
        F: Fn(f64) + Send + 'static,
    {
        Self::start_with_interval(dir, total_duration, POLL_INTERVAL, update)
    }

    pub fn start_with_interval<F>(
        dir: &Path,
        total_duration: f64,
        interval: Duration,
        update: F,
    ) -> PipelineResult<Self>
    where
        F: Fn(f64) + Send + 'static,
    {
        fs::create_dir_all(dir)?;
        let report = tempfile::Builder::new()
            .prefix("progress-")
            .suffix(".txt")
            .tempfile_in(dir)?
            .into_temp_path();
        let report_path = report.to_path_buf();

        let state = ProgressState::default();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_state = state.clone();
        let thread_path = report_path.clone();

        let handle = thread::Builder::new()
            .name("ffmpeg-progress".to_string())
            .spawn(move || {
                loop {
                    if let Some(seconds) = read_latest_out_time(&thread_path) {
                        if total_duration > 0.0 {
                            let ratio = (seconds / total_duration).clamp(0.0, 1.0);
                            thread_state.set(ratio);
                            update(ratio);
                        }
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;

        debug!(report = %report_path.display(), "progress tracking started");
        Ok(Self {
            report: Some(report),
            report_path,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            state,
        })
    }

    /// Where ffmpeg should write its `-progress` report.
    pub fn report_path(&self) -> &Path {
        &self.report_path
    }

    pub fn state(&self) -> ProgressState {
        self.state.clone()
    }

    /// Stops polling and deletes the report file. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("progress polling thread panicked");
            }
        }
        if let Some(report) = self.report.take() {
            match report.close() {
                Ok(()) => debug!(report = %self.report_path.display(), "progress report removed"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => {
                    let err = PipelineError::ResourceCleanupFailure {
                        path: self.report_path.clone(),
                        source,
                    };
                    warn!("{err}");
                }
            }
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_latest_out_time(path: &Path) -> Option<f64> {
    match fs::read_to_string(path) {
        Ok(contents) => latest_out_time(&contents),
        Err(e) => {
            debug!("progress report unreadable: {e}");
            None
        }
    }
}

/// Newest numeric `out_time_ms` in a progress report, in seconds.
pub fn latest_out_time(report: &str) -> Option<f64> {
    report.lines().rev().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        if key.trim() != "out_time_ms" {
            return None;
        }
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            // N/A shows up before the first frame is written
            return None;
        }
        value.parse::<f64>().ok().map(|us| us / 1_000_000.0)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;

    #[test]
    fn newest_numeric_value_wins() {
        let report = "frame=10\nout_time_ms=1000000\nprogress=continue\nframe=20\nout_time_ms=2500000\nprogress=continue\n";
        assert_eq!(latest_out_time(report), Some(2.5));
    }

    #[test]
    fn trailing_na_does_not_hide_earlier_values() {
        let report = "out_time_ms=4000000\nout_time_ms=N/A\nprogress=continue\n";
        assert_eq!(latest_out_time(report), Some(4.0));
    }

    #[test]
    fn no_usable_value() {
        assert_eq!(latest_out_time(""), None);
        assert_eq!(latest_out_time("out_time_ms=N/A\nout_time=00:00:00.000000\n"), None);
        assert_eq!(latest_out_time("out_time_ms=-5\n"), None);
    }

    #[test]
    fn similar_keys_are_ignored() {
        assert_eq!(latest_out_time("out_time_us=9000000\nout_time_ms=1000000\n"), Some(1.0));
    }

    #[test]
    fn polling_reports_clamped_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracker = ProgressTracker::start_with_interval(
            dir.path(),
            10.0,
            Duration::from_millis(10),
            move |ratio| sink.lock().unwrap().push(ratio),
        )
        .unwrap();

        fs::write(tracker.report_path(), "out_time_ms=5000000\nprogress=continue\n").unwrap();
        wait_for(|| (tracker.state().ratio() - 0.5).abs() < 1e-9);

        fs::write(tracker.report_path(), "out_time_ms=50000000\nprogress=end\n").unwrap();
        wait_for(|| (tracker.state().ratio() - 1.0).abs() < 1e-9);

        drop(tracker);
        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|r| (0.0..=1.0).contains(r)));
        assert!(seen.contains(&0.5));
        assert!(seen.contains(&1.0));
    }

    #[test]
    fn zero_duration_never_calls_back() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(0usize));
        let sink = calls.clone();
        let mut tracker = ProgressTracker::start_with_interval(
            dir.path(),
            0.0,
            Duration::from_millis(5),
            move |_| *sink.lock().unwrap() += 1,
        )
        .unwrap();
        fs::write(tracker.report_path(), "out_time_ms=1000000\n").unwrap();
        thread::sleep(Duration::from_millis(40));
        tracker.stop();
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn stop_twice_leaves_no_report_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::start(dir.path(), 5.0, |_| {}).unwrap();
        let path = tracker.report_path().to_path_buf();
        assert!(path.exists());

        tracker.stop();
        tracker.stop();
        assert!(!path.exists());
        drop(tracker);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn stop_tolerates_report_removed_underneath() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = ProgressTracker::start(dir.path(), 5.0, |_| {}).unwrap();
        fs::remove_file(tracker.report_path()).unwrap();
        tracker.stop();
        tracker.stop();
    }

    #[test]
    fn drop_cleans_up_on_unwind() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_path_buf();
        let result = std::panic::catch_unwind(move || {
            let _tracker = ProgressTracker::start(&dir_path, 5.0, |_| {}).unwrap();
            panic!("encode aborted");
        });
        assert!(result.is_err());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    fn wait_for(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for progress");
            thread::sleep(Duration::from_millis(5));
        }
    }
}
