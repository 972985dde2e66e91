//! Progress tracking and callbacks for alignment runs.
//!
//! The variational loop reports its scalar state after every iteration; any
//! number of callbacks can observe it through a [`ProgressTracker`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::engine::DeformationPhase;

/// Scalar state of the loop after one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationStats {
    pub sigma2: f64,
    pub gamma: f64,
    pub outlier_variance: f64,
    /// SVI step size used for this iteration (1 in full-batch mode).
    pub step_size: f64,
    pub phase: DeformationPhase,
}

/// Progress information for one iteration.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub iteration: usize,
    pub total_iterations: usize,
    pub stats: IterationStats,
    /// Time elapsed since start.
    pub elapsed: Duration,
    pub estimated_remaining: Option<Duration>,
}

impl ProgressInfo {
    pub fn new(iteration: usize, total_iterations: usize, stats: IterationStats, elapsed: Duration) -> Self {
        Self {
            iteration,
            total_iterations,
            stats,
            elapsed,
            estimated_remaining: None,
        }
    }

    /// Progress in percent of the iteration budget.
    pub fn progress_percent(&self) -> f64 {
        if self.total_iterations == 0 {
            return 100.0;
        }
        (self.iteration as f64 / self.total_iterations as f64) * 100.0
    }

    /// Extrapolate the remaining time from the mean time per iteration.
    pub fn calculate_remaining(&mut self) {
        if self.iteration > 0 {
            let per_iter = self.elapsed.as_secs_f64() / self.iteration as f64;
            let remaining = self.total_iterations.saturating_sub(self.iteration);
            self.estimated_remaining = Some(Duration::from_secs_f64(per_iter * remaining as f64));
        }
    }
}

/// Observer of an alignment run.
pub trait ProgressCallback: Send + Sync {
    /// Called after every iteration.
    fn on_progress(&self, info: &ProgressInfo);

    fn on_start(&self) {}

    /// Called once the loop and the final assignment are done.
    fn on_complete(&self, _info: &ProgressInfo) {}

    fn on_error(&self, _error: &str) {}
}

/// Logs progress through `tracing` every `log_interval` iterations.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 20 }
    }
}

impl ConsoleProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.iteration % self.log_interval == 0 || info.iteration + 1 == info.total_iterations {
            let remaining = info
                .estimated_remaining
                .map(|d| format!("{:.2}s", d.as_secs_f64()))
                .unwrap_or_else(|| "N/A".to_string());
            tracing::info!(
                "Iter {}/{} ({:.1}%) | sigma2: {:.6} | gamma: {:.4} | outlier variance: {:.3} | step: {:.3} | {} | ETA: {}",
                info.iteration,
                info.total_iterations,
                info.progress_percent(),
                info.stats.sigma2,
                info.stats.gamma,
                info.stats.outlier_variance,
                info.stats.step_size,
                info.stats.phase,
                remaining
            );
        }
    }

    fn on_start(&self) {
        tracing::info!("Alignment started");
    }

    fn on_complete(&self, info: &ProgressInfo) {
        tracing::info!(
            "Alignment completed in {:.2}s with sigma2 {:.6}, gamma {:.4}",
            info.elapsed.as_secs_f64(),
            info.stats.sigma2,
            info.stats.gamma
        );
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Alignment failed: {}", error);
    }
}

/// Records every reported iteration.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_history(&self) -> Vec<ProgressInfo> {
        self.history.lock().unwrap().clone()
    }

    /// Recorded sigma2 trace.
    pub fn sigma2_trace(&self) -> Vec<f64> {
        self.history.lock().unwrap().iter().map(|i| i.stats.sigma2).collect()
    }

    pub fn clear(&self) {
        self.history.lock().unwrap().clear();
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        self.history.lock().unwrap().push(info.clone());
    }
}

/// Fans progress out to registered callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start_time: Arc<Mutex<Option<Instant>>>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn start(&self) {
        *self.start_time.lock().unwrap() = Some(Instant::now());
        for callback in &self.callbacks {
            callback.on_start();
        }
    }

    fn elapsed(&self) -> Duration {
        let start_time = *self.start_time.lock().unwrap();
        start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    pub fn update(&self, iteration: usize, total_iterations: usize, stats: IterationStats) {
        if self.callbacks.is_empty() {
            return;
        }
        let mut info = ProgressInfo::new(iteration, total_iterations, stats, self.elapsed());
        info.calculate_remaining();
        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    pub fn complete(&self, iterations: usize, stats: IterationStats) {
        let info = ProgressInfo::new(iterations, iterations, stats, self.elapsed());
        for callback in &self.callbacks {
            callback.on_complete(&info);
        }
    }

    pub fn error(&self, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }
}
