//! Ingestion metrics and the ingestion event log.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_core::config::PipelineConfig;
use sentinel_core::events::IngestionEvent;

/// Point-in-time view of [`PipelineMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub last_event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct MetricsState {
    processed: u64,
    failed: u64,
    total_latency_ms: f64,
    window: VecDeque<f64>,
    last_event_time: Option<DateTime<Utc>>,
}

/// Running ingestion counters plus a bounded latency window.
///
/// Only successful ingests contribute latencies; failures bump a separate
/// counter so percentiles describe indexing cost.
#[derive(Debug)]
pub struct PipelineMetrics {
    capacity: usize,
    state: Mutex<MetricsState>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new(PipelineConfig::default().latency_window)
    }
}

impl PipelineMetrics {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(MetricsState::default()),
        }
    }

    pub fn record_success(&self, latency_ms: f64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.processed += 1;
        state.total_latency_ms += latency_ms;
        if state.window.len() == self.capacity {
            state.window.pop_front();
        }
        state.window.push_back(latency_ms);
        state.last_event_time = Some(Utc::now());
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.failed += 1;
        state.last_event_time = Some(Utc::now());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let attempts = state.processed + state.failed;
        let success_rate = if attempts == 0 {
            1.0
        } else {
            state.processed as f64 / attempts as f64
        };
        let avg_latency_ms = if state.processed == 0 {
            0.0
        } else {
            state.total_latency_ms / state.processed as f64
        };

        let mut sorted: Vec<f64> = state.window.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        MetricsSnapshot {
            processed: state.processed,
            failed: state.failed,
            success_rate,
            avg_latency_ms,
            p50_latency_ms: percentile(&sorted, 0.50),
            p95_latency_ms: percentile(&sorted, 0.95),
            p99_latency_ms: percentile(&sorted, 0.99),
            last_event_time: state.last_event_time,
        }
    }
}

/// Nearest-rank percentile over sorted samples: index `floor(n * q)`,
/// clamped to the last sample. Empty input yields 0.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * q).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Fixed-capacity ring buffer of ingestion events, newest first.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<IngestionEvent>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(PipelineConfig::default().event_log_capacity)
    }
}

impl EventLog {
    pub const DEFAULT_RECENT: usize = 20;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, event: IngestionEvent) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push_front(event);
        events.truncate(self.capacity);
    }

    /// Up to `limit` most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<IngestionEvent> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::events::IngestionStatus;
    use uuid::Uuid;

    fn make_event(filename: &str) -> IngestionEvent {
        IngestionEvent {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            ticker: None,
            chunk_count: 1,
            latency_ms: 1.0,
            max_salience: 0.0,
            status: IngestionStatus::Indexed,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = PipelineMetrics::default().snapshot();
        assert_eq!(snap.processed, 0);
        assert_eq!(snap.failed, 0);
        assert_eq!(snap.success_rate, 1.0);
        assert_eq!(snap.avg_latency_ms, 0.0);
        assert_eq!(snap.p99_latency_ms, 0.0);
        assert!(snap.last_event_time.is_none());
    }

    #[test]
    fn test_percentiles_nearest_rank() {
        let metrics = PipelineMetrics::new(100);
        for ms in 1..=100 {
            metrics.record_success(ms as f64);
        }
        let snap = metrics.snapshot();
        // floor(100 * q) over values 1..=100.
        assert_eq!(snap.p50_latency_ms, 51.0);
        assert_eq!(snap.p95_latency_ms, 96.0);
        assert_eq!(snap.p99_latency_ms, 100.0);
        assert!((snap.avg_latency_ms - 50.5).abs() < 1e-9);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let metrics = PipelineMetrics::new(3);
        for ms in [1000.0, 1.0, 2.0, 3.0] {
            metrics.record_success(ms);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.processed, 4);
        assert_eq!(snap.p99_latency_ms, 3.0);
        // The average covers every success, not just the window.
        assert!((snap.avg_latency_ms - 1006.0 / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_do_not_touch_latency() {
        let metrics = PipelineMetrics::default();
        metrics.record_success(10.0);
        metrics.record_failure();
        metrics.record_failure();
        metrics.record_failure();
        let snap = metrics.snapshot();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.failed, 3);
        assert!((snap.success_rate - 0.25).abs() < 1e-9);
        assert_eq!(snap.p50_latency_ms, 10.0);
        assert!(snap.last_event_time.is_some());
    }

    #[test]
    fn test_percentile_single_sample() {
        assert_eq!(percentile(&[7.0], 0.99), 7.0);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_event_log_newest_first_and_bounded() {
        let log = EventLog::new(3);
        for name in ["a", "b", "c", "d"] {
            log.push(make_event(name));
        }
        assert_eq!(log.len(), 3);
        let names: Vec<String> = log.recent(10).into_iter().map(|e| e.filename).collect();
        assert_eq!(names, vec!["d", "c", "b"]);
        assert_eq!(log.recent(1)[0].filename, "d");
    }
}
