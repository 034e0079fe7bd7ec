//! Fixed-cadence host for the watchdog.
//!
//! Drives `Watchdog::tick` on a tokio interval, forwards detections to the
//! analysis service and an optional channel, and stops on a shutdown signal
//! or when the watchdog reports exhaustion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use sentinel_core::types::DetectedEvent;

use crate::analyzer::AnalysisService;
use crate::watchdog::Watchdog;

/// Background scheduler that runs one watchdog cycle per cadence tick.
pub struct WatchdogScheduler {
    watchdog: Arc<Mutex<Watchdog>>,
    cadence: Duration,
    analysis: Option<Arc<AnalysisService>>,
    sink: Option<mpsc::Sender<DetectedEvent>>,
    shutdown: Arc<Notify>,
}

impl WatchdogScheduler {
    /// A zero cadence is raised to one millisecond.
    pub fn new(watchdog: Watchdog, cadence: Duration) -> Self {
        Self {
            watchdog: Arc::new(Mutex::new(watchdog)),
            cadence: cadence.max(Duration::from_millis(1)),
            analysis: None,
            sink: None,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Analyze every detection before forwarding it.
    pub fn with_analysis(mut self, analysis: Arc<AnalysisService>) -> Self {
        self.analysis = Some(analysis);
        self
    }

    /// Forward every detection to a channel.
    pub fn with_sink(mut self, sink: mpsc::Sender<DetectedEvent>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Shared handle for status reads and watch-list updates while running.
    pub fn watchdog(&self) -> Arc<Mutex<Watchdog>> {
        Arc::clone(&self.watchdog)
    }

    /// Run cycles until shutdown or exhaustion. Returns the number of
    /// cycles this call ran.
    pub async fn run(&self) -> u64 {
        let mut interval = tokio::time::interval(self.cadence);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ran = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    info!(cycles = ran, "Watchdog scheduler shutting down");
                    return ran;
                }
                _ = interval.tick() => {}
            }

            let event = {
                let mut watchdog = self.watchdog.lock().await;
                if watchdog.is_exhausted() {
                    info!(cycles = ran, "Watchdog reached its cycle cap, stopping");
                    return ran;
                }
                watchdog.tick().await
            };
            ran += 1;

            if let Some(event) = event {
                self.dispatch(event).await;
            }
        }
    }

    async fn dispatch(&self, event: DetectedEvent) {
        if let Some(ref analysis) = self.analysis {
            analysis.process(&event).await;
        }
        if let Some(ref sink) = self.sink {
            if let Err(e) = sink.send(event).await {
                warn!(error = %e, "Detection receiver dropped");
            }
        } else {
            debug!(id = %event.chunk.id, "Detection handled");
        }
    }

    /// Signal the scheduler to stop before its next cycle. A signal sent
    /// before `run` starts is kept.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::Utc;
    use sentinel_core::config::{AnalyzerConfig, IndexConfig, WatchdogConfig};
    use sentinel_core::types::Chunk;
    use sentinel_vector::embedding::Embedder;
    use sentinel_vector::index::HybridIndex;
    use uuid::Uuid;

    fn make_index() -> Arc<HybridIndex> {
        Arc::new(HybridIndex::new(
            Arc::new(Embedder::hashed(32)),
            &IndexConfig::default(),
        ))
    }

    fn make_watchdog(index: Arc<HybridIndex>, max_cycles: Option<u64>) -> Watchdog {
        Watchdog::new(
            index,
            WatchdogConfig {
                watch_list: vec!["NVDA".to_string()],
                max_cycles,
                ..WatchdogConfig::default()
            },
        )
    }

    async fn add_risky(index: &HybridIndex) {
        let chunk = Chunk {
            id: Uuid::new_v4(),
            text: "NVIDIA hit with class action lawsuit".to_string(),
            source_tag: "test".to_string(),
            ticker: Some("NVDA".to_string()),
            created_at: Utc::now(),
            sequence_index: 0,
            sequence_total: 1,
            salience: 0.6,
            attributes: BTreeMap::new(),
        };
        let embedding = index.embedder().encode_one(&chunk.text).await.unwrap();
        index.add(vec![chunk], vec![embedding]).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_run_is_retained() {
        let scheduler = WatchdogScheduler::new(make_watchdog(make_index(), None), Duration::from_secs(5));
        scheduler.shutdown();
        let ran = tokio::time::timeout(Duration::from_secs(2), scheduler.run())
            .await
            .expect("Scheduler should shut down within timeout");
        assert_eq!(ran, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_exhausted() {
        let scheduler = WatchdogScheduler::new(make_watchdog(make_index(), Some(3)), Duration::from_secs(5));
        let ran = scheduler.run().await;
        assert_eq!(ran, 3);
        let status = scheduler.watchdog().lock().await.status();
        assert_eq!(status.cycles, 3);
        assert!(status.exhausted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cadence_is_clamped() {
        let scheduler = WatchdogScheduler::new(make_watchdog(make_index(), Some(2)), Duration::ZERO);
        assert_eq!(scheduler.cadence, Duration::from_millis(1));
        assert_eq!(scheduler.run().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detections_reach_analysis_and_sink() {
        let index = make_index();
        add_risky(&index).await;

        let analysis = Arc::new(AnalysisService::rule_based(
            Arc::clone(&index),
            AnalyzerConfig::default(),
        ));
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = WatchdogScheduler::new(make_watchdog(index, Some(4)), Duration::from_secs(1))
            .with_analysis(Arc::clone(&analysis))
            .with_sink(tx);

        assert_eq!(scheduler.run().await, 4);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.ticker(), Some("NVDA"));
        assert!(rx.try_recv().is_err());
        assert_eq!(analysis.alert_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_running() {
        let scheduler = Arc::new(WatchdogScheduler::new(
            make_watchdog(make_index(), None),
            Duration::from_secs(1),
        ));
        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.run().await })
        };
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        scheduler.shutdown();
        let ran = runner.await.unwrap();
        assert!(ran >= 2);
    }
}
