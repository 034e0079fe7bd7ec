//! Detection loop.
//!
//! One `tick` is one monitoring cycle: query the index for recent material
//! on the watch-list, drop already-seen and off-list candidates, gate on
//! salience, and escalate at most one event. The watchdog owns no timers;
//! a host (see [`crate::scheduler`]) decides when cycles run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sentinel_core::config::WatchdogConfig;
use sentinel_core::types::{DetectedEvent, QueryFilter};
use sentinel_vector::index::{HybridIndex, QueryHit};
use sentinel_vector::salience::SalienceScorer;

use crate::error::WatchError;
use crate::seen::SeenSet;
use crate::state::{validate_transition, WatchState};

const QUERY_PREFIX: &str = "material events risks lawsuits investigations earnings ";

/// Read-only view of the watchdog's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogStatus {
    pub state: WatchState,
    pub cycles: u64,
    pub escalations: u64,
    pub seen: usize,
    pub watch_list: Vec<String>,
    pub max_cycles: Option<u64>,
    pub exhausted: bool,
    pub last_detection: Option<DateTime<Utc>>,
}

pub struct Watchdog {
    index: Arc<HybridIndex>,
    scorer: SalienceScorer,
    config: WatchdogConfig,
    watch_list: Vec<String>,
    state: WatchState,
    seen: SeenSet,
    cycles: u64,
    escalations: u64,
    last_detection: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("watch_list", &self.watch_list)
            .finish()
    }
}

impl Watchdog {
    pub fn new(index: Arc<HybridIndex>, config: WatchdogConfig) -> Self {
        let watch_list = normalize_watch_list(&config.watch_list);
        Self {
            index,
            scorer: SalienceScorer::new(),
            config,
            watch_list,
            state: WatchState::Scanning,
            seen: SeenSet::new(),
            cycles: 0,
            escalations: 0,
            last_detection: None,
        }
    }

    /// Replace the monitored tickers. Symbols are trimmed, upper-cased, and
    /// deduplicated.
    pub fn set_watch_list(&mut self, tickers: &[String]) {
        self.watch_list = normalize_watch_list(tickers);
        info!(watch_list = ?self.watch_list, "Watch-list updated");
    }

    pub fn watch_list(&self) -> &[String] {
        &self.watch_list
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// True once `max_cycles` cycles have run.
    pub fn is_exhausted(&self) -> bool {
        self.config.max_cycles.is_some_and(|max| self.cycles >= max)
    }

    pub fn status(&self) -> WatchdogStatus {
        WatchdogStatus {
            state: self.state,
            cycles: self.cycles,
            escalations: self.escalations,
            seen: self.seen.len(),
            watch_list: self.watch_list.clone(),
            max_cycles: self.config.max_cycles,
            exhausted: self.is_exhausted(),
            last_detection: self.last_detection,
        }
    }

    /// Text used to retrieve candidates for the current watch-list.
    pub fn query_text(&self) -> String {
        format!("{}{}", QUERY_PREFIX, self.watch_list.join(" "))
    }

    /// Run one monitoring cycle. Failures never escape: a failed query is
    /// logged and treated as a cycle with no candidates.
    pub async fn tick(&mut self) -> Option<DetectedEvent> {
        if self.is_exhausted() {
            debug!(cycles = self.cycles, "Watchdog exhausted, skipping cycle");
            return None;
        }
        self.cycles += 1;

        let now = Utc::now();
        self.evict_seen(now);

        let filter = QueryFilter::new().with_max_age(self.config.recency_window());
        let hits = match self
            .index
            .query(&self.query_text(), self.config.candidate_count, &filter)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(cycle = self.cycles, error = %e, kind = e.kind(), "Watchdog query failed");
                return None;
            }
        };

        let Some((hit, salience)) = self.select(hits) else {
            debug!(cycle = self.cycles, "No new material events");
            return None;
        };

        match self.escalate(hit, salience, now) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(cycle = self.cycles, error = %e, "Escalation aborted");
                None
            }
        }
    }

    /// Highest-salience unseen, on-list candidate at or above the gate.
    /// Earlier (better-ranked) hits win ties.
    fn select(&self, hits: Vec<QueryHit>) -> Option<(QueryHit, f64)> {
        let mut best: Option<(QueryHit, f64)> = None;
        for hit in hits {
            if self.seen.contains(&hit.id) {
                continue;
            }
            if let Some(ref ticker) = hit.chunk.ticker {
                if !self.watch_list.iter().any(|w| w == ticker) {
                    continue;
                }
            }
            let salience = hit.chunk.salience.max(self.scorer.score(&hit.chunk.text));
            if salience < self.config.salience_threshold {
                continue;
            }
            if best.as_ref().map_or(true, |(_, s)| salience > *s) {
                best = Some((hit, salience));
            }
        }
        best
    }

    fn escalate(
        &mut self,
        hit: QueryHit,
        salience: f64,
        now: DateTime<Utc>,
    ) -> Result<DetectedEvent, WatchError> {
        validate_transition(self.state, WatchState::Escalating)?;
        self.seen.insert(hit.id, hit.chunk.created_at);
        self.state = WatchState::Escalating;
        self.escalations += 1;
        self.last_detection = Some(now);

        info!(
            cycle = self.cycles,
            id = %hit.id,
            ticker = hit.chunk.ticker.as_deref().unwrap_or("-"),
            salience,
            "Material event escalated"
        );
        let event = DetectedEvent {
            chunk: hit.chunk,
            salience,
            detected_at: now,
        };

        validate_transition(self.state, WatchState::Scanning)?;
        self.state = WatchState::Scanning;
        Ok(event)
    }

    fn evict_seen(&mut self, now: DateTime<Utc>) {
        let Some(retention_secs) = self.config.seen_retention_secs else {
            return;
        };
        let keep = retention_secs.max(self.config.recency_window_secs);
        let Some(cutoff) = i64::try_from(keep)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|d| now.checked_sub_signed(d))
        else {
            return;
        };
        let evicted = self.seen.evict_created_before(cutoff);
        if evicted > 0 {
            debug!(evicted, remaining = self.seen.len(), "Evicted expired seen ids");
        }
    }
}

fn normalize_watch_list(tickers: &[String]) -> Vec<String> {
    let mut list: Vec<String> = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let t = ticker.trim().to_uppercase();
        if !t.is_empty() && !list.contains(&t) {
            list.push(t);
        }
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use sentinel_core::config::IndexConfig;
    use sentinel_core::types::Chunk;
    use sentinel_vector::embedding::Embedder;
    use sentinel_vector::pipeline::IngestionPipeline;
    use uuid::Uuid;

    fn make_index() -> Arc<HybridIndex> {
        Arc::new(HybridIndex::new(
            Arc::new(Embedder::hashed(64)),
            &IndexConfig::default(),
        ))
    }

    fn config(watch: &[&str]) -> WatchdogConfig {
        WatchdogConfig {
            watch_list: watch.iter().map(|s| s.to_string()).collect(),
            ..WatchdogConfig::default()
        }
    }

    fn make_chunk(text: &str, ticker: Option<&str>, salience: f64, age_secs: i64) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            text: text.to_string(),
            source_tag: "test".to_string(),
            ticker: ticker.map(String::from),
            created_at: Utc::now() - chrono::Duration::seconds(age_secs),
            sequence_index: 0,
            sequence_total: 1,
            salience,
            attributes: BTreeMap::new(),
        }
    }

    async fn add(index: &HybridIndex, chunks: Vec<Chunk>) {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = index.embedder().encode(&texts).await.unwrap();
        index.add(chunks, embeddings).unwrap();
    }

    #[tokio::test]
    async fn test_risky_filing_escalates_exactly_once() {
        let index = make_index();
        let pipeline = IngestionPipeline::with_defaults(Arc::clone(&index));
        pipeline
            .ingest_with_ticker(
                b"Company X filed for class action lawsuit and SEC investigation",
                "x.txt",
                "upload",
                Some("X"),
            )
            .await;

        let mut watchdog = Watchdog::new(Arc::clone(&index), config(&["X"]));
        let event = watchdog.tick().await.unwrap();
        assert_eq!(event.ticker(), Some("X"));
        assert!(event.salience >= 0.3);
        assert_eq!(watchdog.state(), WatchState::Scanning);

        assert!(watchdog.tick().await.is_none());
        let status = watchdog.status();
        assert_eq!(status.cycles, 2);
        assert_eq!(status.escalations, 1);
        assert_eq!(status.seen, 1);
        assert!(status.last_detection.is_some());
    }

    #[tokio::test]
    async fn test_neutral_filing_never_escalates() {
        let index = make_index();
        let pipeline = IngestionPipeline::with_defaults(Arc::clone(&index));
        pipeline
            .ingest_with_ticker(
                b"quarterly report shows steady performance",
                "x.txt",
                "upload",
                Some("X"),
            )
            .await;

        let mut watchdog = Watchdog::new(index, config(&["X"]));
        for _ in 0..3 {
            assert!(watchdog.tick().await.is_none());
        }
        assert_eq!(watchdog.status().escalations, 0);
    }

    #[tokio::test]
    async fn test_off_list_ticker_ignored_but_untagged_allowed() {
        let index = make_index();
        add(
            &index,
            vec![
                make_chunk("fraud and bankruptcy", Some("TSLA"), 0.4, 0),
                make_chunk("a recall and a lawsuit", None, 0.4, 0),
            ],
        )
        .await;

        let mut watchdog = Watchdog::new(index, config(&["NVDA"]));
        let event = watchdog.tick().await.unwrap();
        assert!(event.ticker().is_none());
        assert!(watchdog.tick().await.is_none());
    }

    #[tokio::test]
    async fn test_highest_salience_selected_first() {
        let index = make_index();
        let low = make_chunk("a recall and a lawsuit", Some("NVDA"), 0.0, 0);
        let high = make_chunk("fraud, bankruptcy and delisting", Some("NVDA"), 0.0, 0);
        let high_id = high.id;
        let low_id = low.id;
        add(&index, vec![low, high]).await;

        let mut watchdog = Watchdog::new(index, config(&["NVDA"]));
        assert_eq!(watchdog.tick().await.unwrap().chunk.id, high_id);
        assert_eq!(watchdog.tick().await.unwrap().chunk.id, low_id);
        assert!(watchdog.tick().await.is_none());
    }

    #[tokio::test]
    async fn test_stored_salience_used_when_higher() {
        let index = make_index();
        add(&index, vec![make_chunk("plain words only", Some("AAPL"), 0.9, 0)]).await;
        let mut watchdog = Watchdog::new(index, config(&["AAPL"]));
        let event = watchdog.tick().await.unwrap();
        assert!((event.salience - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stale_chunks_outside_recency_window() {
        let index = make_index();
        add(&index, vec![make_chunk("lawsuit and fraud", Some("NVDA"), 0.8, 3_600)]).await;
        let mut watchdog = Watchdog::new(index, config(&["NVDA"]));
        assert!(watchdog.tick().await.is_none());
    }

    #[tokio::test]
    async fn test_query_failure_is_silent_no_event() {
        let index = make_index();
        // Raw 2-dim vectors make every 64-dim query a dimension mismatch.
        index
            .add(
                vec![make_chunk("lawsuit", Some("NVDA"), 0.9, 0)],
                vec![vec![1.0, 0.0]],
            )
            .unwrap();

        let mut watchdog = Watchdog::new(index, config(&["NVDA"]));
        assert!(watchdog.tick().await.is_none());
        assert!(watchdog.tick().await.is_none());
        assert_eq!(watchdog.status().cycles, 2);
        assert_eq!(watchdog.state(), WatchState::Scanning);
    }

    #[tokio::test]
    async fn test_max_cycles_exhausts() {
        let index = make_index();
        let cfg = WatchdogConfig {
            max_cycles: Some(2),
            ..config(&["NVDA"])
        };
        let mut watchdog = Watchdog::new(Arc::clone(&index), cfg);
        watchdog.tick().await;
        watchdog.tick().await;
        assert!(watchdog.is_exhausted());

        add(&index, vec![make_chunk("lawsuit and fraud", Some("NVDA"), 0.8, 0)]).await;
        assert!(watchdog.tick().await.is_none());
        assert_eq!(watchdog.status().cycles, 2);
    }

    #[tokio::test]
    async fn test_seen_eviction_never_re_escalates() {
        let index = make_index();
        add(&index, vec![make_chunk("lawsuit and fraud", Some("NVDA"), 0.8, 0)]).await;
        let cfg = WatchdogConfig {
            seen_retention_secs: Some(0),
            ..config(&["NVDA"])
        };
        let mut watchdog = Watchdog::new(index, cfg);
        assert!(watchdog.tick().await.is_some());
        // Retention is clamped to the recency window, so the fresh id stays.
        assert!(watchdog.tick().await.is_none());
        assert_eq!(watchdog.status().seen, 1);
    }

    #[tokio::test]
    async fn test_set_watch_list_normalizes() {
        let index = make_index();
        add(&index, vec![make_chunk("lawsuit and fraud", Some("TSLA"), 0.8, 0)]).await;
        let mut watchdog = Watchdog::new(index, config(&["NVDA"]));
        assert!(watchdog.tick().await.is_none());

        watchdog.set_watch_list(&[" tsla ".to_string(), "TSLA".to_string(), String::new()]);
        assert_eq!(watchdog.watch_list(), ["TSLA"]);
        assert!(watchdog.query_text().ends_with("earnings TSLA"));
        assert!(watchdog.tick().await.is_some());
    }

    #[tokio::test]
    async fn test_empty_index_is_quiet() {
        let mut watchdog = Watchdog::new(make_index(), WatchdogConfig::default());
        assert!(watchdog.tick().await.is_none());
        assert_eq!(watchdog.status().cycles, 1);
    }
}
