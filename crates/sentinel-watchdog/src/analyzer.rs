//! Analysis layer above detection.
//!
//! An [`Analyzer`] turns a detected event plus retrieved history into a
//! structured verdict. [`AnalysisService`] supplies that history from the
//! hybrid index, falls back to a neutral verdict when the analyzer fails,
//! and keeps a bounded alert log.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use sentinel_core::config::AnalyzerConfig;
use sentinel_core::types::{Alert, Analysis, DetectedEvent, QueryFilter, RecommendedAction, RiskLevel};
use sentinel_vector::index::{HybridIndex, QueryHit};
use sentinel_vector::salience::SalienceScorer;

use crate::error::WatchError;

/// Produces a risk verdict for one detected event.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Short identifier recorded on alerts.
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        event: &DetectedEvent,
        context: &[QueryHit],
    ) -> Result<Analysis, WatchError>;
}

/// Deterministic salience-banded analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedAnalyzer {
    scorer: SalienceScorer,
}

impl RuleBasedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Analyzer for RuleBasedAnalyzer {
    fn name(&self) -> &str {
        "rule_based"
    }

    async fn analyze(
        &self,
        event: &DetectedEvent,
        context: &[QueryHit],
    ) -> Result<Analysis, WatchError> {
        let (risk_level, action, confidence, headline, counter_thesis) = if event.salience > 0.7 {
            (
                RiskLevel::High,
                RecommendedAction::Reduce,
                0.6,
                "High-salience event detected",
                "Event may resolve favorably",
            )
        } else if event.salience > 0.4 {
            (
                RiskLevel::Medium,
                RecommendedAction::Hold,
                0.5,
                "Moderate risk event detected",
                "Event may not materially impact stock",
            )
        } else {
            (
                RiskLevel::Low,
                RecommendedAction::Hold,
                0.7,
                "Low-salience event",
                "May be more significant than detected",
            )
        };

        let breakdown = self.scorer.breakdown(&event.chunk.text);
        let mut reasoning = vec![headline.to_string()];
        if !breakdown.high.is_empty() {
            reasoning.push(format!("Risk keywords present: {}", breakdown.high.join(", ")));
        }
        if !breakdown.medium.is_empty() {
            reasoning.push(format!("Caution keywords present: {}", breakdown.medium.join(", ")));
        }
        reasoning.push(format!("{} related historical chunks retrieved", context.len()));

        Ok(Analysis {
            risk_level,
            action,
            confidence,
            reasoning,
            counter_thesis: counter_thesis.to_string(),
        })
    }
}

/// Context retrieval, analysis with fallback, and the alert log.
pub struct AnalysisService {
    index: Arc<HybridIndex>,
    analyzer: Arc<dyn Analyzer>,
    config: AnalyzerConfig,
    alerts: Mutex<VecDeque<Alert>>,
}

impl std::fmt::Debug for AnalysisService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisService")
            .field("analyzer", &self.analyzer.name())
            .field("config", &self.config)
            .finish()
    }
}

impl AnalysisService {
    pub fn new(index: Arc<HybridIndex>, analyzer: Arc<dyn Analyzer>, config: AnalyzerConfig) -> Self {
        Self {
            index,
            analyzer,
            config,
            alerts: Mutex::new(VecDeque::new()),
        }
    }

    /// Service backed by [`RuleBasedAnalyzer`].
    pub fn rule_based(index: Arc<HybridIndex>, config: AnalyzerConfig) -> Self {
        Self::new(index, Arc::new(RuleBasedAnalyzer::new()), config)
    }

    /// History for the event's ticker over the context window.
    pub async fn retrieve_context(&self, event: &DetectedEvent) -> Vec<QueryHit> {
        let ticker = event.ticker().unwrap_or("");
        let mut filter = QueryFilter::new().with_max_age(self.config.context_window());
        if let Some(t) = event.ticker() {
            filter = filter.with_ticker(t);
        }
        let query = format!("historical {} risks lawsuits earnings", ticker);
        self.index
            .query_or_empty(&query, self.config.context_k, &filter)
            .await
    }

    /// Analyze an event, record the alert, and return it.
    pub async fn process(&self, event: &DetectedEvent) -> Alert {
        let context = self.retrieve_context(event).await;

        let analysis = match self.analyzer.analyze(event, &context).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(
                    analyzer = self.analyzer.name(),
                    id = %event.chunk.id,
                    error = %e,
                    "Analyzer failed, using fallback verdict"
                );
                fallback_analysis(&e)
            }
        };

        let alert = Alert {
            id: event.chunk.id,
            ticker: event.chunk.ticker.clone(),
            headline: event.chunk.headline(),
            source_tag: event.chunk.source_tag.clone(),
            salience: event.salience,
            analysis,
            analyzer: self.analyzer.name().to_string(),
            created_at: Utc::now(),
        };

        info!(
            ticker = alert.ticker.as_deref().unwrap_or("-"),
            risk = %alert.analysis.risk_level,
            action = %alert.analysis.action,
            context = context.len(),
            "Alert raised"
        );

        let mut alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        alerts.push_front(alert.clone());
        alerts.truncate(self.config.alert_capacity.max(1));
        alert
    }

    /// Up to `limit` alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let alerts = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        alerts.iter().take(limit).cloned().collect()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn fallback_analysis(error: &WatchError) -> Analysis {
    let mut message = error.to_string();
    if message.chars().count() > 50 {
        message = message.chars().take(50).collect();
    }
    Analysis {
        risk_level: RiskLevel::Medium,
        action: RecommendedAction::Hold,
        confidence: 0.3,
        reasoning: vec![format!("Analysis error: {}", message)],
        counter_thesis: "Unable to complete full analysis".to_string(),
    }
}
