use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Chunks and filters
// =============================================================================

/// A bounded, overlap-seeded unit of document text with its risk salience.
///
/// Immutable once built by the ingestion pipeline; the hybrid index owns it
/// for the rest of its lifetime.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub text: String,
    /// Where the document came from ("upload", "simulation", ...).
    pub source_tag: String,
    pub ticker: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Position of this chunk within its document.
    pub sequence_index: usize,
    /// Number of chunks the document produced.
    pub sequence_total: usize,
    /// Heuristic risk relevance in [0, 1].
    pub salience: f64,
    /// Free-form metadata (filename, parser, encoding).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Chunk {
    /// Age of the chunk relative to `now`. Chunks stamped in the future
    /// report zero age.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// First non-empty line, capped at 100 characters.
    pub fn headline(&self) -> String {
        let line = self
            .text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("");
        line.chars().take(100).collect()
    }
}

/// Metadata predicate applied to ranked candidates. Never affects scores.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Exact ticker match.
    pub ticker: Option<String>,
    /// Inclusive lower bound on salience.
    pub min_salience: Option<f64>,
    /// Only chunks created within this window of `now`.
    pub max_age: Option<Duration>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }

    pub fn with_min_salience(mut self, min_salience: f64) -> Self {
        self.min_salience = Some(min_salience);
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// True when no predicate is set.
    pub fn is_empty(&self) -> bool {
        self.ticker.is_none() && self.min_salience.is_none() && self.max_age.is_none()
    }

    /// Evaluate the predicate against a chunk's metadata.
    pub fn matches(&self, chunk: &Chunk, now: DateTime<Utc>) -> bool {
        if let Some(ref ticker) = self.ticker {
            if chunk.ticker.as_deref() != Some(ticker.as_str()) {
                return false;
            }
        }
        if let Some(min) = self.min_salience {
            if chunk.salience < min {
                return false;
            }
        }
        if let Some(max_age) = self.max_age {
            if chunk.age(now) > max_age {
                return false;
            }
        }
        true
    }

    /// Oldest creation time admitted by `max_age`, if any.
    pub fn created_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let max_age = self.max_age?;
        let delta = chrono::Duration::from_std(max_age).ok()?;
        now.checked_sub_signed(delta)
    }
}

// =============================================================================
// Detection and analysis
// =============================================================================

/// A chunk that passed the salience gate, produced at most once per id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedEvent {
    pub chunk: Chunk,
    pub salience: f64,
    pub detected_at: DateTime<Utc>,
}

impl DetectedEvent {
    pub fn ticker(&self) -> Option<&str> {
        self.chunk.ticker.as_deref()
    }
}

/// Risk classification produced by an analyzer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::High => write!(f, "HIGH"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::Low => write!(f, "LOW"),
        }
    }
}

/// Recommended portfolio action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecommendedAction {
    Sell,
    Reduce,
    Hold,
    Buy,
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecommendedAction::Sell => write!(f, "SELL"),
            RecommendedAction::Reduce => write!(f, "REDUCE"),
            RecommendedAction::Hold => write!(f, "HOLD"),
            RecommendedAction::Buy => write!(f, "BUY"),
        }
    }
}

/// Structured verdict returned by an analyzer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub risk_level: RiskLevel,
    pub action: RecommendedAction,
    pub confidence: f64,
    /// Ordered supporting points.
    pub reasoning: Vec<String>,
    pub counter_thesis: String,
}

/// An analyzed detection, kept in the alert log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Id of the escalated chunk.
    pub id: Uuid,
    pub ticker: Option<String>,
    pub headline: String,
    pub source_tag: String,
    pub salience: f64,
    pub analysis: Analysis,
    /// Name of the analyzer that produced the verdict.
    pub analyzer: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chunk(ticker: Option<&str>, salience: f64, age_secs: i64) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            text: "Some filing text".to_string(),
            source_tag: "test".to_string(),
            ticker: ticker.map(String::from),
            created_at: Utc::now() - chrono::Duration::seconds(age_secs),
            sequence_index: 0,
            sequence_total: 1,
            salience,
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = QueryFilter::new();
        assert!(filter.is_empty());
        assert!(filter.matches(&make_chunk(None, 0.0, 10_000), Utc::now()));
    }

    #[test]
    fn test_ticker_filter_is_exact() {
        let filter = QueryFilter::new().with_ticker("NVDA");
        let now = Utc::now();
        assert!(filter.matches(&make_chunk(Some("NVDA"), 0.1, 0), now));
        assert!(!filter.matches(&make_chunk(Some("nvda"), 0.1, 0), now));
        assert!(!filter.matches(&make_chunk(Some("TSLA"), 0.1, 0), now));
        assert!(!filter.matches(&make_chunk(None, 0.1, 0), now));
    }

    #[test]
    fn test_min_salience_is_inclusive() {
        let filter = QueryFilter::new().with_min_salience(0.4);
        let now = Utc::now();
        assert!(filter.matches(&make_chunk(None, 0.4, 0), now));
        assert!(filter.matches(&make_chunk(None, 0.9, 0), now));
        assert!(!filter.matches(&make_chunk(None, 0.39, 0), now));
    }

    #[test]
    fn test_max_age_window() {
        let filter = QueryFilter::new().with_max_age(Duration::from_secs(300));
        let now = Utc::now();
        assert!(filter.matches(&make_chunk(None, 0.0, 10), now));
        assert!(!filter.matches(&make_chunk(None, 0.0, 600), now));
        // Future timestamps count as fresh.
        assert!(filter.matches(&make_chunk(None, 0.0, -60), now));
    }

    #[test]
    fn test_created_after() {
        let now = Utc::now();
        assert!(QueryFilter::new().created_after(now).is_none());
        let cutoff = QueryFilter::new()
            .with_max_age(Duration::from_secs(60))
            .created_after(now)
            .unwrap();
        assert_eq!((now - cutoff).num_seconds(), 60);
    }

    #[test]
    fn test_headline_uses_first_non_empty_line() {
        let mut chunk = make_chunk(None, 0.0, 0);
        chunk.text = "\n\n  FORM 8-K  \nbody".to_string();
        assert_eq!(chunk.headline(), "FORM 8-K");

        chunk.text = "x".repeat(250);
        assert_eq!(chunk.headline().len(), 100);
    }

    #[test]
    fn test_risk_enums_serialize_uppercase() {
        assert_eq!(serde_json::to_string(&RiskLevel::High).unwrap(), "\"HIGH\"");
        assert_eq!(
            serde_json::to_string(&RecommendedAction::Reduce).unwrap(),
            "\"REDUCE\""
        );
        let parsed: RecommendedAction = serde_json::from_str("\"SELL\"").unwrap();
        assert_eq!(parsed, RecommendedAction::Sell);
        assert_eq!(RiskLevel::Medium.to_string(), "MEDIUM");
    }
}
