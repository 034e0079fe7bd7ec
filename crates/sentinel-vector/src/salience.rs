//! Keyword-tier risk salience scoring.
//!
//! Deterministic lexical heuristic: each distinct high-risk keyword present
//! adds 0.2, each distinct medium-risk keyword adds 0.1, and three or more
//! distinct high-risk hits add a 0.2 bonus. The result is clamped to 1.0.

use serde::Serialize;

pub const HIGH_RISK_KEYWORDS: &[&str] = &[
    "lawsuit",
    "litigation",
    "class action",
    "settlement",
    "investigation",
    "subpoena",
    "sec investigation",
    "doj",
    "earnings miss",
    "revenue decline",
    "guidance lowered",
    "recall",
    "safety concern",
    "regulatory action",
    "data breach",
    "cybersecurity",
    "hack",
    "breach",
    "executive departure",
    "ceo resign",
    "cfo resign",
    "bankruptcy",
    "chapter 11",
    "restructuring",
    "layoff",
    "patent infringement",
    "intellectual property",
    "fraud",
    "violation",
    "delisting",
    "going concern",
];

pub const MEDIUM_RISK_KEYWORDS: &[&str] = &[
    "delay",
    "postpone",
    "suspend",
    "warning",
    "concern",
    "issue",
    "problem",
    "challenge",
    "below expectations",
    "disappointed",
];

const HIGH_WEIGHT: f64 = 0.2;
const MEDIUM_WEIGHT: f64 = 0.1;
const CLUSTER_BONUS: f64 = 0.2;
const CLUSTER_MIN_HITS: usize = 3;

/// Keywords found in a text, by tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SalienceBreakdown {
    pub high: Vec<&'static str>,
    pub medium: Vec<&'static str>,
    pub score: f64,
}

/// Stateless keyword scorer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SalienceScorer;

impl SalienceScorer {
    pub fn new() -> Self {
        Self
    }

    /// Salience in [0, 1]. Case-insensitive substring matching.
    pub fn score(&self, text: &str) -> f64 {
        self.breakdown(text).score
    }

    /// Score plus the keywords that produced it.
    pub fn breakdown(&self, text: &str) -> SalienceBreakdown {
        if text.is_empty() {
            return SalienceBreakdown::default();
        }
        let lower = text.to_lowercase();

        let high: Vec<&'static str> = HIGH_RISK_KEYWORDS
            .iter()
            .copied()
            .filter(|kw| lower.contains(kw))
            .collect();
        let medium: Vec<&'static str> = MEDIUM_RISK_KEYWORDS
            .iter()
            .copied()
            .filter(|kw| lower.contains(kw))
            .collect();

        let mut score = high.len() as f64 * HIGH_WEIGHT + medium.len() as f64 * MEDIUM_WEIGHT;
        if high.len() >= CLUSTER_MIN_HITS {
            score += CLUSTER_BONUS;
        }

        SalienceBreakdown {
            high,
            medium,
            score: score.min(1.0),
        }
    }
}
