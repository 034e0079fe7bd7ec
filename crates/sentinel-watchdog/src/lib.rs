//! Detection layer for Sentinel.
//!
//! Polls the hybrid index for new material events on a watch-list,
//! deduplicates and gates them by salience, and hands escalations to an
//! analyzer that produces structured risk alerts.

pub mod analyzer;
pub mod error;
pub mod scheduler;
pub mod seen;
pub mod state;
pub mod watchdog;

pub use analyzer::{AnalysisService, Analyzer, RuleBasedAnalyzer};
pub use error::WatchError;
pub use scheduler::WatchdogScheduler;
pub use seen::SeenSet;
pub use state::{validate_transition, WatchState};
pub use watchdog::{Watchdog, WatchdogStatus};
