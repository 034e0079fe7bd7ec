//! Error types for the detection layer.

use sentinel_core::error::SentinelError;

use crate::state::WatchState;

/// Errors from the watchdog state machine and the analysis layer.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Invalid state transition: {0} -> {1}")]
    InvalidTransition(WatchState, WatchState),
    #[error("Analyzer failed: {0}")]
    Analyzer(String),
    #[error(transparent)]
    Core(#[from] SentinelError),
}
