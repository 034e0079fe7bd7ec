//! Watchdog state machine with validated transitions.
//!
//! Scanning is the steady state. Escalating is transient and always
//! returns to Scanning within the same cycle:
//! Scanning -> Escalating -> Scanning

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WatchError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    #[default]
    Scanning,
    Escalating,
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchState::Scanning => write!(f, "scanning"),
            WatchState::Escalating => write!(f, "escalating"),
        }
    }
}

/// Validate that a state transition is allowed.
pub fn validate_transition(from: WatchState, to: WatchState) -> Result<(), WatchError> {
    let valid = matches!(
        (from, to),
        (WatchState::Scanning, WatchState::Escalating)
            | (WatchState::Escalating, WatchState::Scanning)
    );

    if valid {
        Ok(())
    } else {
        Err(WatchError::InvalidTransition(from, to))
    }
}
