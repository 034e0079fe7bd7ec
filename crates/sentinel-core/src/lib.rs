//! Sentinel core crate - shared error taxonomy, configuration, and domain types.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::SentinelConfig;
pub use error::{Result, SentinelError};
pub use events::{IngestionEvent, IngestionStatus};
pub use types::*;
