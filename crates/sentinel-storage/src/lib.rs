//! Sentinel storage crate - SQLite metadata mirror for the hybrid index.
//!
//! Provides a WAL-mode SQLite database with migrations and a chunk
//! repository supporting filtered metadata lookups.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::ChunkRepository;
