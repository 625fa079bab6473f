//! Storage system
//!
//! SQLite-backed persistence for settings, refresh progress, and request logs.

pub mod sqlite;

pub use sqlite::SqliteStore;
