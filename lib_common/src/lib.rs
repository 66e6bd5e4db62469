//! Core engine for the real-time leaderboard service.
//!
//! The library is split along the same lines as the process that hosts it:
//! `connections` holds the ranking-index (Redis) and durable-store (Postgres)
//! adapters behind pluggable traits, `core` holds the write-through worker
//! pool, the orchestrating service and the version-broadcast hub, and `jobs`
//! holds the internal load simulator. Binaries live in the `servers` crate.

pub mod configs;
pub mod connections;
pub mod core;
pub mod jobs;
pub mod models;

pub use configs::config_sys::AppConfig;
pub use connections::{DurableStore, IndexError, RankingIndex, StoreError};
pub use models::{User, MAX_RATING, MIN_RATING};
