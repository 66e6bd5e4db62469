//! Storage adapters and the traits that make them pluggable.
//!
//! The engine treats both stores as contracts: any ranking index offering the
//! sorted-set operations and any durable store offering idempotent upserts
//! can back the service. Production wiring uses Redis and PostgreSQL; tests
//! run against in-memory doubles.

pub mod cache_redis;
pub mod db_postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::models::User;

/// Failures surfaced by a ranking index. No retries happen at this layer.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("user not found")]
    NotFound,
    #[error("index transport error: {0}")]
    Transport(String),
}

/// Failures surfaced by a durable store. No retries happen at this layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found")]
    NotFound,
    #[error("failed to connect to database: {0}")]
    Connection(String),
    #[error("query execution failed: {0}")]
    Query(String),
}

/// The ordered score structure behind the hot read path.
///
/// Implementations key members by a composite score that encodes
/// (rating, inverse arrival time), keep an exact rating per username in a
/// metadata map, and maintain a monotonic version counter bumped once per
/// accepted write (once per batch for bulk loads).
#[async_trait]
pub trait RankingIndex: Send + Sync {
    /// Add-or-replace one member. The member write, the metadata write and
    /// the version increment share a single round-trip. `t_nanos` is the
    /// caller's nanosecond wall-clock sample for the tie-break encoding.
    async fn upsert(&self, username: &str, rating: i32, t_nanos: i64) -> Result<(), IndexError>;

    /// Exact display rating from the metadata map.
    async fn score(&self, username: &str) -> Result<i32, IndexError>;

    /// Exact display ratings for many users in one round-trip. Missing users
    /// are omitted silently.
    async fn score_batch(&self, usernames: &[String]) -> Result<HashMap<String, i32>, IndexError>;

    /// 1-indexed global rank: one plus the number of members whose composite
    /// score is strictly greater.
    async fn rank_of(&self, username: &str) -> Result<u64, IndexError>;

    /// Descending slice of `(username, display rating)`. The rating here is
    /// the integer part of the composite score; callers that need exactness
    /// under concurrent writes re-query via [`RankingIndex::score_batch`].
    async fn top_range(&self, offset: u64, limit: u64) -> Result<Vec<(String, i32)>, IndexError>;

    /// Number of members whose display rating is strictly greater than
    /// `rating`. Anchors tie-aware rank projection across page boundaries.
    async fn count_with_rating_above(&self, rating: i32) -> Result<u64, IndexError>;

    /// Total member count.
    async fn cardinality(&self) -> Result<u64, IndexError>;

    /// Current version counter; 0 when the counter does not exist yet.
    async fn version(&self) -> Result<u64, IndexError>;

    /// Load many members in one pipeline with strictly increasing tie-break
    /// timestamps, bumping the version counter exactly once.
    async fn bulk_upsert(
        &self,
        users: &HashMap<String, i32>,
        t_nanos: i64,
    ) -> Result<(), IndexError>;

    /// Transport health probe.
    async fn ping(&self) -> Result<(), IndexError>;
}

/// The relational store behind the background write path.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert-or-update on the username key, touching `rating` and
    /// `updated_at`. Repeating an identical upsert leaves the same row.
    async fn upsert(&self, username: &str, rating: i32) -> Result<(), StoreError>;

    /// Fetch one user by username.
    async fn get(&self, username: &str) -> Result<User, StoreError>;

    /// All users, rating descending.
    async fn all(&self) -> Result<Vec<User>, StoreError>;

    /// Insert rows in fixed-size batches, one statement per batch. Atomicity
    /// is per batch only.
    async fn bulk_insert(&self, users: &[User], batch_size: usize) -> Result<(), StoreError>;

    /// Total row count.
    async fn count(&self) -> Result<i64, StoreError>;

    /// Remove one user. Not exposed over the public API; used by tests and
    /// operational tooling.
    async fn delete(&self, username: &str) -> Result<(), StoreError>;

    /// Transport health probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Bring the schema up to date.
    async fn migrate(&self) -> Result<(), StoreError>;
}

/// Nanosecond wall-clock sample used for composite tie-breaking.
pub fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}
