//! # Leaderboard Service
//!
//! Orchestrates the dual-store write-through: the ranking index is updated
//! synchronously on the request path, the durable store catches up through
//! the worker pool. Reads come from the index only, with a tie-aware
//! standard-competition ("1224") rank projection on top.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::connections::{now_nanos, DurableStore, IndexError, RankingIndex, StoreError};
use crate::core::worker_pool::{ScoreUpdateTask, WorkerPool};
use crate::models::{
    LeaderboardEntry, LeaderboardResponse, SearchResponse, User, MAX_RATING, MIN_RATING,
};

/// Default page size when the requested limit is out of range.
const DEFAULT_LIMIT: i64 = 50;
/// Largest page the API serves.
const MAX_LIMIT: i64 = 100;

/// Service-level failures, already collapsed into the API taxonomy.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("user not found")]
    UserNotFound,
    #[error("ranking index failure: {0}")]
    Index(IndexError),
    #[error("durable store failure: {0}")]
    Store(StoreError),
}

impl From<IndexError> for ServiceError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotFound => ServiceError::UserNotFound,
            other => ServiceError::Index(other),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServiceError::UserNotFound,
            other => ServiceError::Store(other),
        }
    }
}

/// The orchestration layer over one ranking index and one durable store.
pub struct LeaderboardService<I, S> {
    index: Arc<I>,
    store: Arc<S>,
    worker_pool: Arc<WorkerPool>,
}

impl<I: RankingIndex, S: DurableStore> LeaderboardService<I, S> {
    pub fn new(index: Arc<I>, store: Arc<S>, worker_pool: Arc<WorkerPool>) -> Self {
        Self {
            index,
            store,
            worker_pool,
        }
    }

    /// Write-through update. The index write (including the version bump) is
    /// the observable part; the durable write is best-effort and a full
    /// worker queue is swallowed here, with the counter already recording it.
    pub async fn update_score(&self, username: &str, rating: i32) -> Result<(), ServiceError> {
        let rating = rating.clamp(MIN_RATING, MAX_RATING);

        self.index.upsert(username, rating, now_nanos()).await?;

        if let Err(err) = self.worker_pool.submit(ScoreUpdateTask {
            username: username.to_string(),
            rating,
        }) {
            debug!(%username, %err, "durable write skipped");
        }
        Ok(())
    }

    /// Paginated, tie-aware leaderboard slice. Exact ratings are re-read
    /// from the metadata map so ranks never suffer floor error from the
    /// composite encoding.
    pub async fn get_leaderboard(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<LeaderboardResponse, ServiceError> {
        let offset = offset.max(0);
        let limit = if (1..=MAX_LIMIT).contains(&limit) {
            limit
        } else {
            DEFAULT_LIMIT
        };

        let slice = self.index.top_range(offset as u64, limit as u64).await?;
        let total = self.index.cardinality().await?;

        let usernames: Vec<String> = slice.iter().map(|(name, _)| name.clone()).collect();
        let exact = self.index.score_batch(&usernames).await?;

        // A tie group can span the page boundary, so the first entry's rank
        // is anchored to its true position by rating, not to `offset + 1`.
        let first_rank = match slice.first() {
            Some((name, floor_rating)) => {
                let rating = exact.get(name).copied().unwrap_or(*floor_rating);
                self.index.count_with_rating_above(rating).await? + 1
            }
            None => offset as u64 + 1,
        };

        Ok(LeaderboardResponse {
            data: project_ranks(&slice, &exact, offset as u64, first_rank),
            offset,
            limit,
            total,
        })
    }

    /// Global rank and exact rating for one user. Either lookup missing the
    /// user yields [`ServiceError::UserNotFound`].
    pub async fn search_user(&self, username: &str) -> Result<SearchResponse, ServiceError> {
        let global_rank = self.index.rank_of(username).await?;
        let rating = self.index.score(username).await?;
        Ok(SearchResponse {
            global_rank,
            username: username.to_string(),
            rating,
        })
    }

    /// Rebuilds the ranking index from the durable store in one bulk
    /// pipeline. Intended for recovery after cache loss. Returns the number
    /// of users loaded.
    pub async fn sync_index_from_store(&self) -> Result<usize, ServiceError> {
        let users = self.store.all().await?;
        if users.is_empty() {
            info!("no users to sync into the index");
            return Ok(0);
        }

        let map: HashMap<String, i32> = users
            .iter()
            .map(|user| (user.username.clone(), user.rating))
            .collect();
        self.index.bulk_upsert(&map, now_nanos()).await?;

        info!(count = users.len(), "index rebuilt from durable store");
        Ok(users.len())
    }

    /// Full user set from the durable store; the simulator's working set.
    pub async fn get_all_users(&self) -> Result<Vec<User>, ServiceError> {
        Ok(self.store.all().await?)
    }

    /// Pings both dependencies; the first failure wins.
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        self.index.ping().await?;
        self.store.ping().await?;
        Ok(())
    }
}

/// Applies standard-competition ("1224") ranking to a score-descending
/// slice. Tied ratings share a rank; the rank after a tie group of size `k`
/// jumps by `k`. `first_rank` carries the true global rank of the slice's
/// first entry, so tie groups that started above the page keep their rank.
fn project_ranks(
    slice: &[(String, i32)],
    exact: &HashMap<String, i32>,
    offset: u64,
    first_rank: u64,
) -> Vec<LeaderboardEntry> {
    let mut entries = Vec::with_capacity(slice.len());
    let mut current_rank = first_rank;
    let mut previous_rating = 0;

    for (i, (username, floor_rating)) in slice.iter().enumerate() {
        // Fall back to the composite-derived rating if the user vanished
        // from the metadata map between the two reads.
        let rating = exact.get(username).copied().unwrap_or(*floor_rating);

        if i == 0 {
            previous_rating = rating;
        } else if rating != previous_rating {
            // A new, strictly lower group: everything above it in the board
            // outranks it, so its rank is its global position.
            current_rank = offset + i as u64 + 1;
            previous_rating = rating;
        }

        entries.push(LeaderboardEntry {
            rank: current_rank,
            username: username.clone(),
            rating,
        });
    }

    entries
}
