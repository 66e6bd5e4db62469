//! In-memory doubles for the ranking index and the durable store. Any store
//! satisfying the trait contracts is acceptable to the engine; these keep
//! the suites hermetic and give the store enough failure knobs to exercise
//! the worker pool.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use lib_common::connections::cache_redis::{composite_score, extract_base_rating};
use lib_common::connections::{DurableStore, IndexError, RankingIndex, StoreError};
use lib_common::core::service::LeaderboardService;
use lib_common::core::worker_pool::{WorkerPool, WorkerPoolConfig};
use lib_common::models::User;

pub type MemoryService = LeaderboardService<MemoryIndex, MemoryStore>;

/// Wires a full in-memory engine. Must run inside a tokio runtime because
/// the worker pool spawns its workers immediately.
pub fn build_engine(
    pool_config: WorkerPoolConfig,
) -> (
    std::sync::Arc<MemoryIndex>,
    std::sync::Arc<MemoryStore>,
    std::sync::Arc<WorkerPool>,
    std::sync::Arc<MemoryService>,
) {
    use std::sync::Arc;

    let index = Arc::new(MemoryIndex::new());
    let store = Arc::new(MemoryStore::new());
    let pool = Arc::new(WorkerPool::start(Arc::clone(&store), pool_config));
    let service = Arc::new(LeaderboardService::new(
        Arc::clone(&index),
        Arc::clone(&store),
        Arc::clone(&pool),
    ));
    (index, store, pool, service)
}

const BULK_UNIT_NANOS: i64 = 10_000_000;

#[derive(Clone, Copy)]
struct Member {
    composite: f64,
    seq: u64,
}

#[derive(Default)]
struct IndexState {
    members: HashMap<String, Member>,
    metadata: HashMap<String, i32>,
}

/// Hermetic [`RankingIndex`]. Members with byte-identical composites fall
/// back to arrival order, which is what the composite encodes anyway.
#[derive(Default)]
pub struct MemoryIndex {
    state: Mutex<IndexState>,
    version: AtomicU64,
    seq: AtomicU64,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered(&self) -> Vec<(String, f64)> {
        let state = self.state.lock().unwrap();
        let mut members: Vec<(String, f64, u64)> = state
            .members
            .iter()
            .map(|(name, member)| (name.clone(), member.composite, member.seq))
            .collect();
        members.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        });
        members
            .into_iter()
            .map(|(name, composite, _)| (name, composite))
            .collect()
    }
}

#[async_trait]
impl RankingIndex for MemoryIndex {
    async fn upsert(&self, username: &str, rating: i32, t_nanos: i64) -> Result<(), IndexError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();
        state.members.insert(
            username.to_string(),
            Member {
                composite: composite_score(rating, t_nanos),
                seq,
            },
        );
        state.metadata.insert(username.to_string(), rating);
        drop(state);
        self.version.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn score(&self, username: &str) -> Result<i32, IndexError> {
        self.state
            .lock()
            .unwrap()
            .metadata
            .get(username)
            .copied()
            .ok_or(IndexError::NotFound)
    }

    async fn score_batch(&self, usernames: &[String]) -> Result<HashMap<String, i32>, IndexError> {
        let state = self.state.lock().unwrap();
        Ok(usernames
            .iter()
            .filter_map(|name| state.metadata.get(name).map(|r| (name.clone(), *r)))
            .collect())
    }

    async fn rank_of(&self, username: &str) -> Result<u64, IndexError> {
        let state = self.state.lock().unwrap();
        let member = state.members.get(username).ok_or(IndexError::NotFound)?;
        let above = state
            .members
            .values()
            .filter(|other| other.composite > member.composite)
            .count() as u64;
        Ok(above + 1)
    }

    async fn top_range(&self, offset: u64, limit: u64) -> Result<Vec<(String, i32)>, IndexError> {
        Ok(self
            .ordered()
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|(name, composite)| (name, extract_base_rating(composite)))
            .collect())
    }

    async fn count_with_rating_above(&self, rating: i32) -> Result<u64, IndexError> {
        let state = self.state.lock().unwrap();
        Ok(state.metadata.values().filter(|r| **r > rating).count() as u64)
    }

    async fn cardinality(&self) -> Result<u64, IndexError> {
        Ok(self.state.lock().unwrap().members.len() as u64)
    }

    async fn version(&self) -> Result<u64, IndexError> {
        Ok(self.version.load(Ordering::Relaxed))
    }

    async fn bulk_upsert(
        &self,
        users: &HashMap<String, i32>,
        t_nanos: i64,
    ) -> Result<(), IndexError> {
        let mut t = t_nanos;
        {
            let mut state = self.state.lock().unwrap();
            for (username, rating) in users {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                state.members.insert(
                    username.clone(),
                    Member {
                        composite: composite_score(*rating, t),
                        seq,
                    },
                );
                state.metadata.insert(username.clone(), *rating);
                t += BULK_UNIT_NANOS;
            }
        }
        self.version.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn ping(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

struct StoredRow {
    id: i64,
    rating: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Hermetic [`DurableStore`] with failure knobs for worker-pool tests:
/// an artificial upsert delay (blocked store), a hard failure switch, and a
/// username that triggers a panic inside the upsert.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, StoredRow>>,
    next_id: AtomicI64,
    upsert_calls: AtomicU64,
    upsert_delay: Mutex<Option<Duration>>,
    fail_upserts: AtomicBool,
    panic_username: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_upsert_delay(&self, delay: Duration) {
        *self.upsert_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    pub fn set_panic_username(&self, username: &str) {
        *self.panic_username.lock().unwrap() = Some(username.to_string());
    }

    /// Number of upsert attempts, including failed and panicked ones.
    pub fn upsert_calls(&self) -> u64 {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn upsert(&self, username: &str, rating: i32) -> Result<(), StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.upsert_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let panic_target = self.panic_username.lock().unwrap().clone();
        if let Some(target) = panic_target.as_deref() {
            if target == username {
                panic!("injected store panic for {username}");
            }
        }
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(StoreError::Query("injected failure".into()));
        }

        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(username) {
            Some(row) => {
                row.rating = rating;
                row.updated_at = now;
            }
            None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                rows.insert(
                    username.to_string(),
                    StoredRow {
                        id,
                        rating,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get(&self, username: &str) -> Result<User, StoreError> {
        let rows = self.rows.lock().unwrap();
        let row = rows.get(username).ok_or(StoreError::NotFound)?;
        Ok(User {
            id: row.id,
            username: username.to_string(),
            rating: row.rating,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }

    async fn all(&self) -> Result<Vec<User>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut users: Vec<User> = rows
            .iter()
            .map(|(name, row)| User {
                id: row.id,
                username: name.clone(),
                rating: row.rating,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect();
        users.sort_by(|a, b| b.rating.cmp(&a.rating));
        Ok(users)
    }

    async fn bulk_insert(&self, users: &[User], batch_size: usize) -> Result<(), StoreError> {
        // Batch size only affects statement chunking in the real store.
        let _ = batch_size;
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        for user in users {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            rows.insert(
                user.username.clone(),
                StoredRow {
                    id,
                    rating: user.rating,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        Ok(())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        Ok(self.rows.lock().unwrap().len() as i64)
    }

    async fn delete(&self, username: &str) -> Result<(), StoreError> {
        self.rows.lock().unwrap().remove(username);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
