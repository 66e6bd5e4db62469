//! # Redis Ranking Index
//!
//! Sorted-set implementation of [`RankingIndex`] over one multiplexed async
//! connection. Three keys carry the whole structure: the sorted set of
//! composite scores, a hash of exact display ratings, and the version
//! counter. Writes pipeline all three mutations into a single round-trip.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::{AsyncCommands, Client};

use super::{IndexError, RankingIndex};

/// Sorted set holding `(username, composite score)`.
pub const LEADERBOARD_KEY: &str = "leaderboard:ratings";
/// Hash holding `username -> exact display rating`.
pub const METADATA_KEY: &str = "leaderboard:metadata";
/// Monotonic counter bumped once per accepted write.
pub const VERSION_KEY: &str = "leaderboard:version";

/// Divisor applied to the normalised timestamp; chosen so the fractional
/// part of the composite stays strictly inside (0, 1).
pub const TIMESTAMP_DIVISOR: f64 = 10_000_000_000.0;

// Timestamps are normalised to 10 ms units since this epoch
// (2025-01-01T00:00:00Z). One unit moves the composite by 1e-10, three
// orders of magnitude above the f64 ulp at rating 5000, and the divisor
// keeps the fraction inside (0, 1) for roughly three years of era.
const COMPOSITE_EPOCH_NANOS: i64 = 1_735_689_600_000_000_000;
const UNIT_NANOS: i64 = 10_000_000;

/// Composite score for consistent tie-breaking: `rating + (1 - t/10^10)`.
///
/// For two writes at the same rating, the earlier one yields the strictly
/// greater composite (writes at least one 10 ms unit apart). The integer
/// part is always the display rating, recoverable via floor.
pub fn composite_score(rating: i32, t_nanos: i64) -> f64 {
    let units = ((t_nanos - COMPOSITE_EPOCH_NANOS) / UNIT_NANOS).clamp(1, 9_999_999_999);
    f64::from(rating) + (1.0 - units as f64 / TIMESTAMP_DIVISOR)
}

/// Recovers the display rating from a composite score.
pub fn extract_base_rating(composite: f64) -> i32 {
    composite.floor() as i32
}

/// Redis-backed [`RankingIndex`].
pub struct RedisIndex {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisIndex {
    /// Opens a multiplexed connection to the given Redis URL.
    pub async fn connect(url: &str) -> Result<Self, IndexError> {
        let client = Client::open(url).map_err(transport)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(transport)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RankingIndex for RedisIndex {
    async fn upsert(&self, username: &str, rating: i32, t_nanos: i64) -> Result<(), IndexError> {
        let mut conn = self.conn.clone();
        let composite = composite_score(rating, t_nanos);

        // One pipeline, one round-trip: sorted set, metadata, version.
        redis::pipe()
            .zadd(LEADERBOARD_KEY, username, composite)
            .ignore()
            .hset(METADATA_KEY, username, rating)
            .ignore()
            .incr(VERSION_KEY, 1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(transport)
    }

    async fn score(&self, username: &str) -> Result<i32, IndexError> {
        let mut conn = self.conn.clone();
        let rating: Option<i32> = conn
            .hget(METADATA_KEY, username)
            .await
            .map_err(transport)?;
        rating.ok_or(IndexError::NotFound)
    }

    async fn score_batch(&self, usernames: &[String]) -> Result<HashMap<String, i32>, IndexError> {
        if usernames.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(METADATA_KEY);
        for username in usernames {
            cmd.arg(username);
        }
        let values: Vec<Option<i32>> = cmd.query_async(&mut conn).await.map_err(transport)?;

        let mut scores = HashMap::with_capacity(usernames.len());
        for (username, value) in usernames.iter().zip(values) {
            if let Some(rating) = value {
                scores.insert(username.clone(), rating);
            }
        }
        Ok(scores)
    }

    async fn rank_of(&self, username: &str) -> Result<u64, IndexError> {
        let mut conn = self.conn.clone();
        let composite: Option<f64> = conn
            .zscore(LEADERBOARD_KEY, username)
            .await
            .map_err(transport)?;
        let composite = composite.ok_or(IndexError::NotFound)?;

        // Strict lower bound honours the composite tie-break: members with
        // the exact same composite do not count above each other.
        let above: u64 = redis::cmd("ZCOUNT")
            .arg(LEADERBOARD_KEY)
            .arg(format!("({composite}"))
            .arg("+inf")
            .query_async(&mut conn)
            .await
            .map_err(transport)?;
        Ok(above + 1)
    }

    async fn top_range(&self, offset: u64, limit: u64) -> Result<Vec<(String, i32)>, IndexError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let start = offset as isize;
        let stop = (offset + limit - 1) as isize;
        let members: Vec<(String, f64)> = conn
            .zrevrange_withscores(LEADERBOARD_KEY, start, stop)
            .await
            .map_err(transport)?;

        // The floor of the composite is the display rating; this keeps the
        // hot read at one round-trip instead of chasing the metadata hash.
        Ok(members
            .into_iter()
            .map(|(username, composite)| (username, extract_base_rating(composite)))
            .collect())
    }

    async fn count_with_rating_above(&self, rating: i32) -> Result<u64, IndexError> {
        let mut conn = self.conn.clone();
        // Composites live strictly inside (rating, rating + 1), so every
        // member rated above `rating` sits strictly above `rating + 1`.
        redis::cmd("ZCOUNT")
            .arg(LEADERBOARD_KEY)
            .arg(format!("({}", rating + 1))
            .arg("+inf")
            .query_async(&mut conn)
            .await
            .map_err(transport)
    }

    async fn cardinality(&self) -> Result<u64, IndexError> {
        let mut conn = self.conn.clone();
        conn.zcard(LEADERBOARD_KEY).await.map_err(transport)
    }

    async fn version(&self) -> Result<u64, IndexError> {
        let mut conn = self.conn.clone();
        let version: Option<u64> = conn.get(VERSION_KEY).await.map_err(transport)?;
        Ok(version.unwrap_or(0))
    }

    async fn bulk_upsert(
        &self,
        users: &HashMap<String, i32>,
        t_nanos: i64,
    ) -> Result<(), IndexError> {
        if users.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        let mut t = t_nanos;
        for (username, rating) in users {
            pipe.zadd(LEADERBOARD_KEY, username, composite_score(*rating, t))
                .ignore()
                .hset(METADATA_KEY, username, *rating)
                .ignore();
            // Strictly increasing timestamps keep intra-batch ordering
            // deterministic.
            t += UNIT_NANOS;
        }
        // One version bump for the whole batch.
        pipe.incr(VERSION_KEY, 1).ignore();
        pipe.query_async::<()>(&mut conn).await.map_err(transport)
    }

    async fn ping(&self) -> Result<(), IndexError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(transport)?;
        Ok(())
    }
}

fn transport(err: redis::RedisError) -> IndexError {
    IndexError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::now_nanos;

    #[test]
    fn earlier_write_scores_strictly_higher() {
        let t0 = now_nanos();
        let earlier = composite_score(3000, t0);
        let later = composite_score(3000, t0 + UNIT_NANOS);
        assert!(earlier > later);
    }

    #[test]
    fn base_rating_survives_the_fraction() {
        let t = now_nanos();
        for rating in [100, 101, 2500, 4999, 5000] {
            let composite = composite_score(rating, t);
            assert_eq!(extract_base_rating(composite), rating);
            let fraction = composite - f64::from(rating);
            assert!(fraction > 0.0 && fraction < 1.0);
        }
    }

    #[test]
    fn higher_rating_always_beats_earlier_timestamp() {
        let t0 = now_nanos();
        let low_early = composite_score(1000, t0);
        let high_late = composite_score(1001, t0 + 365 * 24 * 3600 * 1_000_000_000);
        assert!(high_late > low_early);
    }

    #[test]
    fn out_of_era_timestamps_are_clamped() {
        // Pre-epoch and far-future samples must not break floor recovery.
        for t in [0, i64::MAX] {
            assert_eq!(extract_base_rating(composite_score(1234, t)), 1234);
        }
    }
}
