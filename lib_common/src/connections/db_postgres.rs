//! # PostgreSQL Durable Store
//!
//! [`DurableStore`] implementation over an `sqlx` connection pool. The store
//! is the recovery copy of the leaderboard, not the read path: the ranking
//! index answers queries, this table survives cache loss.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::QueryBuilder;
use std::time::Duration;

use super::{DurableStore, StoreError};
use crate::models::User;

/// Postgres-backed [`DurableStore`].
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a connection pool for the given DSN. `max_connections` should
    /// cover the worker pool width plus a buffer for foreground queries.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Closes the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DurableStore for PostgresStore {
    async fn upsert(&self, username: &str, rating: i32) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (username, rating) VALUES ($1, $2) \
             ON CONFLICT (username) DO UPDATE \
             SET rating = EXCLUDED.rating, updated_at = now()",
        )
        .bind(username)
        .bind(rating)
        .execute(&self.pool)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get(&self, username: &str) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, rating, created_at, updated_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?;
        user.ok_or(StoreError::NotFound)
    }

    async fn all(&self) -> Result<Vec<User>, StoreError> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, rating, created_at, updated_at FROM users \
             ORDER BY rating DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)
    }

    async fn bulk_insert(&self, users: &[User], batch_size: usize) -> Result<(), StoreError> {
        let batch_size = batch_size.max(1);
        for chunk in users.chunks(batch_size) {
            // One multi-row statement per chunk; atomicity is per batch.
            let mut builder = QueryBuilder::new("INSERT INTO users (username, rating) ");
            builder.push_values(chunk, |mut row, user| {
                row.push_bind(&user.username).push_bind(user.rating);
            });
            builder.build().execute(&self.pool).await.map_err(query_err)?;
        }
        Ok(())
    }

    async fn count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(query_err)
    }

    async fn delete(&self, username: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (\
                id BIGSERIAL PRIMARY KEY, \
                username TEXT NOT NULL UNIQUE, \
                rating INTEGER NOT NULL, \
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\
             )",
        )
        .execute(&self.pool)
        .await
        .map_err(query_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_rating ON users (rating DESC)")
            .execute(&self.pool)
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

fn query_err(err: sqlx::Error) -> StoreError {
    StoreError::Query(err.to_string())
}
