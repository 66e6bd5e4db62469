//! Domain and wire types shared by the engine and the HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowest rating the system will store.
pub const MIN_RATING: i32 = 100;
/// Highest rating the system will store.
pub const MAX_RATING: i32 = 5000;

/// Shortest username accepted by the API.
pub const MIN_USERNAME_LEN: usize = 3;
/// Longest username accepted by the API.
pub const MAX_USERNAME_LEN: usize = 50;

/// A user row in the durable store. `username` is the natural key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub rating: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A row that has not been persisted yet; the store assigns `id` and the
    /// timestamps on insert.
    pub fn new(username: impl Into<String>, rating: i32) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            username: username.into(),
            rating,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request body for `POST /api/v1/scores`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreRequest {
    pub username: String,
    pub rating: i32,
}

/// One projected row of the leaderboard. Ranks follow standard competition
/// ("1224") numbering: tied ratings share a rank and the next distinct rating
/// jumps by the size of the tie group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u64,
    pub username: String,
    pub rating: i32,
}

/// Paginated leaderboard payload.
#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardResponse {
    pub data: Vec<LeaderboardEntry>,
    pub offset: i64,
    pub limit: i64,
    pub total: u64,
}

/// Payload for `GET /api/v1/search/{username}`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub global_rank: u64,
    pub username: String,
    pub rating: i32,
}

/// Error body returned by every HTTP route.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
