//! HTTP handlers for the leaderboard API.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use lib_common::core::service::ServiceError;
use lib_common::models::{
    ErrorResponse, ScoreRequest, MAX_RATING, MAX_USERNAME_LEN, MIN_RATING, MIN_USERNAME_LEN,
};

use super::state::AppState;

// Leaderboard reads must never be served from an intermediary cache.
const NO_CACHE: &str = "no-cache, no-store, must-revalidate, private, max-age=0";

/// Handler-level error, mapped onto the API status taxonomy.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    Service(ServiceError),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        AppError::Service(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: "Validation failed".to_string(),
                    message: Some(message),
                },
            ),
            AppError::Service(ServiceError::UserNotFound) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: "User not found".to_string(),
                    message: None,
                },
            ),
            AppError::Service(err) => {
                error!(%err, "request failed on a dependency");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: "Request failed".to_string(),
                        message: Some(err.to_string()),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

/// POST /api/v1/scores
pub async fn update_score(
    State(state): State<AppState>,
    Json(req): Json<ScoreRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_username(&req.username)?;
    if !(MIN_RATING..=MAX_RATING).contains(&req.rating) {
        return Err(AppError::Validation(format!(
            "rating must be between {MIN_RATING} and {MAX_RATING}"
        )));
    }

    state.service.update_score(&req.username, req.rating).await?;

    Ok(Json(json!({
        "message": "Score updated successfully",
        "username": req.username,
        "rating": req.rating,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    #[serde(default)]
    offset: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

/// GET /api/v1/leaderboard
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardParams>,
) -> Result<impl IntoResponse, AppError> {
    let board = state
        .service
        .get_leaderboard(params.offset.unwrap_or(0), params.limit.unwrap_or(50))
        .await?;

    Ok((
        [
            (header::CACHE_CONTROL, NO_CACHE),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        Json(board),
    ))
}

/// GET /api/v1/search/{username}
pub async fn search_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    validate_username(&username)?;
    let found = state.service.search_user(&username).await?;
    Ok(Json(found))
}

/// GET /api/v1/health
pub async fn health_check(State(state): State<AppState>) -> Response {
    match state.service.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "message": "All systems operational",
            })),
        )
            .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Health check failed".to_string(),
                message: Some(err.to_string()),
            }),
        )
            .into_response(),
    }
}

/// GET /
pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "message": "Leaderboard System API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /api/v1/scores",
            "GET /api/v1/leaderboard",
            "GET /api/v1/search/{username}",
            "GET /api/v1/health",
            "WS /ws",
        ],
        "websocket_clients": state.hub.client_count(),
    }))
}

fn validate_username(username: &str) -> Result<(), AppError> {
    let len = username.chars().count();
    if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
        return Err(AppError::Validation(format!(
            "username must be between {MIN_USERNAME_LEN} and {MAX_USERNAME_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_length_bounds() {
        assert!(validate_username("ab").is_err());
        assert!(validate_username("abc").is_ok());
        assert!(validate_username(&"x".repeat(50)).is_ok());
        assert!(validate_username(&"x".repeat(51)).is_err());
    }
}
