//! Embedded HTTP server: liveness page, health probe and read-only game data.

use crate::database::Database;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

pub fn router(db: Arc<Database>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/leaderboard", get(leaderboard))
        .with_state(db)
}

pub async fn serve(port: u16, app: Router) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);
    axum::Server::try_bind(&addr)?
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

async fn index() -> &'static str {
    "questbot is running"
}

async fn health(State(db): State<Arc<Database>>) -> Response {
    match db.ping() {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "error" })),
            )
                .into_response()
        }
    }
}

async fn stats(State(db): State<Arc<Database>>) -> Response {
    match db.stats() {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal(e),
    }
}

#[derive(Debug, Deserialize)]
struct LeaderboardParams {
    limit: Option<i64>,
}

async fn leaderboard(
    State(db): State<Arc<Database>>,
    Query(params): Query<LeaderboardParams>,
) -> Response {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIMIT as i64)
        .clamp(1, MAX_LIMIT as i64) as usize;
    match db.leaderboard(limit) {
        Ok(players) => Json(players).into_response(),
        Err(e) => internal(e),
    }
}

fn internal(e: impl std::fmt::Display) -> Response {
    error!("Web request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}
