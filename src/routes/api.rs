use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{SecondsFormat, Utc};
use serde_json::json;

use super::{AppError, AppState};

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let database = state.db.ping().await;
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database { "healthy" } else { "degraded" },
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "database": if database { "connected" } else { "disconnected" },
            "automation": state.poster.settings().enabled,
        })),
    )
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let now = Utc::now();
    let stats = state.db.stats(now).await?;
    let last_update = state
        .db
        .last_post_at()
        .await?
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true));
    let fetch = state.fetcher.status().await;

    Ok(Json(json!({
        "total_posts": stats.published_posts,
        "today_posts": stats.today_posts,
        "total_views": stats.total_views,
        "last_update": last_update,
        "refreshing": fetch.refreshing,
        "status": "active",
    })))
}
