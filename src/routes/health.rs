use axum::{extract::State, http::StatusCode, response::Json};
use diesel::{sql_query, RunQueryDsl};
use serde_json::{json, Value};

use crate::{db, error::AppError, state::AppState};

/// Liveness plus a round trip to Postgres. The viewer endpoints are useless
/// without the database, so a failed ping reports 503.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let ping = db::run_blocking(&state.pool, |conn| {
        sql_query("SELECT 1")
            .execute(conn)
            .map_err(|err| AppError::internal(format!("health ping failed: {err}")))
    })
    .await;

    match ping {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "database": "ok" })),
        ),
        Err(_) => {
            tracing::warn!("database unavailable for health check");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "database": "unavailable" })),
            )
        }
    }
}
