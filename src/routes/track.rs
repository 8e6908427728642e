//! Public endpoints called by the viewing front end. Addressed only by the
//! distribution token; unknown and revoked links look the same from here.

use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::tracking::engagement::{self, ProgressInput};
use crate::tracking::registry::{self, Availability};

#[derive(Deserialize)]
pub struct OpenRequest {
    pub token: String,
    pub viewer_email: String,
    pub session_id: Option<String>,
}

#[derive(Serialize)]
pub struct OpenResponse {
    pub viewable: bool,
    pub access_url: String,
    pub expires_in: u64,
    pub document_title: String,
}

#[derive(Deserialize)]
pub struct ProgressRequest {
    pub token: String,
    pub viewer_email: String,
    pub read_percentage: f64,
    pub page_reached: i64,
    pub elapsed_seconds: f64,
}

#[derive(Serialize)]
pub struct ProgressResponse {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct CheckResponse {
    pub status: Availability,
}

pub async fn open(
    State(state): State<AppState>,
    Json(payload): Json<OpenRequest>,
) -> AppResult<Json<OpenResponse>> {
    let sessions = state.sessions.clone();
    let tz = state.config.reporting_timezone;
    let now = Utc::now().naive_utc();

    let outcome = db::run_blocking(&state.pool, move |conn| {
        engagement::record_open(
            conn,
            sessions.as_ref(),
            tz,
            &payload.token,
            &payload.viewer_email,
            payload.session_id.as_deref(),
            now,
        )
    })
    .await
    .map_err(AppError::for_viewer)?;

    let expires_in = state.config.access_url_expiry_seconds;
    let access_url = state
        .storage
        .presign_get_object(
            &outcome.document.storage_key,
            Duration::from_secs(expires_in),
        )
        .await
        .map_err(|err| {
            warn!(
                distribution_id = %outcome.distribution.id,
                error = %err,
                "failed to issue document access url"
            );
            AppError::from(err)
        })?;

    Ok(Json(OpenResponse {
        viewable: true,
        access_url,
        expires_in,
        document_title: outcome.document.title,
    }))
}

pub async fn progress(
    State(state): State<AppState>,
    Json(payload): Json<ProgressRequest>,
) -> AppResult<Json<ProgressResponse>> {
    let now = Utc::now().naive_utc();
    let input = ProgressInput {
        read_percentage: payload.read_percentage,
        page_reached: payload.page_reached,
        elapsed_seconds: payload.elapsed_seconds,
    };

    db::run_blocking(&state.pool, move |conn| {
        engagement::record_progress(conn, &payload.token, &payload.viewer_email, input, now)
    })
    .await
    .map_err(AppError::for_viewer)?;

    Ok(Json(ProgressResponse { ok: true }))
}

pub async fn check(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<CheckResponse>> {
    let status = db::run_blocking(&state.pool, move |conn| registry::check(conn, &token)).await?;
    Ok(Json(CheckResponse { status }))
}
