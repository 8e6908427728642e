use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::StaffContext;
use crate::db;
use crate::error::AppResult;
use crate::state::AppState;
use crate::tracking::registry::{self, RevocationReason};

#[derive(Deserialize, Default)]
pub struct RevokeDocumentRequest {
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct RevokedResponse {
    pub document_id: Uuid,
    pub revoked: usize,
}

pub async fn revoke_document(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(document_id): Path<Uuid>,
    payload: Option<Json<RevokeDocumentRequest>>,
) -> AppResult<Json<RevokedResponse>> {
    let Json(payload) = payload.unwrap_or_default();
    let reason = match payload.reason.as_deref() {
        Some(raw) => raw.parse::<RevocationReason>()?,
        None => RevocationReason::Manual,
    };
    let now = Utc::now().naive_utc();

    let revoked = db::run_blocking(&state.pool, move |conn| {
        registry::revoke_document(conn, staff.tenant_id, document_id, reason, now)
    })
    .await?;

    Ok(Json(RevokedResponse {
        document_id,
        revoked,
    }))
}

pub async fn delete_document(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(document_id): Path<Uuid>,
) -> AppResult<Json<RevokedResponse>> {
    let now = Utc::now().naive_utc();

    let revoked = db::run_blocking(&state.pool, move |conn| {
        registry::delete_document(conn, staff.tenant_id, document_id, now)
    })
    .await?;

    Ok(Json(RevokedResponse {
        document_id,
        revoked,
    }))
}
