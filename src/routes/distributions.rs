use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::StaffContext;
use crate::db;
use crate::error::AppResult;
use crate::models::{Distribution, OpenEvent};
use crate::state::AppState;
use crate::tracking::engagement;
use crate::tracking::intent::{self, IntentTier};
use crate::tracking::registry::{self, Recipient, RevocationReason};
use crate::tracking::TrackingResult;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub document_id: Uuid,
    #[serde(default)]
    pub recipient: Recipient,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct BulkRegisterRequest {
    pub document_id: Uuid,
    pub recipients: Vec<Recipient>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct RegisteredDistribution {
    pub token: String,
    pub distribution_id: Uuid,
    pub share_path: String,
}

impl From<Distribution> for RegisteredDistribution {
    fn from(distribution: Distribution) -> Self {
        Self {
            share_path: registry::share_path(&distribution.token),
            token: distribution.token,
            distribution_id: distribution.id,
        }
    }
}

#[derive(Serialize)]
pub struct BulkRegisterResponse {
    pub tokens: Vec<RegisteredDistribution>,
}

#[derive(Serialize)]
pub struct ViewerSummary {
    pub viewer_email: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub max_read_percentage: i32,
    pub max_page_reached: i32,
    pub max_elapsed_seconds: i32,
}

impl From<OpenEvent> for ViewerSummary {
    fn from(event: OpenEvent) -> Self {
        Self {
            viewer_email: event.viewer_email,
            first_seen_at: event.first_seen_at.and_utc(),
            last_seen_at: event.last_seen_at.and_utc(),
            max_read_percentage: event.max_read_percentage,
            max_page_reached: event.max_page_reached,
            max_elapsed_seconds: event.max_elapsed_seconds,
        }
    }
}

#[derive(Serialize)]
pub struct DistributionDetail {
    pub id: Uuid,
    pub token: String,
    pub share_path: String,
    pub document_id: Uuid,
    pub recipient_company: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_url: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub first_open_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub intent_tier: IntentTier,
    pub hours_to_open: Option<f64>,
    pub viewers: Vec<ViewerSummary>,
}

impl DistributionDetail {
    fn build(distribution: Distribution, viewers: Vec<OpenEvent>) -> Self {
        let score = intent::assess(distribution.sent_at, distribution.first_open_at);
        Self {
            id: distribution.id,
            share_path: registry::share_path(&distribution.token),
            token: distribution.token,
            document_id: distribution.document_id,
            recipient_company: distribution.recipient_company,
            recipient_email: distribution.recipient_email,
            recipient_url: distribution.recipient_url,
            sent_at: distribution.sent_at.and_utc(),
            first_open_at: distribution.first_open_at.map(|at| at.and_utc()),
            revoked: distribution.revoked,
            revoked_at: distribution.revoked_at.map(|at| at.and_utc()),
            revoked_reason: distribution.revoked_reason,
            intent_tier: score.tier,
            hours_to_open: score.hours_to_open,
            viewers: viewers.into_iter().map(ViewerSummary::from).collect(),
        }
    }
}

pub async fn register(
    State(state): State<AppState>,
    staff: StaffContext,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisteredDistribution>)> {
    let tz = state.config.reporting_timezone;
    let now = Utc::now().naive_utc();

    let distribution = db::run_blocking(&state.pool, move |conn| {
        registry::register(
            conn,
            tz,
            staff.tenant_id,
            payload.document_id,
            payload.recipient,
            payload.sent_at.map(|at| at.naive_utc()),
            now,
        )
    })
    .await?;

    Ok((StatusCode::CREATED, Json(distribution.into())))
}

pub async fn register_bulk(
    State(state): State<AppState>,
    staff: StaffContext,
    Json(payload): Json<BulkRegisterRequest>,
) -> AppResult<(StatusCode, Json<BulkRegisterResponse>)> {
    let tz = state.config.reporting_timezone;
    let now = Utc::now().naive_utc();

    let created = db::run_blocking(&state.pool, move |conn| {
        registry::register_bulk(
            conn,
            tz,
            staff.tenant_id,
            payload.document_id,
            payload.recipients,
            payload.sent_at.map(|at| at.naive_utc()),
            now,
        )
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(BulkRegisterResponse {
            tokens: created.into_iter().map(RegisteredDistribution::from).collect(),
        }),
    ))
}

pub async fn get_distribution(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(token): Path<String>,
) -> AppResult<Json<DistributionDetail>> {
    let detail = db::run_blocking(&state.pool, move |conn| -> TrackingResult<_> {
        let distribution = registry::find_for_tenant(conn, staff.tenant_id, &token)?;
        let viewers = engagement::viewers_of(conn, distribution.id)?;
        Ok(DistributionDetail::build(distribution, viewers))
    })
    .await?;

    Ok(Json(detail))
}

pub async fn revoke_distribution(
    State(state): State<AppState>,
    staff: StaffContext,
    Path(token): Path<String>,
) -> AppResult<Json<DistributionDetail>> {
    let now = Utc::now().naive_utc();

    let detail = db::run_blocking(&state.pool, move |conn| -> TrackingResult<_> {
        let distribution = registry::revoke_token(
            conn,
            staff.tenant_id,
            &token,
            RevocationReason::Manual,
            now,
        )?;
        let viewers = engagement::viewers_of(conn, distribution.id)?;
        Ok(DistributionDetail::build(distribution, viewers))
    })
    .await?;

    Ok(Json(detail))
}
