use std::time::Duration;

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use tracing::{info, warn};

use crate::auth::StaffContext;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::tracking::retention::{self, CleanupReport, RetentionPolicy};
use crate::tracking::TrackingResult;

/// Manual trigger for the retention sweep. The sweep touches every tenant's
/// rows, so the caller's tenant is only recorded for the audit log.
pub async fn run_cleanup(
    State(state): State<AppState>,
    staff: StaffContext,
) -> AppResult<Json<CleanupReport>> {
    info!(user_id = %staff.user_id, tenant_id = %staff.tenant_id, "cleanup requested");

    let policy = RetentionPolicy::from_config(&state.config);
    let tz = state.config.reporting_timezone;
    let limit = Duration::from_secs(state.config.cleanup_timeout_minutes.max(1) * 60);
    let now = Utc::now().naive_utc();

    let sweep = db::run_blocking(&state.pool, move |conn| -> TrackingResult<_> {
        Ok(retention::run_cleanup(conn, &policy, tz, now))
    });

    match tokio::time::timeout(limit, sweep).await {
        Ok(report) => Ok(Json(report?)),
        Err(_) => {
            warn!(timeout_secs = limit.as_secs(), "cleanup timed out; remaining rows wait for the next run");
            Err(AppError::new(
                StatusCode::GATEWAY_TIMEOUT,
                "cleanup timed out",
            ))
        }
    }
}
