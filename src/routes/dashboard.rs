use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use diesel::pg::PgConnection;
use serde::Serialize;

use crate::auth::StaffContext;
use crate::db;
use crate::error::AppResult;
use crate::state::AppState;
use crate::tracking::dashboard::{
    self, CompanyEngagement, DashboardFilter, DashboardScope, IntentRow, LeaderboardEntry,
    Summary, TimelinePoint, WeekdayActivity,
};
use crate::tracking::TrackingResult;

async fn read<T, F>(
    state: &AppState,
    staff: StaffContext,
    filter: DashboardFilter,
    query: F,
) -> AppResult<Json<T>>
where
    T: Serialize + Send + 'static,
    F: FnOnce(&mut PgConnection, &DashboardScope) -> TrackingResult<T> + Send + 'static,
{
    let scope = DashboardScope::new(
        staff.tenant_id,
        filter,
        state.config.reporting_timezone,
        Utc::now().naive_utc(),
    );
    let result = db::run_blocking(&state.pool, move |conn| query(conn, &scope)).await?;
    Ok(Json(result))
}

pub async fn summary(
    State(state): State<AppState>,
    staff: StaffContext,
    Query(filter): Query<DashboardFilter>,
) -> AppResult<Json<Summary>> {
    read(&state, staff, filter, dashboard::summary).await
}

pub async fn leaderboard(
    State(state): State<AppState>,
    staff: StaffContext,
    Query(filter): Query<DashboardFilter>,
) -> AppResult<Json<Vec<LeaderboardEntry>>> {
    read(&state, staff, filter, dashboard::leaderboard).await
}

pub async fn timeline(
    State(state): State<AppState>,
    staff: StaffContext,
    Query(filter): Query<DashboardFilter>,
) -> AppResult<Json<Vec<TimelinePoint>>> {
    read(&state, staff, filter, dashboard::timeline).await
}

pub async fn weekday_peaks(
    State(state): State<AppState>,
    staff: StaffContext,
    Query(filter): Query<DashboardFilter>,
) -> AppResult<Json<Vec<WeekdayActivity>>> {
    read(&state, staff, filter, dashboard::weekday_peaks).await
}

pub async fn intent_scores(
    State(state): State<AppState>,
    staff: StaffContext,
    Query(filter): Query<DashboardFilter>,
) -> AppResult<Json<Vec<IntentRow>>> {
    read(&state, staff, filter, dashboard::intent_scores).await
}

pub async fn companies(
    State(state): State<AppState>,
    staff: StaffContext,
    Query(filter): Query<DashboardFilter>,
) -> AppResult<Json<Vec<CompanyEngagement>>> {
    read(&state, staff, filter, dashboard::companies).await
}
