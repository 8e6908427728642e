//! Scheduled retention sweep.
//!
//! Each policy walks its eligible rows in bounded batches: select a page of
//! ids, then write only those ids with the eligibility predicate repeated in
//! the write. Every batch commits on its own so no lock outlives one
//! statement, and an interrupted run simply leaves rows for the next one.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use diesel::dsl::sql;
use diesel::expression::SqlLiteral;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::Bool;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::registry::RevocationReason;
use super::rollup::reporting_day;
use super::TrackingResult;
use crate::config::AppConfig;
use crate::schema::{daily_metrics, distributions, open_events};

pub const PREVIEW_RETENTION_DAYS: i64 = 7;
pub const UNOPENED_RETENTION_DAYS: i64 = 7;
pub const ENGAGEMENT_RETENTION_DAYS: i64 = 180;
pub const DEFAULT_BATCH_SIZE: i64 = 500;
pub const DEFAULT_MAX_BATCHES: u32 = 100;

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub preview_max_age: Duration,
    pub unopened_max_age: Duration,
    pub open_event_max_age: Duration,
    pub metric_max_age: Duration,
    pub batch_size: i64,
    pub max_batches: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            preview_max_age: Duration::days(PREVIEW_RETENTION_DAYS),
            unopened_max_age: Duration::days(UNOPENED_RETENTION_DAYS),
            open_event_max_age: Duration::days(ENGAGEMENT_RETENTION_DAYS),
            metric_max_age: Duration::days(ENGAGEMENT_RETENTION_DAYS),
            batch_size: DEFAULT_BATCH_SIZE,
            max_batches: DEFAULT_MAX_BATCHES,
        }
    }
}

impl RetentionPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.cleanup_batch_size.max(1),
            max_batches: config.cleanup_max_batches.max(1),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub previews_deleted: u64,
    pub unopened_revoked: u64,
    pub open_events_deleted: u64,
    pub daily_metrics_deleted: u64,
    /// Names of policies that failed during this run.
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.previews_deleted
            + self.unopened_revoked
            + self.open_events_deleted
            + self.daily_metrics_deleted
    }
}

/// Applies every policy once. A failing policy is logged and recorded in the
/// report; the remaining policies still run.
pub fn run_cleanup(
    conn: &mut PgConnection,
    policy: &RetentionPolicy,
    tz: Tz,
    now: NaiveDateTime,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    match delete_previews(conn, policy, now) {
        Ok(rows) => report.previews_deleted = rows,
        Err(err) => record_failure(&mut report, "previews", &err),
    }
    match revoke_unopened(conn, policy, now) {
        Ok(rows) => report.unopened_revoked = rows,
        Err(err) => record_failure(&mut report, "unopened", &err),
    }
    match delete_open_events(conn, policy, now) {
        Ok(rows) => report.open_events_deleted = rows,
        Err(err) => record_failure(&mut report, "open_events", &err),
    }
    match delete_daily_metrics(conn, policy, tz, now) {
        Ok(rows) => report.daily_metrics_deleted = rows,
        Err(err) => record_failure(&mut report, "daily_metrics", &err),
    }

    info!(
        previews = report.previews_deleted,
        unopened = report.unopened_revoked,
        open_events = report.open_events_deleted,
        daily_metrics = report.daily_metrics_deleted,
        failures = report.failures.len(),
        "retention sweep finished"
    );
    report
}

fn record_failure(report: &mut CleanupReport, policy: &str, err: &super::TrackingError) {
    error!(policy, error = %err, "retention policy failed");
    report.failures.push(policy.to_string());
}

/// Runs `batch` until it selects fewer rows than a full page or the batch cap
/// is reached. `batch` returns `(selected, affected)`.
fn in_batches<F>(
    conn: &mut PgConnection,
    policy: &RetentionPolicy,
    name: &str,
    mut batch: F,
) -> TrackingResult<u64>
where
    F: FnMut(&mut PgConnection, i64) -> TrackingResult<(usize, usize)>,
{
    let mut total = 0u64;
    for round in 0..policy.max_batches {
        let (selected, affected) = batch(conn, policy.batch_size)?;
        total += affected as u64;
        debug!(policy = name, round, selected, rows = affected, "retention batch applied");
        if (selected as i64) < policy.batch_size {
            break;
        }
    }
    Ok(total)
}

fn delete_previews(
    conn: &mut PgConnection,
    policy: &RetentionPolicy,
    now: NaiveDateTime,
) -> TrackingResult<u64> {
    let cutoff = now - policy.preview_max_age;

    in_batches(conn, policy, "previews", |conn, limit| {
        let ids: Vec<Uuid> = distributions::table
            .filter(distributions::recipient_company.is_null())
            .filter(distributions::recipient_url.is_null())
            .filter(distributions::sent_at.lt(cutoff))
            .order(distributions::sent_at.asc())
            .select(distributions::id)
            .limit(limit)
            .load(conn)?;
        if ids.is_empty() {
            return Ok((0, 0));
        }

        let deleted = diesel::delete(
            distributions::table
                .filter(distributions::id.eq_any(&ids))
                .filter(distributions::recipient_company.is_null())
                .filter(distributions::recipient_url.is_null())
                .filter(distributions::sent_at.lt(cutoff)),
        )
        .execute(conn)?;
        Ok((ids.len(), deleted))
    })
}

/// Sent, never opened and addressed to a real recipient: revoked rather than
/// deleted so the sent denominator survives. Any recorded viewer exempts the
/// row even when its `first_open_at` stamp is missing.
fn revoke_unopened(
    conn: &mut PgConnection,
    policy: &RetentionPolicy,
    now: NaiveDateTime,
) -> TrackingResult<u64> {
    let cutoff = now - policy.unopened_max_age;

    in_batches(conn, policy, "unopened", |conn, limit| {
        let ids: Vec<Uuid> = distributions::table
            .filter(distributions::revoked.eq(false))
            .filter(distributions::first_open_at.is_null())
            .filter(distributions::sent_at.lt(cutoff))
            .filter(
                distributions::recipient_company
                    .is_not_null()
                    .or(distributions::recipient_url.is_not_null()),
            )
            .filter(has_no_viewers())
            .order(distributions::sent_at.asc())
            .select(distributions::id)
            .limit(limit)
            .load(conn)?;
        if ids.is_empty() {
            return Ok((0, 0));
        }

        let revoked = diesel::update(
            distributions::table
                .filter(distributions::id.eq_any(&ids))
                .filter(distributions::revoked.eq(false))
                .filter(distributions::first_open_at.is_null())
                .filter(has_no_viewers()),
        )
        .set((
            distributions::revoked.eq(true),
            distributions::revoked_at.eq(Some(now)),
            distributions::revoked_reason.eq(Some(RevocationReason::Expired.as_str())),
        ))
        .execute(conn)?;
        Ok((ids.len(), revoked))
    })
}

fn has_no_viewers() -> SqlLiteral<Bool> {
    sql::<Bool>(
        "NOT EXISTS (SELECT 1 FROM open_events WHERE open_events.distribution_id = distributions.id)",
    )
}

fn delete_open_events(
    conn: &mut PgConnection,
    policy: &RetentionPolicy,
    now: NaiveDateTime,
) -> TrackingResult<u64> {
    let cutoff = now - policy.open_event_max_age;

    in_batches(conn, policy, "open_events", |conn, limit| {
        let ids: Vec<Uuid> = open_events::table
            .filter(open_events::last_seen_at.lt(cutoff))
            .order(open_events::last_seen_at.asc())
            .select(open_events::id)
            .limit(limit)
            .load(conn)?;
        if ids.is_empty() {
            return Ok((0, 0));
        }

        let deleted = diesel::delete(
            open_events::table
                .filter(open_events::id.eq_any(&ids))
                .filter(open_events::last_seen_at.lt(cutoff)),
        )
        .execute(conn)?;
        Ok((ids.len(), deleted))
    })
}

fn delete_daily_metrics(
    conn: &mut PgConnection,
    policy: &RetentionPolicy,
    tz: Tz,
    now: NaiveDateTime,
) -> TrackingResult<u64> {
    let cutoff = metric_cutoff_day(now, policy.metric_max_age, tz);

    in_batches(conn, policy, "daily_metrics", |conn, limit| {
        let keys: Vec<(Uuid, NaiveDate)> = daily_metrics::table
            .filter(daily_metrics::day.lt(cutoff))
            .order((daily_metrics::day.asc(), daily_metrics::document_id.asc()))
            .select((daily_metrics::document_id, daily_metrics::day))
            .limit(limit)
            .load(conn)?;
        if keys.is_empty() {
            return Ok((0, 0));
        }

        let mut by_day: BTreeMap<NaiveDate, Vec<Uuid>> = BTreeMap::new();
        for (document_id, day) in &keys {
            by_day.entry(*day).or_default().push(*document_id);
        }

        let mut deleted = 0;
        for (day, documents) in by_day {
            deleted += diesel::delete(
                daily_metrics::table
                    .filter(daily_metrics::day.eq(day))
                    .filter(daily_metrics::document_id.eq_any(&documents)),
            )
            .execute(conn)?;
        }
        Ok((keys.len(), deleted))
    })
}

/// First reporting day that is still retained.
pub fn metric_cutoff_day(now: NaiveDateTime, max_age: Duration, tz: Tz) -> NaiveDate {
    reporting_day(now - max_age, tz)
}
