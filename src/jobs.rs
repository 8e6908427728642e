use chrono::{Duration, NaiveDateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::models::{Job, NewJob};
use crate::schema::jobs;

pub const STATUS_QUEUED: &str = "queued";
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_SUCCEEDED: &str = "succeeded";
pub const STATUS_FAILED: &str = "failed";

pub const JOB_NOTIFY_FIRST_OPEN: &str = "notify-first-open";

/// Attempts after which a retryable job is parked as failed.
pub const MAX_ATTEMPTS: i32 = 5;

/// How long a reserved job may stay in `processing` before another worker
/// assumes its holder died and takes it over.
pub const PROCESSING_LEASE_MINUTES: i64 = 5;

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// How a reserved job left the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Succeeded,
    RetryAt {
        run_after: NaiveDateTime,
        error: String,
    },
    Failed {
        error: String,
    },
}

impl Settlement {
    /// Turns a retry into a terminal failure once the attempt budget is spent.
    pub fn bounded(self, attempts: i32) -> Self {
        match self {
            Settlement::RetryAt { error, .. } if attempts >= MAX_ATTEMPTS => Settlement::Failed {
                error: format!("gave up after {attempts} attempts: {error}"),
            },
            other => other,
        }
    }
}

/// Inserts a queued job. Callers pass their own connection so the job can
/// share a transaction with the write that caused it.
pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    let new_job = NewJob {
        id: Uuid::new_v4(),
        job_type: job_type.to_string(),
        payload,
        status: STATUS_QUEUED.to_string(),
        run_after: run_after.unwrap_or_else(|| Utc::now().naive_utc()),
    };

    let job = diesel::insert_into(jobs::table)
        .values(&new_job)
        .returning(Job::as_returning())
        .get_result(conn)?;
    Ok(job)
}

/// Claims the oldest runnable job of one of `job_types`. Rows held by other
/// workers are skipped rather than waited on. A `processing` row whose lease
/// ran out is runnable again; if it already used its last attempt it is
/// failed instead.
pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();
    let stale_before = now - Duration::minutes(PROCESSING_LEASE_MINUTES);

    conn.transaction(|conn| {
        let abandoned = diesel::update(
            jobs::table
                .filter(jobs::status.eq(STATUS_PROCESSING))
                .filter(jobs::updated_at.lt(stale_before))
                .filter(jobs::attempts.ge(MAX_ATTEMPTS))
                .filter(jobs::job_type.eq_any(job_types)),
        )
        .set((
            jobs::status.eq(STATUS_FAILED),
            jobs::last_error.eq(Some("worker lease expired on the final attempt")),
            jobs::updated_at.eq(now),
        ))
        .execute(conn)?;
        if abandoned > 0 {
            warn!(jobs = abandoned, "failed jobs whose lease expired on the final attempt");
        }

        let candidate = jobs::table
            .filter(
                jobs::status
                    .eq(STATUS_QUEUED)
                    .and(jobs::run_after.le(now))
                    .or(jobs::status
                        .eq(STATUS_PROCESSING)
                        .and(jobs::updated_at.lt(stale_before))),
            )
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .select((jobs::id, jobs::status))
            .for_update()
            .skip_locked()
            .first::<(Uuid, String)>(conn)
            .optional()?;

        let Some((job_id, previous_status)) = candidate else {
            return Ok(None);
        };
        if previous_status == STATUS_PROCESSING {
            warn!(%job_id, "reclaiming job whose worker lease expired");
        }

        let job = diesel::update(jobs::table.find(job_id))
            .set((
                jobs::status.eq(STATUS_PROCESSING),
                jobs::attempts.eq(jobs::attempts + 1),
                jobs::updated_at.eq(now),
            ))
            .returning(Job::as_returning())
            .get_result(conn)?;
        Ok(Some(job))
    })
}

pub fn settle_job(
    conn: &mut PgConnection,
    job_id: Uuid,
    settlement: &Settlement,
) -> JobQueueResult<()> {
    let now = Utc::now().naive_utc();
    let target = jobs::table
        .find(job_id)
        .filter(jobs::status.eq(STATUS_PROCESSING));

    match settlement {
        Settlement::Succeeded => diesel::update(target)
            .set((
                jobs::status.eq(STATUS_SUCCEEDED),
                jobs::last_error.eq::<Option<String>>(None),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
        Settlement::RetryAt { run_after, error } => diesel::update(target)
            .set((
                jobs::status.eq(STATUS_QUEUED),
                jobs::run_after.eq(*run_after),
                jobs::last_error.eq(Some(error.as_str())),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
        Settlement::Failed { error } => diesel::update(target)
            .set((
                jobs::status.eq(STATUS_FAILED),
                jobs::last_error.eq(Some(error.as_str())),
                jobs::updated_at.eq(now),
            ))
            .execute(conn)?,
    };
    Ok(())
}

/// Exponential backoff starting at 30 seconds, capped at one hour.
pub fn backoff_for(attempts: i32) -> Duration {
    let exponent = attempts.clamp(1, 8) as u32 - 1;
    Duration::seconds((30i64 << exponent).min(3600))
}
