//! Open and progress recording for one (distribution, viewer) pair.
//!
//! Progress fields are high-water-marks: every write goes through
//! `GREATEST(stored, incoming)` inside the upsert, so racing pings from several
//! tabs can only raise them. Session novelty on open is decided while holding the
//! row lock, which keeps the opened counter at one increment per session.

use chrono::NaiveDateTime;
use chrono_tz::Tz;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Timestamptz};
use diesel::upsert::excluded;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::registry::{self, normalize_viewer_email};
use super::rollup::{increment_opened, reporting_day};
use super::session::{normalize_session_id, SessionMarker, SessionResolver};
use super::{TrackingError, TrackingResult};
use crate::jobs::{enqueue_job, JOB_NOTIFY_FIRST_OPEN};
use crate::models::{Distribution, Document, NewOpenEvent, OpenEvent};
use crate::schema::{distributions, open_events};

pub const MAX_READ_PERCENTAGE: i32 = 100;
pub const MAX_PAGE_REACHED: i32 = 100_000;
/// Elapsed time above a day is treated as a stuck client timer.
pub const MAX_ELAPSED_SECONDS: i32 = 86_400;

diesel::define_sql_function! {
    #[sql_name = "GREATEST"]
    fn greatest_int(a: Integer, b: Integer) -> Integer;
}

diesel::define_sql_function! {
    #[sql_name = "GREATEST"]
    fn greatest_timestamptz(a: Timestamptz, b: Timestamptz) -> Timestamptz;
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProgressInput {
    pub read_percentage: f64,
    pub page_reached: i64,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub read_percentage: i32,
    pub page_reached: i32,
    pub elapsed_seconds: i32,
}

impl ProgressSnapshot {
    pub const FLOOR: ProgressSnapshot = ProgressSnapshot {
        read_percentage: 0,
        page_reached: 1,
        elapsed_seconds: 0,
    };

    pub fn clamped(input: ProgressInput) -> TrackingResult<Self> {
        if !input.read_percentage.is_finite() || !input.elapsed_seconds.is_finite() {
            return Err(TrackingError::validation("progress values must be finite"));
        }

        Ok(Self {
            read_percentage: input
                .read_percentage
                .round()
                .clamp(0.0, f64::from(MAX_READ_PERCENTAGE)) as i32,
            page_reached: input.page_reached.clamp(1, i64::from(MAX_PAGE_REACHED)) as i32,
            elapsed_seconds: input
                .elapsed_seconds
                .round()
                .clamp(0.0, f64::from(MAX_ELAPSED_SECONDS)) as i32,
        })
    }

    /// Field-wise maximum; the same rule the upsert applies in the database.
    pub fn merge(self, other: Self) -> Self {
        Self {
            read_percentage: self.read_percentage.max(other.read_percentage),
            page_reached: self.page_reached.max(other.page_reached),
            elapsed_seconds: self.elapsed_seconds.max(other.elapsed_seconds),
        }
    }
}

impl From<&OpenEvent> for ProgressSnapshot {
    fn from(event: &OpenEvent) -> Self {
        Self {
            read_percentage: event.max_read_percentage,
            page_reached: event.max_page_reached,
            elapsed_seconds: event.max_elapsed_seconds,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenOutcome {
    pub distribution: Distribution,
    pub document: Document,
    pub event: OpenEvent,
    pub new_session: bool,
    pub first_open: bool,
}

pub fn record_open(
    conn: &mut PgConnection,
    sessions: &dyn SessionResolver,
    tz: Tz,
    token: &str,
    viewer_email: &str,
    session_id: Option<&str>,
    now: NaiveDateTime,
) -> TrackingResult<OpenOutcome> {
    let viewer = normalize_viewer_email(viewer_email)?;
    let session_id = normalize_session_id(session_id)?;

    conn.transaction(|conn| {
        let (distribution, document) = registry::resolve(conn, token)?;

        let seeded = NewOpenEvent {
            id: Uuid::new_v4(),
            distribution_id: distribution.id,
            viewer_email: &viewer,
            first_seen_at: now,
            last_seen_at: now,
            max_read_percentage: ProgressSnapshot::FLOOR.read_percentage,
            max_page_reached: ProgressSnapshot::FLOOR.page_reached,
            max_elapsed_seconds: ProgressSnapshot::FLOOR.elapsed_seconds,
            last_session_id: session_id.as_deref(),
            last_opened_at: Some(now),
        };

        let created = diesel::insert_into(open_events::table)
            .values(&seeded)
            .on_conflict((open_events::distribution_id, open_events::viewer_email))
            .do_nothing()
            .returning(OpenEvent::as_returning())
            .get_result(conn)
            .optional()?;

        let (event, new_session) = match created {
            Some(event) => (event, true),
            None => {
                // Concurrent pings for the same pair queue up on this lock, so
                // each one sees the session id written by the previous one.
                let prior: OpenEvent = open_events::table
                    .filter(open_events::distribution_id.eq(distribution.id))
                    .filter(open_events::viewer_email.eq(&viewer))
                    .select(OpenEvent::as_select())
                    .for_update()
                    .first(conn)?;

                // A row only progress pings have touched has no session to continue.
                let marker = prior.last_opened_at.map(|_| SessionMarker {
                    last_session_id: prior.last_session_id.as_deref(),
                    last_seen_at: prior.last_seen_at,
                });
                let new_session = sessions.is_new_session(marker, session_id.as_deref(), now);

                let event = diesel::update(open_events::table.find(prior.id))
                    .set((
                        open_events::last_seen_at
                            .eq(greatest_timestamptz(open_events::last_seen_at, now)),
                        open_events::last_session_id.eq(session_id.as_deref()),
                        open_events::last_opened_at.eq(Some(now)),
                    ))
                    .returning(OpenEvent::as_returning())
                    .get_result(conn)?;
                (event, new_session)
            }
        };

        let stamped = diesel::update(
            distributions::table
                .filter(distributions::id.eq(distribution.id))
                .filter(distributions::first_open_at.is_null()),
        )
        .set(distributions::first_open_at.eq(Some(now)))
        .returning(Distribution::as_returning())
        .get_result(conn)
        .optional()?;
        let first_open = stamped.is_some();
        let distribution = stamped.unwrap_or(distribution);

        if new_session {
            increment_opened(conn, distribution.document_id, reporting_day(now, tz), 1)?;
        }

        if first_open {
            enqueue_job(
                conn,
                JOB_NOTIFY_FIRST_OPEN,
                json!({
                    "distribution_id": distribution.id,
                    "document_id": distribution.document_id,
                    "tenant_id": distribution.tenant_id,
                    "viewer_email": viewer,
                    "opened_at": now.and_utc(),
                }),
                None,
            )?;
            info!(
                distribution_id = %distribution.id,
                document_id = %distribution.document_id,
                "first open recorded"
            );
        }

        debug!(
            distribution_id = %distribution.id,
            new_session,
            "open recorded"
        );

        Ok(OpenOutcome {
            distribution,
            document,
            event,
            new_session,
            first_open,
        })
    })
}

/// Merges a progress ping into the pair's high-water-marks with one upsert.
/// Never touches the opened counter; a ping without a prior open still creates
/// the engagement row so progress is not dropped.
pub fn record_progress(
    conn: &mut PgConnection,
    token: &str,
    viewer_email: &str,
    input: ProgressInput,
    now: NaiveDateTime,
) -> TrackingResult<OpenEvent> {
    let viewer = normalize_viewer_email(viewer_email)?;
    let snapshot = ProgressSnapshot::clamped(input)?;
    let (distribution, _) = registry::resolve(conn, token)?;

    let row = NewOpenEvent {
        id: Uuid::new_v4(),
        distribution_id: distribution.id,
        viewer_email: &viewer,
        first_seen_at: now,
        last_seen_at: now,
        max_read_percentage: snapshot.read_percentage,
        max_page_reached: snapshot.page_reached,
        max_elapsed_seconds: snapshot.elapsed_seconds,
        last_session_id: None,
        last_opened_at: None,
    };

    let event = diesel::insert_into(open_events::table)
        .values(&row)
        .on_conflict((open_events::distribution_id, open_events::viewer_email))
        .do_update()
        .set((
            open_events::max_read_percentage.eq(greatest_int(
                open_events::max_read_percentage,
                excluded(open_events::max_read_percentage),
            )),
            open_events::max_page_reached.eq(greatest_int(
                open_events::max_page_reached,
                excluded(open_events::max_page_reached),
            )),
            open_events::max_elapsed_seconds.eq(greatest_int(
                open_events::max_elapsed_seconds,
                excluded(open_events::max_elapsed_seconds),
            )),
            open_events::last_seen_at.eq(greatest_timestamptz(
                open_events::last_seen_at,
                excluded(open_events::last_seen_at),
            )),
        ))
        .returning(OpenEvent::as_returning())
        .get_result(conn)?;

    Ok(event)
}

/// Viewers of one distribution, most recently active first.
pub fn viewers_of(conn: &mut PgConnection, distribution_id: Uuid) -> TrackingResult<Vec<OpenEvent>> {
    let events = open_events::table
        .filter(open_events::distribution_id.eq(distribution_id))
        .order(open_events::last_seen_at.desc())
        .select(OpenEvent::as_select())
        .load(conn)?;
    Ok(events)
}
