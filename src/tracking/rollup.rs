//! Per-document, per-day sent/opened counters.
//!
//! Counters are only ever moved by `INSERT ... ON CONFLICT DO UPDATE SET n = n + delta`
//! so concurrent bulk sends and viewer pings never lose increments.

use chrono::{NaiveDate, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::upsert::excluded;
use uuid::Uuid;

use super::{TrackingError, TrackingResult};
use crate::models::DailyMetric;
use crate::schema::daily_metrics;

/// Calendar day of a UTC instant in the reporting timezone.
pub fn reporting_day(at: NaiveDateTime, tz: Tz) -> NaiveDate {
    tz.from_utc_datetime(&at).date_naive()
}

pub fn increment_sent(
    conn: &mut PgConnection,
    document_id: Uuid,
    day: NaiveDate,
    delta: i64,
) -> TrackingResult<()> {
    increment(conn, document_id, day, delta, 0)
}

pub fn increment_opened(
    conn: &mut PgConnection,
    document_id: Uuid,
    day: NaiveDate,
    delta: i64,
) -> TrackingResult<()> {
    increment(conn, document_id, day, 0, delta)
}

fn increment(
    conn: &mut PgConnection,
    document_id: Uuid,
    day: NaiveDate,
    sent_delta: i64,
    opened_delta: i64,
) -> TrackingResult<()> {
    if sent_delta < 0 || opened_delta < 0 {
        return Err(TrackingError::validation(
            "daily counters can only be incremented",
        ));
    }
    if sent_delta == 0 && opened_delta == 0 {
        return Ok(());
    }

    let row = DailyMetric {
        document_id,
        day,
        sent_count: sent_delta,
        opened_count: opened_delta,
    };

    diesel::insert_into(daily_metrics::table)
        .values(&row)
        .on_conflict((daily_metrics::document_id, daily_metrics::day))
        .do_update()
        .set((
            daily_metrics::sent_count
                .eq(daily_metrics::sent_count + excluded(daily_metrics::sent_count)),
            daily_metrics::opened_count
                .eq(daily_metrics::opened_count + excluded(daily_metrics::opened_count)),
        ))
        .execute(conn)?;

    Ok(())
}

pub fn load_metric(
    conn: &mut PgConnection,
    document_id: Uuid,
    day: NaiveDate,
) -> TrackingResult<Option<DailyMetric>> {
    let metric = daily_metrics::table
        .find((document_id, day))
        .select(DailyMetric::as_select())
        .first(conn)
        .optional()?;
    Ok(metric)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn late_utc_evening_rolls_into_next_business_day() {
        let day = reporting_day(utc(2025, 1, 14, 23, 30), chrono_tz::Europe::Berlin);
        assert_eq!(day, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
    }

    #[test]
    fn western_zone_stays_on_previous_day() {
        let day = reporting_day(utc(2025, 1, 15, 3, 0), chrono_tz::America::New_York);
        assert_eq!(day, NaiveDate::from_ymd_opt(2025, 1, 14).unwrap());
    }

    #[test]
    fn daylight_saving_shifts_the_boundary() {
        // CEST is UTC+2, so 22:30 UTC is already past midnight in Berlin.
        let day = reporting_day(utc(2025, 7, 1, 22, 30), chrono_tz::Europe::Berlin);
        assert_eq!(day, NaiveDate::from_ymd_opt(2025, 7, 2).unwrap());
        let winter = reporting_day(utc(2025, 1, 1, 22, 30), chrono_tz::Europe::Berlin);
        assert_eq!(winter, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    }
}
