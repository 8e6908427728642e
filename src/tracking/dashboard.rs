//! Read-side aggregates for the dashboard. Every query is scoped by tenant in
//! its WHERE clause; bucketing happens in the reporting timezone used by the
//! daily rollups so both views agree on what "a day" is.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc, Weekday};
use chrono_tz::Tz;
use diesel::dsl::{count_star, max};
use diesel::pg::{Pg, PgConnection};
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::sql_query;
use diesel::sql_types::{BigInt, Date, Double, Integer, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::intent::{self, IntentTier};
use super::rollup::reporting_day;
use super::TrackingResult;
use crate::models::Distribution;
use crate::schema::{distributions, documents, open_events};

pub const DEFAULT_RANGE_DAYS: i64 = 30;
pub const MAX_RANGE_DAYS: i64 = 365;
const SLOT_HOURS: u32 = 2;
const AFTERNOON_STARTS_AT: u32 = 12;
const EVENING_STARTS_AT: u32 = 17;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardFilter {
    pub document_id: Option<Uuid>,
    pub company: Option<String>,
    pub range_days: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct DashboardScope {
    pub tenant_id: Uuid,
    pub document_id: Option<Uuid>,
    pub company: Option<String>,
    pub since: NaiveDateTime,
    pub now: NaiveDateTime,
    pub tz: Tz,
}

impl DashboardScope {
    pub fn new(tenant_id: Uuid, filter: DashboardFilter, tz: Tz, now: NaiveDateTime) -> Self {
        let range_days = filter
            .range_days
            .unwrap_or(DEFAULT_RANGE_DAYS)
            .clamp(1, MAX_RANGE_DAYS);
        let company = filter
            .company
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Self {
            tenant_id,
            document_id: filter.document_id,
            company,
            since: now - Duration::days(range_days),
            now,
            tz,
        }
    }

    fn first_day(&self) -> NaiveDate {
        reporting_day(self.since, self.tz)
    }

    fn last_day(&self) -> NaiveDate {
        reporting_day(self.now, self.tz)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_opens: i64,
    pub unique_viewers: i64,
    pub sent: i64,
    pub opened: i64,
    pub open_rate_percent: f64,
    pub peak_slot: Option<String>,
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
pub struct LeaderboardEntry {
    #[diesel(sql_type = SqlUuid)]
    pub document_id: Uuid,
    #[diesel(sql_type = Text)]
    pub title: String,
    #[diesel(sql_type = BigInt)]
    pub views: i64,
    #[diesel(sql_type = BigInt)]
    pub unique_viewers: i64,
    #[diesel(sql_type = Double)]
    pub avg_read_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelinePoint {
    pub day: NaiveDate,
    pub sent: i64,
    pub opened: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPart {
    Morning,
    Afternoon,
    Evening,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekdayActivity {
    pub weekday: String,
    pub morning: i64,
    pub afternoon: i64,
    pub evening: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IntentRow {
    pub distribution_id: Uuid,
    pub token: String,
    pub document_id: Uuid,
    pub document_title: String,
    pub company: Option<String>,
    pub email: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub first_open_at: Option<DateTime<Utc>>,
    pub tier: IntentTier,
    pub hours_to_open: Option<f64>,
    pub viewers: i64,
    pub max_read_percentage: i32,
    pub revoked: bool,
}

#[derive(Debug, Clone, Serialize, QueryableByName)]
pub struct CompanyEngagement {
    #[diesel(sql_type = Text)]
    pub company: String,
    #[diesel(sql_type = BigInt)]
    pub sent: i64,
    #[diesel(sql_type = BigInt)]
    pub opened: i64,
    #[diesel(sql_type = BigInt)]
    pub viewers: i64,
    #[diesel(sql_type = Double)]
    pub avg_read_percentage: f64,
}

/// `opened / sent` as a percentage clamped to [0, 100] with one decimal.
/// Session-based opened counts can exceed the number of sends.
pub fn open_rate_percent(opened: i64, sent: i64) -> f64 {
    if sent <= 0 {
        return 0.0;
    }
    let rate = (opened.max(0) as f64 / sent as f64 * 100.0).clamp(0.0, 100.0);
    (rate * 10.0).round() / 10.0
}

pub fn day_part(hour: u32) -> DayPart {
    if hour < AFTERNOON_STARTS_AT {
        DayPart::Morning
    } else if hour < EVENING_STARTS_AT {
        DayPart::Afternoon
    } else {
        DayPart::Evening
    }
}

/// Open activity counted per ISO weekday (1 = Monday) and local hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, QueryableByName)]
pub struct ActivityBucket {
    #[diesel(sql_type = Integer)]
    pub weekday: i32,
    #[diesel(sql_type = Integer)]
    pub hour: i32,
    #[diesel(sql_type = BigInt)]
    pub opens: i64,
}

/// Two-hour slot with the most activity, as `"HH:00-HH:00"`. Ties go to the earlier slot.
pub fn peak_slot(buckets: &[ActivityBucket]) -> Option<String> {
    let mut slots = [0i64; (24 / SLOT_HOURS) as usize];
    for bucket in buckets {
        let hour = bucket.hour.clamp(0, 23) as u32;
        slots[(hour / SLOT_HOURS) as usize] += bucket.opens;
    }
    if slots.iter().all(|count| *count == 0) {
        return None;
    }

    let (index, _) = slots
        .iter()
        .enumerate()
        .fold((0usize, -1i64), |best, (index, count)| {
            if *count > best.1 {
                (index, *count)
            } else {
                best
            }
        });
    let start = index as u32 * SLOT_HOURS;
    Some(format!("{:02}:00-{:02}:00", start, (start + SLOT_HOURS) % 24))
}

pub fn weekday_histogram(buckets: &[ActivityBucket]) -> Vec<WeekdayActivity> {
    let mut grid = [[0i64; 3]; 7];
    for bucket in buckets {
        let row = (bucket.weekday.clamp(1, 7) - 1) as usize;
        let column = match day_part(bucket.hour.clamp(0, 23) as u32) {
            DayPart::Morning => 0,
            DayPart::Afternoon => 1,
            DayPart::Evening => 2,
        };
        grid[row][column] += bucket.opens;
    }

    let mut weekday = Weekday::Mon;
    grid.iter()
        .map(|counts| {
            let entry = WeekdayActivity {
                weekday: weekday_name(weekday).to_string(),
                morning: counts[0],
                afternoon: counts[1],
                evening: counts[2],
            };
            weekday = weekday.succ();
            entry
        })
        .collect()
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// One point per day between `first` and `last` inclusive, zero-filled.
pub fn fill_timeline(
    counts: &BTreeMap<NaiveDate, (i64, i64)>,
    first: NaiveDate,
    last: NaiveDate,
) -> Vec<TimelinePoint> {
    first
        .iter_days()
        .take_while(|day| *day <= last)
        .map(|day| {
            let (sent, opened) = counts.get(&day).copied().unwrap_or((0, 0));
            TimelinePoint { day, sent, opened }
        })
        .collect()
}

/// Escapes LIKE wildcards so a company filter matches literally, case-insensitively.
fn like_literal(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// Engagement rows of the scope joined to their distribution and document.
// Binds: $1 tenant, $2 lower bound, $3 document filter, $4 company pattern.
const SCOPED_ENGAGEMENT: &str = "FROM open_events e \
     JOIN distributions d ON d.id = e.distribution_id \
     JOIN documents doc ON doc.id = d.document_id \
     WHERE d.tenant_id = $1 AND doc.tenant_id = $1 \
     AND e.first_seen_at >= $2 \
     AND ($3::uuid IS NULL OR d.document_id = $3) \
     AND ($4::text IS NULL OR d.recipient_company ILIKE $4)";

// Same scope over distributions, bounded by send time.
const SCOPED_DISTRIBUTIONS: &str = "FROM distributions d \
     JOIN documents doc ON doc.id = d.document_id \
     WHERE d.tenant_id = $1 AND doc.tenant_id = $1 \
     AND d.sent_at >= $2 \
     AND ($3::uuid IS NULL OR d.document_id = $3) \
     AND ($4::text IS NULL OR d.recipient_company ILIKE $4)";

fn scoped(sql: String, scope: &DashboardScope) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
    sql_query(sql)
        .into_boxed()
        .bind::<SqlUuid, _>(scope.tenant_id)
        .bind::<Timestamptz, _>(scope.since)
        .bind::<Nullable<SqlUuid>, _>(scope.document_id)
        .bind::<Nullable<Text>, _>(scope.company.as_deref().map(like_literal))
}

#[derive(QueryableByName)]
struct EngagementTotals {
    #[diesel(sql_type = BigInt)]
    total_opens: i64,
    #[diesel(sql_type = BigInt)]
    unique_viewers: i64,
}

#[derive(QueryableByName)]
struct DayCount {
    #[diesel(sql_type = Date)]
    day: NaiveDate,
    #[diesel(sql_type = BigInt)]
    sent: i64,
    #[diesel(sql_type = BigInt)]
    opened: i64,
}

/// Rows created only by progress pings count as viewers but not as opens.
fn engagement_totals(
    conn: &mut PgConnection,
    scope: &DashboardScope,
) -> TrackingResult<EngagementTotals> {
    let sql = format!(
        "SELECT COUNT(*) FILTER (WHERE e.last_opened_at IS NOT NULL) AS total_opens, \
         COUNT(DISTINCT e.viewer_email) AS unique_viewers {SCOPED_ENGAGEMENT}"
    );
    Ok(scoped(sql, scope).get_result(conn)?)
}

/// First-seen times bucketed by local weekday and hour, in SQL so the
/// database does the timezone conversion and the grouping.
fn activity_buckets(
    conn: &mut PgConnection,
    scope: &DashboardScope,
) -> TrackingResult<Vec<ActivityBucket>> {
    let sql = format!(
        "SELECT EXTRACT(ISODOW FROM e.first_seen_at AT TIME ZONE $5)::int4 AS weekday, \
         EXTRACT(HOUR FROM e.first_seen_at AT TIME ZONE $5)::int4 AS hour, \
         COUNT(*) AS opens {SCOPED_ENGAGEMENT} GROUP BY 1, 2"
    );
    Ok(scoped(sql, scope)
        .bind::<Text, _>(scope.tz.name())
        .load(conn)?)
}

/// Daily sent/opened counts. Rollups are per document, so a company filter
/// falls back to counting distributions by send day and first-open day.
fn day_counts(
    conn: &mut PgConnection,
    scope: &DashboardScope,
) -> TrackingResult<BTreeMap<NaiveDate, (i64, i64)>> {
    let rows: Vec<DayCount> = if scope.company.is_some() {
        let sql = format!(
            "SELECT day, SUM(sent)::int8 AS sent, SUM(opened)::int8 AS opened FROM ( \
             SELECT (d.sent_at AT TIME ZONE $5)::date AS day, 1 AS sent, 0 AS opened \
             {SCOPED_DISTRIBUTIONS} \
             UNION ALL \
             SELECT (d.first_open_at AT TIME ZONE $5)::date AS day, 0 AS sent, 1 AS opened \
             {SCOPED_DISTRIBUTIONS} AND d.first_open_at IS NOT NULL \
             ) counted GROUP BY day"
        );
        scoped(sql, scope)
            .bind::<Text, _>(scope.tz.name())
            .load(conn)?
    } else {
        sql_query(
            "SELECT m.day, SUM(m.sent_count)::int8 AS sent, SUM(m.opened_count)::int8 AS opened \
             FROM daily_metrics m JOIN documents doc ON doc.id = m.document_id \
             WHERE doc.tenant_id = $1 AND m.day >= $2 \
             AND ($3::uuid IS NULL OR m.document_id = $3) \
             GROUP BY m.day",
        )
        .bind::<SqlUuid, _>(scope.tenant_id)
        .bind::<Date, _>(scope.first_day())
        .bind::<Nullable<SqlUuid>, _>(scope.document_id)
        .load(conn)?
    };

    Ok(rows
        .into_iter()
        .map(|row| (row.day, (row.sent, row.opened)))
        .collect())
}

fn load_distributions(
    conn: &mut PgConnection,
    scope: &DashboardScope,
) -> TrackingResult<Vec<(Distribution, String)>> {
    let mut query = distributions::table
        .inner_join(documents::table)
        .filter(distributions::tenant_id.eq(scope.tenant_id))
        .filter(documents::tenant_id.eq(scope.tenant_id))
        .filter(distributions::sent_at.ge(scope.since))
        .select((Distribution::as_select(), documents::title))
        .into_boxed();

    if let Some(document_id) = scope.document_id {
        query = query.filter(distributions::document_id.eq(document_id));
    }
    if let Some(company) = &scope.company {
        query = query.filter(distributions::recipient_company.ilike(like_literal(company)));
    }

    Ok(query.load(conn)?)
}

/// Viewer count and best read completion per distribution.
fn viewer_stats(
    conn: &mut PgConnection,
    distribution_ids: &[Uuid],
) -> TrackingResult<HashMap<Uuid, (i64, i32)>> {
    if distribution_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(Uuid, i64, Option<i32>)> = open_events::table
        .filter(open_events::distribution_id.eq_any(distribution_ids))
        .group_by(open_events::distribution_id)
        .select((
            open_events::distribution_id,
            count_star(),
            max(open_events::max_read_percentage),
        ))
        .load(conn)?;
    Ok(rows
        .into_iter()
        .map(|(id, viewers, best)| (id, (viewers, best.unwrap_or(0))))
        .collect())
}

pub fn summary(conn: &mut PgConnection, scope: &DashboardScope) -> TrackingResult<Summary> {
    let totals = engagement_totals(conn, scope)?;
    let peak = peak_slot(&activity_buckets(conn, scope)?);

    let (sent, opened) = day_counts(conn, scope)?
        .values()
        .fold((0, 0), |acc, (sent, opened)| (acc.0 + sent, acc.1 + opened));

    Ok(Summary {
        total_opens: totals.total_opens,
        unique_viewers: totals.unique_viewers,
        sent,
        opened,
        open_rate_percent: open_rate_percent(opened, sent),
        peak_slot: peak,
    })
}

pub fn leaderboard(
    conn: &mut PgConnection,
    scope: &DashboardScope,
) -> TrackingResult<Vec<LeaderboardEntry>> {
    let sql = format!(
        "SELECT d.document_id, doc.title, \
         COUNT(*) FILTER (WHERE e.last_opened_at IS NOT NULL) AS views, \
         COUNT(DISTINCT e.viewer_email) AS unique_viewers, \
         ROUND(AVG(e.max_read_percentage), 1)::float8 AS avg_read_percentage \
         {SCOPED_ENGAGEMENT} \
         GROUP BY d.document_id, doc.title \
         ORDER BY views DESC, unique_viewers DESC, doc.title ASC"
    );
    Ok(scoped(sql, scope).load(conn)?)
}

pub fn timeline(
    conn: &mut PgConnection,
    scope: &DashboardScope,
) -> TrackingResult<Vec<TimelinePoint>> {
    let counts = day_counts(conn, scope)?;
    Ok(fill_timeline(&counts, scope.first_day(), scope.last_day()))
}

pub fn weekday_peaks(
    conn: &mut PgConnection,
    scope: &DashboardScope,
) -> TrackingResult<Vec<WeekdayActivity>> {
    Ok(weekday_histogram(&activity_buckets(conn, scope)?))
}

pub fn intent_scores(
    conn: &mut PgConnection,
    scope: &DashboardScope,
) -> TrackingResult<Vec<IntentRow>> {
    let sent = load_distributions(conn, scope)?;
    let ids: Vec<Uuid> = sent.iter().map(|(distribution, _)| distribution.id).collect();
    let stats = viewer_stats(conn, &ids)?;

    let mut rows: Vec<IntentRow> = sent
        .into_iter()
        .map(|(distribution, document_title)| {
            let (viewers, max_read_percentage) =
                stats.get(&distribution.id).copied().unwrap_or((0, 0));
            let score = intent::assess(distribution.sent_at, distribution.first_open_at);
            IntentRow {
                distribution_id: distribution.id,
                token: distribution.token,
                document_id: distribution.document_id,
                document_title,
                company: distribution.recipient_company,
                email: distribution.recipient_email,
                sent_at: distribution.sent_at.and_utc(),
                first_open_at: distribution.first_open_at.map(|at| at.and_utc()),
                tier: score.tier,
                hours_to_open: score.hours_to_open,
                viewers,
                max_read_percentage,
                revoked: distribution.revoked,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.tier
            .cmp(&a.tier)
            .then_with(|| {
                a.hours_to_open
                    .unwrap_or(f64::MAX)
                    .total_cmp(&b.hours_to_open.unwrap_or(f64::MAX))
            })
            .then(b.sent_at.cmp(&a.sent_at))
    });
    Ok(rows)
}

/// Company names are free text: they group case-insensitively and report the
/// lowest spelling.
pub fn companies(
    conn: &mut PgConnection,
    scope: &DashboardScope,
) -> TrackingResult<Vec<CompanyEngagement>> {
    let sql = format!(
        "WITH scoped AS ( \
             SELECT d.id, d.recipient_company, d.first_open_at {SCOPED_DISTRIBUTIONS} \
             AND d.recipient_company IS NOT NULL \
         ), sends AS ( \
             SELECT LOWER(recipient_company) AS company_key, MIN(recipient_company) AS company, \
             COUNT(*) AS sent, COUNT(first_open_at) AS opened \
             FROM scoped GROUP BY 1 \
         ), views AS ( \
             SELECT LOWER(s.recipient_company) AS company_key, \
             COUNT(DISTINCT e.viewer_email) AS viewers, \
             AVG(e.max_read_percentage) AS avg_read \
             FROM scoped s JOIN open_events e ON e.distribution_id = s.id GROUP BY 1 \
         ) \
         SELECT sends.company, sends.sent, sends.opened, \
         COALESCE(views.viewers, 0) AS viewers, \
         COALESCE(ROUND(views.avg_read, 1), 0)::float8 AS avg_read_percentage \
         FROM sends LEFT JOIN views USING (company_key) \
         ORDER BY avg_read_percentage DESC, sends.company ASC"
    );
    Ok(scoped(sql, scope).load(conn)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn bucket(weekday: i32, hour: i32, opens: i64) -> ActivityBucket {
        ActivityBucket {
            weekday,
            hour,
            opens,
        }
    }

    #[test]
    fn open_rate_is_clamped_and_rounded() {
        assert_eq!(open_rate_percent(0, 0), 0.0);
        assert_eq!(open_rate_percent(1, 3), 33.3);
        assert_eq!(open_rate_percent(5, 2), 100.0);
        assert_eq!(open_rate_percent(-3, 2), 0.0);
    }

    #[test]
    fn day_parts_use_noon_and_five_pm_boundaries() {
        assert_eq!(day_part(0), DayPart::Morning);
        assert_eq!(day_part(11), DayPart::Morning);
        assert_eq!(day_part(12), DayPart::Afternoon);
        assert_eq!(day_part(16), DayPart::Afternoon);
        assert_eq!(day_part(17), DayPart::Evening);
        assert_eq!(day_part(23), DayPart::Evening);
    }

    #[test]
    fn peak_slot_sums_hours_into_two_hour_slots() {
        let buckets = [bucket(1, 14, 1), bucket(2, 15, 1), bucket(3, 9, 1)];
        assert_eq!(peak_slot(&buckets).as_deref(), Some("14:00-16:00"));
    }

    #[test]
    fn peak_slot_ties_prefer_earlier_slot_and_handles_empty() {
        let buckets = [bucket(1, 20, 2), bucket(1, 8, 2)];
        assert_eq!(peak_slot(&buckets).as_deref(), Some("08:00-10:00"));
        assert_eq!(peak_slot(&[]), None);
        assert_eq!(peak_slot(&[bucket(4, 23, 1)]).as_deref(), Some("22:00-00:00"));
    }

    #[test]
    fn weekday_histogram_maps_iso_weekdays_and_day_parts() {
        let buckets = [
            bucket(1, 10, 1),
            bucket(1, 13, 2),
            bucket(2, 0, 1),
            bucket(7, 18, 3),
        ];
        let grid = weekday_histogram(&buckets);
        assert_eq!(grid.len(), 7);
        assert_eq!(grid[0].weekday, "monday");
        assert_eq!((grid[0].morning, grid[0].afternoon, grid[0].evening), (1, 2, 0));
        assert_eq!(grid[1].morning, 1);
        assert_eq!(grid[6].weekday, "sunday");
        assert_eq!(grid[6].evening, 3);
    }

    #[test]
    fn timeline_fills_missing_days() {
        let first = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let last = NaiveDate::from_ymd_opt(2025, 6, 4).unwrap();
        let mut counts = BTreeMap::new();
        counts.insert(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(), (3, 1));
        let points = fill_timeline(&counts, first, last);
        assert_eq!(points.len(), 4);
        assert_eq!(points[0].sent, 0);
        assert_eq!((points[1].sent, points[1].opened), (3, 1));
        assert_eq!(points[3].day, last);
    }

    #[test]
    fn scope_clamps_range_and_blank_company() {
        let now = utc(10, 12, 0);
        let scope = DashboardScope::new(
            Uuid::new_v4(),
            DashboardFilter {
                document_id: None,
                company: Some("   ".into()),
                range_days: Some(10_000),
            },
            chrono_tz::UTC,
            now,
        );
        assert_eq!(scope.company, None);
        assert_eq!(scope.since, now - Duration::days(MAX_RANGE_DAYS));
    }

    #[test]
    fn like_literal_escapes_wildcards() {
        assert_eq!(like_literal("100%_Co\\"), "100\\%\\_Co\\\\");
    }
}
