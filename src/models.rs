use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = documents)]
pub struct Document {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub storage_key: String,
    pub deleted_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub storage_key: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = distributions)]
#[diesel(belongs_to(Document))]
pub struct Distribution {
    pub id: Uuid,
    pub token: String,
    pub tenant_id: Uuid,
    pub document_id: Uuid,
    pub recipient_company: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_url: Option<String>,
    pub sent_at: NaiveDateTime,
    pub first_open_at: Option<NaiveDateTime>,
    pub revoked: bool,
    pub revoked_at: Option<NaiveDateTime>,
    pub revoked_reason: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = distributions)]
pub struct NewDistribution {
    pub id: Uuid,
    pub token: String,
    pub tenant_id: Uuid,
    pub document_id: Uuid,
    pub recipient_company: Option<String>,
    pub recipient_email: Option<String>,
    pub recipient_url: Option<String>,
    pub sent_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = open_events)]
#[diesel(belongs_to(Distribution))]
pub struct OpenEvent {
    pub id: Uuid,
    pub distribution_id: Uuid,
    pub viewer_email: String,
    pub first_seen_at: NaiveDateTime,
    pub last_seen_at: NaiveDateTime,
    pub max_read_percentage: i32,
    pub max_page_reached: i32,
    pub max_elapsed_seconds: i32,
    pub last_session_id: Option<String>,
    /// Set by opens only; rows created by a progress ping leave it empty.
    pub last_opened_at: Option<NaiveDateTime>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = open_events)]
pub struct NewOpenEvent<'a> {
    pub id: Uuid,
    pub distribution_id: Uuid,
    pub viewer_email: &'a str,
    pub first_seen_at: NaiveDateTime,
    pub last_seen_at: NaiveDateTime,
    pub max_read_percentage: i32,
    pub max_page_reached: i32,
    pub max_elapsed_seconds: i32,
    pub last_session_id: Option<&'a str>,
    pub last_opened_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = daily_metrics)]
pub struct DailyMetric {
    pub document_id: Uuid,
    pub day: NaiveDate,
    pub sent_count: i64,
    pub opened_count: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
