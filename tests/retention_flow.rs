mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, NaiveDateTime, Utc};
use common::{acquire_db_lock, json_body, TestApp};
use diesel::prelude::*;
use doctrack::models::Distribution;
use doctrack::schema::{daily_metrics, distributions, open_events};
use doctrack::tracking::engagement::{self, ProgressInput};
use doctrack::tracking::registry::{self, Recipient};
use doctrack::tracking::retention::{run_cleanup, RetentionPolicy};
use doctrack::tracking::rollup::{load_metric, reporting_day};
use doctrack::tracking::session::IdleGapSessionResolver;
use uuid::Uuid;

const BERLIN: chrono_tz::Tz = chrono_tz::Europe::Berlin;

fn preview() -> Recipient {
    Recipient {
        company: None,
        email: Some("me@internal.test".into()),
        url: None,
    }
}

fn customer(name: &str) -> Recipient {
    Recipient {
        company: Some(name.to_string()),
        email: None,
        url: None,
    }
}

fn sent(
    conn: &mut PgConnection,
    tenant: Uuid,
    document_id: Uuid,
    recipient: Recipient,
    at: NaiveDateTime,
) -> Result<Distribution> {
    Ok(registry::register(
        conn,
        BERLIN,
        tenant,
        document_id,
        recipient,
        Some(at),
        at,
    )?)
}

fn load(conn: &mut PgConnection, id: Uuid) -> Result<Option<Distribution>> {
    Ok(distributions::table
        .find(id)
        .select(Distribution::as_select())
        .first(conn)
        .optional()?)
}

#[tokio::test]
async fn sweep_deletes_previews_and_revokes_stale_sends() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let tenant = Uuid::new_v4();
    let document_id = app.insert_document(tenant, "Quarterly update").await?;
    let stale_document = app.insert_document(tenant, "Stale offer").await?;
    let config = app.state.config.clone();

    app.with_conn(move |conn| {
        let now = Utc::now().naive_utc();
        let ten_days_ago = now - Duration::days(10);
        let sessions = IdleGapSessionResolver::default();

        let old_previews = (0..3)
            .map(|_| sent(conn, tenant, document_id, preview(), ten_days_ago))
            .collect::<Result<Vec<_>>>()?;
        let fresh_preview = sent(conn, tenant, document_id, preview(), now - Duration::days(3))?;

        let stale = sent(conn, tenant, stale_document, customer("Quiet GmbH"), ten_days_ago)?;
        let opened = sent(conn, tenant, document_id, customer("Keen AG"), ten_days_ago)?;
        engagement::record_open(
            conn,
            &sessions,
            BERLIN,
            &opened.token,
            "buyer@keen.test",
            Some("s1"),
            ten_days_ago + Duration::hours(1),
        )?;
        // Progress without an open leaves first_open_at empty but records a viewer.
        let viewed = sent(conn, tenant, document_id, customer("Racy SA"), ten_days_ago)?;
        engagement::record_progress(
            conn,
            &viewed.token,
            "reader@racy.test",
            ProgressInput {
                read_percentage: 10.0,
                page_reached: 1,
                elapsed_seconds: 5.0,
            },
            ten_days_ago + Duration::hours(2),
        )?;

        let stale_day = reporting_day(ten_days_ago, BERLIN);
        let policy = RetentionPolicy::from_config(&config);
        let report = run_cleanup(conn, &policy, BERLIN, now);
        assert!(report.failures.is_empty());
        assert_eq!(report.previews_deleted, 3);
        assert_eq!(report.unopened_revoked, 1);
        assert_eq!(report.open_events_deleted, 0);
        assert_eq!(report.daily_metrics_deleted, 0);

        for preview in &old_previews {
            assert!(load(conn, preview.id)?.is_none());
        }
        assert!(load(conn, fresh_preview.id)?.is_some());

        let stale = load(conn, stale.id)?.unwrap();
        assert!(stale.revoked);
        assert_eq!(stale.revoked_reason.as_deref(), Some("expired"));
        assert_eq!(
            load_metric(conn, stale_document, stale_day)?.unwrap().sent_count,
            1
        );

        assert!(!load(conn, opened.id)?.unwrap().revoked);
        let viewed = load(conn, viewed.id)?.unwrap();
        assert!(viewed.first_open_at.is_none());
        assert!(!viewed.revoked);
        Ok(())
    })
    .await?;

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn sweep_prunes_old_engagement_and_is_rerunnable() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let tenant = Uuid::new_v4();
    let staff = app.staff_token(tenant)?;
    let document_id = app.insert_document(tenant, "Archive").await?;

    let (ancient_day, recent_day) = app
        .with_conn(move |conn| {
            let now = Utc::now().naive_utc();
            let ancient = now - Duration::days(200);
            let recent = now - Duration::days(1);
            let sessions = IdleGapSessionResolver::default();

            let old = sent(conn, tenant, document_id, customer("Old Co"), ancient)?;
            engagement::record_open(
                conn,
                &sessions,
                BERLIN,
                &old.token,
                "someone@old.test",
                None,
                ancient,
            )?;
            let new = sent(conn, tenant, document_id, customer("New Co"), recent)?;
            engagement::record_open(
                conn,
                &sessions,
                BERLIN,
                &new.token,
                "someone@new.test",
                None,
                recent,
            )?;
            Ok((reporting_day(ancient, BERLIN), reporting_day(recent, BERLIN)))
        })
        .await?;

    let response = app.post_empty("/api/maintenance/cleanup", Some(&staff)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await?;
    assert_eq!(report["open_events_deleted"], 1);
    assert_eq!(report["daily_metrics_deleted"], 1);
    assert_eq!(report["unopened_revoked"], 0);
    assert_eq!(report["failures"].as_array().unwrap().len(), 0);

    let (events, ancient_metric, recent_metric) = app
        .with_conn(move |conn| {
            let events: i64 = open_events::table.count().get_result(conn)?;
            let ancient = load_metric(conn, document_id, ancient_day)?;
            let recent = load_metric(conn, document_id, recent_day)?;
            Ok((events, ancient, recent))
        })
        .await?;
    assert_eq!(events, 1);
    assert!(ancient_metric.is_none());
    assert_eq!(recent_metric.map(|m| m.sent_count), Some(1));

    let response = app.post_empty("/api/maintenance/cleanup", Some(&staff)).await?;
    let rerun = json_body(response).await?;
    for key in [
        "previews_deleted",
        "unopened_revoked",
        "open_events_deleted",
        "daily_metrics_deleted",
    ] {
        assert_eq!(rerun[key], 0, "{key}");
    }

    let remaining: i64 = app
        .with_conn(|conn| Ok(daily_metrics::table.count().get_result(conn)?))
        .await?;
    assert_eq!(remaining, 1);

    let response = app.post_empty("/api/maintenance/cleanup", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
