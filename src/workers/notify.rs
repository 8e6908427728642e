use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    db,
    jobs::JOB_NOTIFY_FIRST_OPEN,
    models::Job,
    schema::{distributions, documents},
    state::AppState,
    tracking::TrackingError,
};

use super::{JobExecution, JobHandler};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct FirstOpenPayload {
    distribution_id: Uuid,
    viewer_email: String,
    opened_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct FirstOpenNotification {
    event: &'static str,
    distribution_id: Uuid,
    tenant_id: Uuid,
    document_id: Uuid,
    document_title: String,
    recipient_company: Option<String>,
    recipient_email: Option<String>,
    viewer_email: String,
    sent_at: DateTime<Utc>,
    opened_at: DateTime<Utc>,
}

/// Tells the external mail collaborator that a recipient opened their copy.
pub struct NotifyFirstOpenJob {
    client: Client,
    webhook_url: Option<String>,
}

impl NotifyFirstOpenJob {
    pub fn new(webhook_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl JobHandler for NotifyFirstOpenJob {
    fn job_type(&self) -> &'static str {
        JOB_NOTIFY_FIRST_OPEN
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let payload: FirstOpenPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(payload) => payload,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid first-open payload: {err}"),
                }
            }
        };

        let Some(url) = self.webhook_url.as_deref() else {
            debug!(job_id = %job.id, "notify webhook not configured; skipping");
            return JobExecution::Success;
        };

        let distribution_id = payload.distribution_id;
        let context = match db::run_blocking(&state.pool, move |conn| {
            load_context(conn, distribution_id)
        })
        .await
        {
            Ok(Some(context)) => context,
            Ok(None) => {
                // Previews are swept after a week; nothing left to report on.
                warn!(job_id = %job.id, %distribution_id, "distribution no longer exists; dropping notification");
                return JobExecution::Success;
            }
            Err(err) => {
                return JobExecution::Retry {
                    error: err.to_string(),
                }
            }
        };

        let notification = FirstOpenNotification {
            event: "distribution.first_open",
            distribution_id,
            tenant_id: context.tenant_id,
            document_id: context.document_id,
            document_title: context.document_title,
            recipient_company: context.recipient_company,
            recipient_email: context.recipient_email,
            viewer_email: payload.viewer_email,
            sent_at: context.sent_at.and_utc(),
            opened_at: payload.opened_at,
        };

        match self.client.post(url).json(&notification).send().await {
            Ok(response) if response.status().is_success() => JobExecution::Success,
            Ok(response) => {
                let status = response.status();
                if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS {
                    JobExecution::Failed {
                        error: format!("webhook rejected notification with status {status}"),
                    }
                } else {
                    JobExecution::Retry {
                        error: format!("webhook responded with status {status}"),
                    }
                }
            }
            Err(err) => JobExecution::Retry {
                error: format!("webhook request failed: {err}"),
            },
        }
    }
}

struct NotificationContext {
    tenant_id: Uuid,
    document_id: Uuid,
    document_title: String,
    recipient_company: Option<String>,
    recipient_email: Option<String>,
    sent_at: chrono::NaiveDateTime,
}

fn load_context(
    conn: &mut PgConnection,
    distribution_id: Uuid,
) -> Result<Option<NotificationContext>, TrackingError> {
    let row = distributions::table
        .inner_join(documents::table)
        .filter(distributions::id.eq(distribution_id))
        .select((
            distributions::tenant_id,
            distributions::document_id,
            documents::title,
            distributions::recipient_company,
            distributions::recipient_email,
            distributions::sent_at,
        ))
        .first::<(
            Uuid,
            Uuid,
            String,
            Option<String>,
            Option<String>,
            chrono::NaiveDateTime,
        )>(conn)
        .optional()?;

    Ok(row.map(
        |(tenant_id, document_id, document_title, recipient_company, recipient_email, sent_at)| {
            NotificationContext {
                tenant_id,
                document_id,
                document_title,
                recipient_company,
                recipient_email,
                sent_at,
            }
        },
    ))
}
