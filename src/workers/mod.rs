use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    config::AppConfig,
    db,
    jobs::{backoff_for, reserve_job, settle_job, Settlement},
    models::Job,
    state::AppState,
    tracking::TrackingError,
};

pub mod notify;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    /// Requeued with exponential backoff until the attempt budget runs out.
    Retry { error: String },
    Failed { error: String },
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let map = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers: map,
            poll_interval,
        }
    }

    pub async fn run(&self) {
        info!(handlers = self.handlers.len(), "worker started");
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Processes at most one job. Returns `Ok(true)` when a job was handled.
    pub async fn tick(&self) -> Result<bool, TrackingError> {
        let job_types: Vec<&'static str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let reserved = db::run_blocking(&self.state.pool, move |conn| {
            reserve_job(conn, &job_types).map_err(TrackingError::from)
        })
        .await?;

        let Some(job) = reserved else {
            return Ok(false);
        };

        let settlement = match self.handlers.get(job.job_type.as_str()) {
            Some(handler) => {
                let execution = handler.handle(self.state.clone(), job.clone()).await;
                settlement_for(&job, execution)
            }
            None => {
                error!(job_id = %job.id, job_type = %job.job_type, "no handler registered for job type");
                Settlement::Failed {
                    error: "no handler registered".into(),
                }
            }
        };

        match &settlement {
            Settlement::Succeeded => {
                info!(job_id = %job.id, job_type = %job.job_type, "job completed successfully")
            }
            Settlement::RetryAt { run_after, error } => {
                warn!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, %run_after, %error, "job will retry")
            }
            Settlement::Failed { error } => {
                error!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, %error, "job failed")
            }
        }

        let job_id = job.id;
        db::run_blocking(&self.state.pool, move |conn| {
            settle_job(conn, job_id, &settlement).map_err(TrackingError::from)
        })
        .await?;

        Ok(true)
    }
}

fn settlement_for(job: &Job, execution: JobExecution) -> Settlement {
    match execution {
        JobExecution::Success => Settlement::Succeeded,
        JobExecution::Retry { error } => Settlement::RetryAt {
            run_after: Utc::now().naive_utc() + backoff_for(job.attempts),
            error,
        }
        .bounded(job.attempts),
        JobExecution::Failed { error } => Settlement::Failed { error },
    }
}

pub fn default_handlers(config: &AppConfig) -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(notify::NotifyFirstOpenJob::new(
        config.notify_webhook_url.clone(),
    ))]
}
