//! Engagement tracking: distribution registry, session continuity, engagement
//! high-water-marks, daily rollups, intent tiers, dashboard reads and retention.

use thiserror::Error;

use crate::db::PoolFailure;
use crate::jobs::JobQueueError;

pub mod dashboard;
pub mod engagement;
pub mod intent;
pub mod registry;
pub mod retention;
pub mod rollup;
pub mod session;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("distribution is no longer available")]
    Gone,
    #[error("{0} belongs to another tenant")]
    Ownership(&'static str),
    #[error("could not allocate a unique access token")]
    TokenExhausted,
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("{0}")]
    Pool(#[from] PoolFailure),
}

impl TrackingError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// True for failures caused by the backing store rather than the request.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Pool(_) | Self::TokenExhausted
        )
    }
}

impl From<JobQueueError> for TrackingError {
    fn from(value: JobQueueError) -> Self {
        match value {
            JobQueueError::Database(err) => Self::Database(err),
        }
    }
}

pub type TrackingResult<T> = Result<T, TrackingError>;
