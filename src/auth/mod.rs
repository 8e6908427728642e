pub mod jwt;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

/// The staff member behind a dashboard or registry call. `tenant_id` scopes
/// every query the request makes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StaffContext {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

#[async_trait]
impl FromRequestParts<AppState> for StaffContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|err| {
                tracing::debug!(error = %err, "rejected staff token");
                AppError::unauthorized()
            })?;

        Ok(StaffContext {
            user_id: claims.sub,
            tenant_id: claims.tenant_id,
        })
    }
}
