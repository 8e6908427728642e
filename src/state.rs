use std::sync::Arc;

use chrono::Duration;

use crate::{
    auth::jwt::JwtService,
    config::AppConfig,
    db::PgPool,
    storage::ObjectStorage,
    tracking::session::{IdleGapSessionResolver, SessionResolver},
};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStorage>,
    pub jwt: JwtService,
    pub sessions: Arc<dyn SessionResolver>,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn ObjectStorage>,
        jwt: JwtService,
    ) -> Self {
        let sessions = Arc::new(IdleGapSessionResolver::new(Duration::minutes(
            config.session_idle_minutes,
        )));
        Self {
            pool,
            config: Arc::new(config),
            storage,
            jwt,
            sessions,
        }
    }
}
