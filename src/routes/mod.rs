use std::time::Duration;

use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::StaffContext, state::AppState};

pub mod dashboard;
pub mod distributions;
pub mod documents;
pub mod health;
pub mod maintenance;
pub mod track;

/// Bulk sends carry up to a thousand recipients.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());

    let track_routes = Router::new()
        .route("/open", post(track::open))
        .route("/progress", post(track::progress))
        .route("/check/:token", get(track::check))
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.ping_timeout_seconds.max(1),
        )));

    let distribution_routes = Router::new()
        .route("/", post(distributions::register))
        .route("/bulk", post(distributions::register_bulk))
        .route("/:token", get(distributions::get_distribution))
        .route("/:token/revoke", post(distributions::revoke_distribution));

    let document_routes = Router::new()
        .route("/:id", delete(documents::delete_document))
        .route("/:id/revoke", post(documents::revoke_document));

    let dashboard_routes = Router::new()
        .route("/summary", get(dashboard::summary))
        .route("/leaderboard", get(dashboard::leaderboard))
        .route("/timeline", get(dashboard::timeline))
        .route("/weekday-peaks", get(dashboard::weekday_peaks))
        .route("/intent-scores", get(dashboard::intent_scores))
        .route("/companies", get(dashboard::companies));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/distributions", distribution_routes)
        .nest("/api/documents", document_routes)
        .nest("/api/dashboard", dashboard_routes)
        .route("/api/maintenance/cleanup", post(maintenance::run_cleanup))
        .layer(middleware::from_extractor_with_state::<StaffContext, _>(
            protected_state,
        ));

    Router::new()
        .nest("/api/track", track_routes)
        .merge(protected_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
