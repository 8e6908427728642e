use std::{env, sync::Arc, time::Duration};

use tokio::signal;

use doctrack::{
    auth::jwt::JwtService, config::AppConfig, db, default_handlers, init_tracing,
    state::AppState, storage::S3Storage, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        notify_webhook = config.notify_webhook_url.is_some(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = Arc::new(S3Storage::from_config(&config).await?);
    let jwt = JwtService::from_config(&config)?;
    let handlers = default_handlers(&config);

    let state = Arc::new(AppState::new(pool, config, storage, jwt));
    let worker = Worker::new(state, handlers, Duration::from_secs(2));

    // `--drain` works the queue until it is empty and exits, for cron-style runs.
    if env::args().skip(1).any(|arg| arg == "--drain") {
        let mut handled = 0u64;
        while worker.tick().await? {
            handled += 1;
        }
        tracing::info!(handled, "job queue drained");
        return Ok(());
    }

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}
