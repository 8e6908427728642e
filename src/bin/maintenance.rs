use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use doctrack::{
    config::AppConfig,
    db, init_tracing,
    tracking::retention::{run_cleanup, RetentionPolicy},
};

const USAGE: &str = "Usage: maintenance cleanup";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("cleanup") => cleanup().await?,
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// One retention pass under a hard timeout. Re-running after a timeout or
/// crash picks up whatever rows are still eligible.
async fn cleanup() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        batch_size = config.cleanup_batch_size,
        max_batches = config.cleanup_max_batches,
        timeout_minutes = config.cleanup_timeout_minutes,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let policy = RetentionPolicy::from_config(&config);
    let tz = config.reporting_timezone;
    let limit = Duration::from_secs(config.cleanup_timeout_minutes.max(1) * 60);

    let sweep = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut conn = pool.get().context("failed to get database connection")?;
        Ok(run_cleanup(&mut conn, &policy, tz, Utc::now().naive_utc()))
    });

    let report = match tokio::time::timeout(limit, sweep).await {
        Ok(joined) => joined.context("cleanup task panicked")??,
        Err(_) => bail!("cleanup exceeded {} minutes", config.cleanup_timeout_minutes),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.failures.is_empty() {
        bail!("retention policies failed: {}", report.failures.join(", "));
    }
    Ok(())
}
