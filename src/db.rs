use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 2;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_pool_with_size(database_url: &str, max_size: u32) -> anyhow::Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(CONNECTION_TIMEOUT)
        .build(manager)?;
    Ok(pool)
}

/// Runs a diesel closure on the blocking thread pool with a pooled connection.
///
/// Pool and join failures surface through `E: From<PoolFailure>` so callers keep
/// their own error type.
pub async fn run_blocking<F, T, E>(pool: &PgPool, f: F) -> Result<T, E>
where
    F: FnOnce(&mut PgConnection) -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<PoolFailure> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|err| E::from(PoolFailure(format!("database pool error: {err}"))))?;
        f(&mut conn)
    })
    .await
    .map_err(|err| E::from(PoolFailure(format!("database task panicked: {err}"))))?
}

#[derive(Debug)]
pub struct PoolFailure(pub String);

impl std::fmt::Display for PoolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for PoolFailure {}
