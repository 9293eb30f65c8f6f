use super::DbPool;
use anyhow::{Result, bail};
use diesel::PgConnection;
use diesel::r2d2::ConnectionManager;
use std::time::Duration;

pub const DEFAULT_POOL_SIZE: u32 = 5;

/// Builds the r2d2 pool. Connections are established lazily so startup does
/// not fail when the database is briefly unreachable; every checkout is bounded
/// by `connection_timeout`.
pub fn create_pool(database_url: &str, max_size: u32) -> Result<DbPool> {
    if database_url.is_empty() {
        bail!("Database URL is empty");
    }

    let manager = ConnectionManager::<PgConnection>::new(database_url);

    let pool = diesel::r2d2::Pool::builder()
        .max_size(max_size)
        .min_idle(Some(0))
        .connection_timeout(Duration::from_secs(5))
        .build_unchecked(manager);

    Ok(pool)
}
