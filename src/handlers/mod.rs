pub mod auth;
pub mod health;
pub mod user;

use crate::error::AppError;

/// Runs a store-bound session call on the blocking pool; diesel connections are synchronous.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::internal(format!("blocking task failed: {e}")))?
}
