//! Storage seams used by the session service.
//!
//! Both traits are synchronous: the Postgres implementations run on an r2d2
//! pool and the in-memory one behind a mutex.

pub mod refresh_token_repository;
pub mod user_repository;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::error::RepositoryError;
use crate::db::models::refresh_token::{NewRefreshToken, RefreshToken};
use crate::db::models::user::{NewUser, UpdateUser, User};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Directory of locally known principals.
pub trait UserDirectory: Send + Sync {
    fn find_by_id(&self, id: i64) -> RepositoryResult<Option<User>>;
    fn find_by_subject_id(&self, subject_id: &str) -> RepositoryResult<Option<User>>;
    fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>>;
    fn create(&self, new_user: &NewUser) -> RepositoryResult<User>;
    fn update(&self, id: i64, changes: &UpdateUser) -> RepositoryResult<User>;
}

/// Outcome of a committed rotation.
#[derive(Debug, Clone)]
pub struct RotatedSession {
    pub user: User,
    pub refresh_token: RefreshToken,
}

/// Persistence for refresh tokens, keyed by the SHA-256 hash of the token.
pub trait RefreshTokenStore: Send + Sync {
    fn create(&self, new_token: &NewRefreshToken) -> RepositoryResult<RefreshToken>;

    /// Exact-match lookup regardless of state.
    fn find_by_hash(&self, token_hash: &str) -> RepositoryResult<Option<RefreshToken>>;

    /// Atomically retires `presented_id` and inserts `replacement` for the same user.
    ///
    /// Returns `Ok(None)` without writing anything when the presented token is no
    /// longer active at `now` (revoked, expired, gone or owned by someone else) or
    /// when the owner is inactive. Otherwise, in one transaction: the presented row
    /// gets `revoked_at = now`, the owner's `last_login_at`/`updated_at` become
    /// `now`, and the replacement row is inserted.
    fn rotate(
        &self,
        presented_id: Uuid,
        replacement: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<RotatedSession>>;

    /// Sets `revoked_at` on an unrevoked token. Returns whether a row changed.
    fn revoke_by_hash(&self, token_hash: &str, now: DateTime<Utc>) -> RepositoryResult<bool>;

    /// Revokes every unrevoked token of the user and returns how many changed.
    fn revoke_all_for_user(&self, user_id: i64, now: DateTime<Utc>) -> RepositoryResult<usize>;

    /// Deletes rows with `expires_at < now`, revoked or not.
    fn delete_expired(&self, now: DateTime<Utc>) -> RepositoryResult<usize>;
}
