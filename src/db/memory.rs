use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::db::error::RepositoryError;
use crate::db::models::refresh_token::{NewRefreshToken, RefreshToken};
use crate::db::models::user::{NewUser, UpdateUser, User};
use crate::db::repositories::{
    RefreshTokenStore, RepositoryResult, RotatedSession, UserDirectory,
};

#[derive(Default)]
struct Tables {
    next_user_id: i64,
    users: HashMap<i64, User>,
    refresh_tokens: HashMap<Uuid, RefreshToken>,
}

impl Tables {
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id) != except)
    }

    fn subject_taken(&self, subject_id: &str, except: Option<i64>) -> bool {
        self.users
            .values()
            .any(|u| u.subject_id == subject_id && Some(u.id) != except)
    }
}

/// Process-local store implementing both storage traits behind a single lock,
/// so a rotation is as atomic as the Postgres transaction. Data does not survive
/// a restart; meant for local development and tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user row with a fixed id.
    #[cfg(test)]
    pub fn insert_user(&self, user: User) {
        let mut tables = self.tables.lock();
        tables.next_user_id = tables.next_user_id.max(user.id);
        tables.users.insert(user.id, user);
    }

    /// Removes a user and, like `ON DELETE CASCADE`, its refresh tokens.
    #[cfg(test)]
    pub fn delete_user(&self, id: i64) {
        let mut tables = self.tables.lock();
        tables.users.remove(&id);
        tables.refresh_tokens.retain(|_, t| t.user_id != id);
    }

    #[cfg(test)]
    pub fn refresh_token_count(&self) -> usize {
        self.tables.lock().refresh_tokens.len()
    }
}

impl UserDirectory for MemoryStore {
    fn find_by_id(&self, id: i64) -> RepositoryResult<Option<User>> {
        Ok(self.tables.lock().users.get(&id).cloned())
    }

    fn find_by_subject_id(&self, subject_id: &str) -> RepositoryResult<Option<User>> {
        let tables = self.tables.lock();
        Ok(tables
            .users
            .values()
            .find(|u| u.subject_id == subject_id)
            .cloned())
    }

    fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        let tables = self.tables.lock();
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    fn create(&self, new_user: &NewUser) -> RepositoryResult<User> {
        let mut tables = self.tables.lock();
        if tables.email_taken(&new_user.email, None) {
            return Err(RepositoryError::UniqueViolation("users_email_key".into()));
        }
        if tables.subject_taken(&new_user.subject_id, None) {
            return Err(RepositoryError::UniqueViolation(
                "users_subject_id_key".into(),
            ));
        }

        tables.next_user_id += 1;
        let user = User {
            id: tables.next_user_id,
            subject_id: new_user.subject_id.clone(),
            email: new_user.email.clone(),
            display_name: new_user.display_name.clone(),
            avatar_url: new_user.avatar_url.clone(),
            email_verified: new_user.email_verified,
            is_active: new_user.is_active,
            created_at: new_user.created_at,
            updated_at: new_user.updated_at,
            last_login_at: new_user.last_login_at,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn update(&self, id: i64, changes: &UpdateUser) -> RepositoryResult<User> {
        let mut tables = self.tables.lock();
        if let Some(email) = &changes.email
            && tables.email_taken(email, Some(id))
        {
            return Err(RepositoryError::UniqueViolation("users_email_key".into()));
        }
        if let Some(subject_id) = &changes.subject_id
            && tables.subject_taken(subject_id, Some(id))
        {
            return Err(RepositoryError::UniqueViolation(
                "users_subject_id_key".into(),
            ));
        }

        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound("Record not found".into()))?;
        changes.apply(user);
        Ok(user.clone())
    }
}

impl RefreshTokenStore for MemoryStore {
    fn create(&self, new_token: &NewRefreshToken) -> RepositoryResult<RefreshToken> {
        let mut tables = self.tables.lock();
        if !tables.users.contains_key(&new_token.user_id) {
            return Err(RepositoryError::ForeignKeyViolation(
                "refresh_tokens_user_id_fkey".into(),
            ));
        }
        if tables
            .refresh_tokens
            .values()
            .any(|t| t.token_hash == new_token.token_hash)
        {
            return Err(RepositoryError::UniqueViolation(
                "refresh_tokens_token_hash_key".into(),
            ));
        }

        let token = RefreshToken::from(new_token.clone());
        tables.refresh_tokens.insert(token.id, token.clone());
        Ok(token)
    }

    fn find_by_hash(&self, token_hash: &str) -> RepositoryResult<Option<RefreshToken>> {
        let tables = self.tables.lock();
        Ok(tables
            .refresh_tokens
            .values()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    fn rotate(
        &self,
        presented_id: Uuid,
        replacement: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<RotatedSession>> {
        let mut tables = self.tables.lock();

        let Some(mut user) = tables
            .users
            .get(&replacement.user_id)
            .filter(|u| u.is_active)
            .cloned()
        else {
            return Ok(None);
        };
        let presented_active = tables
            .refresh_tokens
            .get(&presented_id)
            .is_some_and(|t| t.user_id == replacement.user_id && t.is_valid(now));
        if !presented_active {
            return Ok(None);
        }
        if tables
            .refresh_tokens
            .values()
            .any(|t| t.token_hash == replacement.token_hash)
        {
            return Err(RepositoryError::UniqueViolation(
                "refresh_tokens_token_hash_key".into(),
            ));
        }

        // Every check has passed; nothing below can fail.
        UpdateUser {
            last_login_at: Some(Some(now)),
            ..UpdateUser::touch(now)
        }
        .apply(&mut user);

        if let Some(presented) = tables.refresh_tokens.get_mut(&presented_id) {
            presented.revoked_at = Some(now);
        }
        tables.users.insert(user.id, user.clone());

        let refresh_token = RefreshToken::from(replacement.clone());
        tables
            .refresh_tokens
            .insert(refresh_token.id, refresh_token.clone());

        Ok(Some(RotatedSession {
            user,
            refresh_token,
        }))
    }

    fn revoke_by_hash(&self, token_hash: &str, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut tables = self.tables.lock();
        let token = tables
            .refresh_tokens
            .values_mut()
            .find(|t| t.token_hash == token_hash && t.revoked_at.is_none());

        Ok(match token {
            Some(token) => {
                token.revoked_at = Some(now);
                true
            }
            None => false,
        })
    }

    fn revoke_all_for_user(&self, user_id: i64, now: DateTime<Utc>) -> RepositoryResult<usize> {
        let mut tables = self.tables.lock();
        let mut revoked = 0;
        for token in tables
            .refresh_tokens
            .values_mut()
            .filter(|t| t.user_id == user_id && t.revoked_at.is_none())
        {
            token.revoked_at = Some(now);
            revoked += 1;
        }
        Ok(revoked)
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> RepositoryResult<usize> {
        let mut tables = self.tables.lock();
        let before = tables.refresh_tokens.len();
        tables.refresh_tokens.retain(|_, t| t.expires_at >= now);
        Ok(before - tables.refresh_tokens.len())
    }
}
