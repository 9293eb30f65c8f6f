// src/auth/services.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use session_manager_api::{AuthResponse, UserInfo};
use uuid::Uuid;

use crate::auth::clock::Clock;
use crate::auth::identity::IdentityClaims;
use crate::auth::jwt::JwtManager;
use crate::auth::refresh::{generate_token, hash_token};
use crate::db::models::refresh_token::{NewRefreshToken, RefreshToken};
use crate::db::models::user::{NewUser, UpdateUser, User};
use crate::db::repositories::{RefreshTokenStore, UserDirectory};
use crate::error::AppError;

pub const DEFAULT_REFRESH_TOKEN_DAYS: i64 = 30;

/// Longest client address kept on a refresh token row.
const MAX_IP_LEN: usize = 64;

/// Request metadata recorded on each refresh token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// A freshly persisted refresh token together with the plaintext handed to the client.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub record: RefreshToken,
}

/// Issues, validates, rotates and revokes session tokens.
pub struct SessionService {
    jwt: JwtManager,
    users: Arc<dyn UserDirectory>,
    tokens: Arc<dyn RefreshTokenStore>,
    clock: Arc<dyn Clock>,
    refresh_token_ttl: Duration,
}

impl SessionService {
    pub fn new(
        jwt: JwtManager,
        users: Arc<dyn UserDirectory>,
        tokens: Arc<dyn RefreshTokenStore>,
        clock: Arc<dyn Clock>,
        refresh_token_days: i64,
    ) -> Self {
        Self {
            jwt,
            users,
            tokens,
            clock,
            refresh_token_ttl: Duration::days(refresh_token_days),
        }
    }

    pub fn jwt(&self) -> &JwtManager {
        &self.jwt
    }

    pub fn issue_access_token(&self, user: &User) -> Result<String, AppError> {
        Ok(self.jwt.generate_access_token(user)?)
    }

    pub fn issue_refresh_token(
        &self,
        user: &User,
        client: &ClientInfo,
    ) -> Result<IssuedRefreshToken, AppError> {
        let token = generate_token();
        let new_token = self.new_refresh_record(user.id, &token, self.clock.now(), client);
        let record = self.tokens.create(&new_token)?;

        tracing::debug!(user_id = user.id, token_id = %record.id, "Issued refresh token");
        Ok(IssuedRefreshToken { token, record })
    }

    #[allow(dead_code, reason = "Used in unit tests")]
    pub fn validate_access_token(&self, token: &str) -> bool {
        self.jwt.validate_access_token(token)
    }

    /// Unverified read of the subject claim; see [`JwtManager::peek_user_id`].
    #[allow(dead_code, reason = "Used in unit tests")]
    pub fn extract_user_id(&self, token: &str) -> Option<i64> {
        JwtManager::peek_user_id(token)
    }

    /// Exchanges a refresh token for a new pair. The presented token is single-use.
    ///
    /// Unknown, revoked, expired and already-rotated tokens, as well as tokens of
    /// inactive users, all yield [`AppError::InvalidRefreshToken`].
    pub fn rotate_refresh_token(
        &self,
        presented: &str,
        client: &ClientInfo,
    ) -> Result<AuthResponse, AppError> {
        if presented.is_empty() {
            return Err(AppError::InvalidRefreshToken);
        }

        let now = self.clock.now();
        let current = self
            .tokens
            .find_by_hash(&hash_token(presented))?
            .filter(|t| t.is_valid(now))
            .ok_or(AppError::InvalidRefreshToken)?;

        let owner = self
            .users
            .find_by_id(current.user_id)?
            .filter(|u| u.is_active)
            .ok_or_else(|| {
                tracing::info!(token_id = %current.id, "Refresh refused for inactive user");
                AppError::InvalidRefreshToken
            })?;

        // Signed before the commit so a signing failure leaves the store untouched.
        let access_token = self.issue_access_token(&owner)?;
        let refresh_token = generate_token();
        let replacement = self.new_refresh_record(owner.id, &refresh_token, now, client);

        let rotated = self
            .tokens
            .rotate(current.id, &replacement, now)?
            .ok_or_else(|| {
                tracing::warn!(
                    user_id = owner.id,
                    token_id = %current.id,
                    "Refresh token was consumed concurrently"
                );
                AppError::InvalidRefreshToken
            })?;

        tracing::info!(
            user_id = rotated.user.id,
            old_token_id = %current.id,
            new_token_id = %rotated.refresh_token.id,
            "Rotated refresh token"
        );

        Ok(AuthResponse::bearer(
            access_token,
            refresh_token,
            self.jwt.expires_in_seconds(),
            UserInfo::from(&rotated.user),
        ))
    }

    /// Returns whether an active token was revoked by this call.
    pub fn revoke_refresh_token(&self, token: &str) -> Result<bool, AppError> {
        if token.is_empty() {
            return Ok(false);
        }
        let revoked = self
            .tokens
            .revoke_by_hash(&hash_token(token), self.clock.now())?;
        tracing::debug!(revoked, "Processed refresh token revocation");
        Ok(revoked)
    }

    pub fn revoke_all_user_tokens(&self, user_id: i64) -> Result<bool, AppError> {
        let count = self
            .tokens
            .revoke_all_for_user(user_id, self.clock.now())?;
        tracing::info!(user_id, count, "Revoked all refresh tokens of user");
        Ok(true)
    }

    /// Deletes refresh tokens whose expiry has passed; revoked but unexpired rows stay.
    pub fn cleanup_expired_tokens(&self) -> Result<usize, AppError> {
        let deleted = self.tokens.delete_expired(self.clock.now())?;
        tracing::info!(deleted, "Cleaned up expired refresh tokens");
        Ok(deleted)
    }

    /// Opens a session for a verified external identity, creating or refreshing the
    /// local user on the way.
    pub fn sign_in(
        &self,
        identity: &IdentityClaims,
        client: &ClientInfo,
    ) -> Result<AuthResponse, AppError> {
        if identity.email.trim().is_empty() {
            return Err(AppError::invalid_identity("identity has no email"));
        }
        if !identity.email_verified {
            return Err(AppError::invalid_identity("email is not verified"));
        }

        let user = self.upsert_user(identity, self.clock.now())?;
        let access_token = self.issue_access_token(&user)?;
        let refresh = self.issue_refresh_token(&user, client)?;

        tracing::info!(user_id = user.id, token_id = %refresh.record.id, "User signed in");
        Ok(AuthResponse::bearer(
            access_token,
            refresh.token,
            self.jwt.expires_in_seconds(),
            UserInfo::from(&user),
        ))
    }

    pub fn current_user(&self, user_id: i64) -> Result<UserInfo, AppError> {
        self.users
            .find_by_id(user_id)?
            .map(|user| UserInfo::from(&user))
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    fn upsert_user(&self, identity: &IdentityClaims, now: DateTime<Utc>) -> Result<User, AppError> {
        let existing = match self.users.find_by_subject_id(&identity.subject_id)? {
            Some(user) => Some(user),
            None => self.users.find_by_email(&identity.email)?,
        };

        let Some(user) = existing else {
            let new_user = NewUser {
                subject_id: identity.subject_id.clone(),
                email: identity.email.clone(),
                display_name: identity.display_name.clone(),
                avatar_url: identity.avatar_url.clone(),
                email_verified: identity.email_verified,
                is_active: true,
                created_at: now,
                updated_at: now,
                last_login_at: Some(now),
            };
            let user = self.users.create(&new_user)?;
            tracing::info!(user_id = user.id, "Created user from external identity");
            return Ok(user);
        };

        if !user.is_active {
            return Err(AppError::invalid_identity("account is disabled"));
        }

        let changes = UpdateUser {
            subject_id: (user.subject_id != identity.subject_id)
                .then(|| identity.subject_id.clone()),
            email: (user.email != identity.email).then(|| identity.email.clone()),
            display_name: Some(identity.display_name.clone()),
            avatar_url: Some(identity.avatar_url.clone()),
            email_verified: Some(identity.email_verified),
            last_login_at: Some(Some(now)),
            ..UpdateUser::touch(now)
        };
        Ok(self.users.update(user.id, &changes)?)
    }

    fn new_refresh_record(
        &self,
        user_id: i64,
        token: &str,
        now: DateTime<Utc>,
        client: &ClientInfo,
    ) -> NewRefreshToken {
        NewRefreshToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_token(token),
            expires_at: now + self.refresh_token_ttl,
            created_at: now,
            user_agent: client.user_agent.clone(),
            ip_address: client
                .ip_address
                .as_deref()
                .map(|ip| ip.chars().take(MAX_IP_LEN).collect()),
        }
    }
}
