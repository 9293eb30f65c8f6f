use crate::db::error::RepositoryError;
use crate::db::models::refresh_token::{NewRefreshToken, RefreshToken};
use crate::db::models::user::User;
use crate::db::repositories::{RefreshTokenStore, RepositoryResult, RotatedSession};
use crate::db::schema::{refresh_tokens, users};
use crate::db::{DbConnection, DbPool};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

#[derive(Clone)]
pub struct RefreshTokenRepository {
    pool: DbPool,
}

impl RefreshTokenRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn connection(&self) -> Result<DbConnection, RepositoryError> {
        self.pool.get().map_err(Into::into)
    }
}

impl RefreshTokenStore for RefreshTokenRepository {
    fn create(&self, new_token: &NewRefreshToken) -> RepositoryResult<RefreshToken> {
        let mut conn = self.connection()?;

        diesel::insert_into(refresh_tokens::table)
            .values(new_token)
            .get_result::<RefreshToken>(&mut conn)
            .map_err(Into::into)
    }

    fn find_by_hash(&self, token_hash: &str) -> RepositoryResult<Option<RefreshToken>> {
        let mut conn = self.connection()?;

        refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(token_hash))
            .first::<RefreshToken>(&mut conn)
            .optional()
            .map_err(Into::into)
    }

    fn rotate(
        &self,
        presented_id: Uuid,
        replacement: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> RepositoryResult<Option<RotatedSession>> {
        let mut conn = self.connection()?;

        conn.transaction::<_, RepositoryError, _>(|conn| {
            let owner = users::table
                .filter(users::id.eq(replacement.user_id))
                .filter(users::is_active.eq(true))
                .first::<User>(conn)
                .optional()?;
            if owner.is_none() {
                return Ok(None);
            }

            // Concurrent rotations of the same row block on its lock; the loser
            // re-evaluates the predicate after the winner commits and matches nothing.
            let retired = diesel::update(
                refresh_tokens::table
                    .filter(refresh_tokens::id.eq(presented_id))
                    .filter(refresh_tokens::user_id.eq(replacement.user_id))
                    .filter(refresh_tokens::revoked_at.is_null())
                    .filter(refresh_tokens::expires_at.gt(now)),
            )
            .set(refresh_tokens::revoked_at.eq(now))
            .execute(conn)?;
            if retired == 0 {
                return Ok(None);
            }

            let user = diesel::update(users::table.filter(users::id.eq(replacement.user_id)))
                .set((users::last_login_at.eq(now), users::updated_at.eq(now)))
                .get_result::<User>(conn)?;

            let refresh_token = diesel::insert_into(refresh_tokens::table)
                .values(replacement)
                .get_result::<RefreshToken>(conn)?;

            Ok(Some(RotatedSession {
                user,
                refresh_token,
            }))
        })
    }

    fn revoke_by_hash(&self, token_hash: &str, now: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut conn = self.connection()?;

        let updated = diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::token_hash.eq(token_hash))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set(refresh_tokens::revoked_at.eq(now))
        .execute(&mut conn)?;

        Ok(updated > 0)
    }

    fn revoke_all_for_user(&self, user_id: i64, now: DateTime<Utc>) -> RepositoryResult<usize> {
        let mut conn = self.connection()?;

        diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user_id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set(refresh_tokens::revoked_at.eq(now))
        .execute(&mut conn)
        .map_err(Into::into)
    }

    fn delete_expired(&self, now: DateTime<Utc>) -> RepositoryResult<usize> {
        let mut conn = self.connection()?;

        diesel::delete(refresh_tokens::table.filter(refresh_tokens::expires_at.lt(now)))
            .execute(&mut conn)
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::{DEFAULT_POOL_SIZE, create_pool};
    use crate::db::models::user::NewUser;
    use crate::db::repositories::UserDirectory;
    use crate::db::repositories::user_repository::UserRepository;
    use chrono::Duration;

    fn repositories() -> (UserRepository, RefreshTokenRepository) {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = create_pool(&url, DEFAULT_POOL_SIZE).expect("pool");
        (
            UserRepository::new(pool.clone()),
            RefreshTokenRepository::new(pool),
        )
    }

    fn create_test_user(users: &UserRepository) -> i64 {
        let now = Utc::now();
        let unique = Uuid::new_v4();
        let new_user = NewUser {
            subject_id: format!("sub_{unique}"),
            email: format!("test_{unique}@example.com"),
            display_name: "refresh_user".to_string(),
            avatar_url: None,
            email_verified: true,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        users.create(&new_user).expect("Failed to create test user").id
    }

    fn new_token(user_id: i64, expires_in: Duration) -> NewRefreshToken {
        let now = Utc::now();
        NewRefreshToken {
            id: Uuid::new_v4(),
            user_id,
            token_hash: format!("test_hash_{}", Uuid::new_v4().simple()),
            expires_at: now + expires_in,
            created_at: now,
            user_agent: Some("tests".to_string()),
            ip_address: None,
        }
    }

    #[test]
    #[ignore = "requires a Postgres database at DATABASE_URL"]
    fn create_then_find_by_hash() {
        let (users, tokens) = repositories();
        let user_id = create_test_user(&users);
        let new = new_token(user_id, Duration::days(7));

        let created = tokens.create(&new).expect("create");
        let found = tokens
            .find_by_hash(&new.token_hash)
            .expect("query")
            .expect("Token should exist");

        assert_eq!(found.id, created.id);
        assert_eq!(found.user_id, user_id);
    }

    #[test]
    #[ignore = "requires a Postgres database at DATABASE_URL"]
    fn rotate_succeeds_once() {
        let (users, tokens) = repositories();
        let user_id = create_test_user(&users);
        let presented = tokens
            .create(&new_token(user_id, Duration::days(7)))
            .expect("create");

        let first = tokens
            .rotate(presented.id, &new_token(user_id, Duration::days(7)), Utc::now())
            .expect("rotate");
        let second = tokens
            .rotate(presented.id, &new_token(user_id, Duration::days(7)), Utc::now())
            .expect("rotate");

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    #[ignore = "requires a Postgres database at DATABASE_URL"]
    fn delete_expired_keeps_revoked_unexpired_rows() {
        let (users, tokens) = repositories();
        let user_id = create_test_user(&users);
        let expired = tokens
            .create(&new_token(user_id, -Duration::hours(1)))
            .expect("create");
        let revoked = tokens
            .create(&new_token(user_id, Duration::days(1)))
            .expect("create");
        assert!(tokens.revoke_by_hash(&revoked.token_hash, Utc::now()).expect("revoke"));

        let removed = tokens.delete_expired(Utc::now()).expect("cleanup");

        assert!(removed >= 1);
        assert!(tokens.find_by_hash(&expired.token_hash).expect("query").is_none());
        assert!(tokens.find_by_hash(&revoked.token_hash).expect("query").is_some());
    }
}
