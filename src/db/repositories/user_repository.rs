use crate::db::error::RepositoryError;
use crate::db::models::user::{NewUser, UpdateUser, User};
use crate::db::repositories::{RepositoryResult, UserDirectory};
use crate::db::schema::users;
use crate::db::{DbConnection, DbPool};
use diesel::prelude::*;

#[derive(Clone)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn connection(&self) -> Result<DbConnection, RepositoryError> {
        self.pool.get().map_err(Into::into)
    }
}

impl UserDirectory for UserRepository {
    /// Looks a user up by primary key
    fn find_by_id(&self, id: i64) -> RepositoryResult<Option<User>> {
        let mut conn = self.connection()?;

        users::table
            .filter(users::id.eq(id))
            .first::<User>(&mut conn)
            .optional()
            .map_err(Into::into)
    }

    fn find_by_subject_id(&self, subject_id: &str) -> RepositoryResult<Option<User>> {
        let mut conn = self.connection()?;

        users::table
            .filter(users::subject_id.eq(subject_id))
            .first::<User>(&mut conn)
            .optional()
            .map_err(Into::into)
    }

    fn find_by_email(&self, email: &str) -> RepositoryResult<Option<User>> {
        let mut conn = self.connection()?;

        users::table
            .filter(users::email.eq(email))
            .first::<User>(&mut conn)
            .optional()
            .map_err(Into::into)
    }

    /// Inserts a new user row
    fn create(&self, new_user: &NewUser) -> RepositoryResult<User> {
        let mut conn = self.connection()?;

        diesel::insert_into(users::table)
            .values(new_user)
            .get_result::<User>(&mut conn)
            .map_err(Into::into)
    }

    fn update(&self, id: i64, changes: &UpdateUser) -> RepositoryResult<User> {
        let mut conn = self.connection()?;

        diesel::update(users::table.filter(users::id.eq(id)))
            .set(changes)
            .get_result::<User>(&mut conn)
            .map_err(Into::into)
    }
}
