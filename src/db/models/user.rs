use crate::db::schema::users;
use chrono::{DateTime, Utc};
use diesel::{AsChangeset, Insertable, Queryable, Selectable};
use session_manager_api::UserInfo;

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub subject_id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Queryable, Selectable, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i64,
    pub subject_id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        UserInfo {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
            email_verified: user.email_verified,
        }
    }
}

/// Partial update; `None` leaves the column untouched.
/// `updated_at` is always set so the changeset is never empty.
#[derive(AsChangeset, Debug, Clone)]
#[diesel(table_name = users)]
pub struct UpdateUser {
    pub subject_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<Option<String>>,
    pub email_verified: Option<bool>,
    pub is_active: Option<bool>,
    pub last_login_at: Option<Option<DateTime<Utc>>>,
    pub updated_at: DateTime<Utc>,
}

impl UpdateUser {
    pub fn touch(now: DateTime<Utc>) -> Self {
        Self {
            subject_id: None,
            email: None,
            display_name: None,
            avatar_url: None,
            email_verified: None,
            is_active: None,
            last_login_at: None,
            updated_at: now,
        }
    }

    /// Applies the changeset to an in-memory row, mirroring the SQL update.
    pub fn apply(&self, user: &mut User) {
        if let Some(subject_id) = &self.subject_id {
            user.subject_id.clone_from(subject_id);
        }
        if let Some(email) = &self.email {
            user.email.clone_from(email);
        }
        if let Some(display_name) = &self.display_name {
            user.display_name.clone_from(display_name);
        }
        if let Some(avatar_url) = &self.avatar_url {
            user.avatar_url.clone_from(avatar_url);
        }
        if let Some(email_verified) = self.email_verified {
            user.email_verified = email_verified;
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
        if let Some(last_login_at) = self.last_login_at {
            user.last_login_at = last_login_at;
        }
        user.updated_at = self.updated_at;
    }
}
