use axum::{Json, extract::State};
use session_manager_api::UserInfo;

use super::run_blocking;
use crate::app::AppState;
use crate::auth::extractors::AuthClaims;
use crate::error::AppError;

/// GET /auth/me
/// Profile of the bearer token's user
pub async fn me(
    State(state): State<AppState>,
    auth: AuthClaims,
) -> Result<Json<UserInfo>, AppError> {
    let sessions = state.sessions.clone();
    let user = run_blocking(move || sessions.current_user(auth.user_id)).await?;
    Ok(Json(user))
}
