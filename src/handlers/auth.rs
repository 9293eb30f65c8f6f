// src/handlers/auth.rs

use axum::{Json, body::Bytes, extract::State, extract::rejection::JsonRejection};
use session_manager_api::{
    AuthResponse, GoogleLoginRequest, LogoutRequest, MessageResponse, RefreshTokenRequest,
};

use super::run_blocking;
use crate::app::AppState;
use crate::auth::extractors::AuthClaims;
use crate::auth::services::ClientInfo;
use crate::error::AppError;

/// POST /auth/google
/// Exchanges a Google ID token for a session token pair
pub async fn google_login(
    State(state): State<AppState>,
    client: ClientInfo,
    payload: Result<Json<GoogleLoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(payload) = payload?;
    if payload.id_token.trim().is_empty() {
        return Err(AppError::validation("id_token is required"));
    }

    let identity = state.identity.verify(&payload.id_token).await?;
    let sessions = state.sessions.clone();
    let response = run_blocking(move || sessions.sign_in(&identity, &client)).await?;
    Ok(Json(response))
}

/// POST /auth/refresh
/// Rotates the presented refresh token into a new pair
pub async fn refresh_token(
    State(state): State<AppState>,
    client: ClientInfo,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, AppError> {
    let Json(payload) = payload?;
    let sessions = state.sessions.clone();
    let response = run_blocking(move || {
        sessions.rotate_refresh_token(&payload.refresh_token, &client)
    })
    .await?;
    Ok(Json(response))
}

/// POST /auth/logout
/// Revokes the presented refresh token. Always answers 200 so clients can drop
/// their local session unconditionally.
pub async fn logout(State(state): State<AppState>, body: Bytes) -> Json<MessageResponse> {
    let request: LogoutRequest = if body.is_empty() {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body).unwrap_or_default()
    };

    if let Some(token) = request.refresh_token {
        let sessions = state.sessions.clone();
        if let Err(e) = run_blocking(move || sessions.revoke_refresh_token(&token)).await {
            tracing::warn!(error = %e, "Failed to revoke refresh token on logout");
        }
    }

    Json(MessageResponse::new("Logged out successfully"))
}

/// POST /auth/logout-all
/// Revokes every refresh token of the bearer token's user
pub async fn logout_all(
    State(state): State<AppState>,
    auth: AuthClaims,
) -> Result<Json<MessageResponse>, AppError> {
    let sessions = state.sessions.clone();
    run_blocking(move || sessions.revoke_all_user_tokens(auth.user_id)).await?;
    Ok(Json(MessageResponse::new("Logged out from all devices")))
}
