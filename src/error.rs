// src/error.rs

use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use session_manager_api::ErrorResponse;

use crate::auth::identity::IdentityError;
use crate::auth::jwt::JwtError;
use crate::db::error::RepositoryError;

pub const TOKEN_EXPIRED_HEADER: &str = "token-expired";

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppError {
    // === Session errors ===
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
    #[error("Invalid refresh token")]
    InvalidRefreshToken,
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Signing key is not configured")]
    MisconfiguredSecret,
    #[error("Token generation failed: {0}")]
    TokenGenerationFailed(String),
    #[error("Identity provider unavailable: {0}")]
    IdentityProviderUnavailable(String),

    // === Bearer authentication ===
    #[error("Invalid token format")]
    InvalidTokenFormat,
    #[error("Access token expired")]
    AccessTokenExpired,
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // === Request errors ===
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, internal_detail) = self.get_error_info();

        if let Some(ref detail) = internal_detail {
            tracing::error!(error_code, %status, detail, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            details: None,
        });

        let mut response = (status, body).into_response();
        if matches!(self, AppError::AccessTokenExpired) {
            response
                .headers_mut()
                .insert(TOKEN_EXPIRED_HEADER, HeaderValue::from_static("true"));
        }
        response
    }
}

impl AppError {
    /// Status, stable error code, client message and the detail to log (never sent).
    fn get_error_info(&self) -> (StatusCode, &'static str, String, Option<String>) {
        match self {
            // 400 Bad Request
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::InvalidTokenFormat => (
                StatusCode::BAD_REQUEST,
                "INVALID_TOKEN_FORMAT",
                "Token format is invalid".to_string(),
                None,
            ),

            // 401 Unauthorized
            AppError::InvalidIdentity(reason) => {
                tracing::debug!(reason, "Identity rejected");
                (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_IDENTITY",
                    "Identity could not be verified".to_string(),
                    None,
                )
            }
            AppError::InvalidRefreshToken => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "Please sign in again".to_string(),
                None,
            ),
            AppError::AccessTokenExpired => (
                StatusCode::UNAUTHORIZED,
                "TOKEN_EXPIRED",
                "Access token expired".to_string(),
                None,
            ),
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone(), None)
            }

            // 404 Not Found
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone(), None),

            // 5xx
            AppError::StoreUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STORE_UNAVAILABLE",
                "The session store is unavailable, please retry".to_string(),
                Some(msg.clone()),
            ),
            AppError::IdentityProviderUnavailable(msg) => (
                StatusCode::BAD_GATEWAY,
                "IDENTITY_PROVIDER_UNAVAILABLE",
                "The identity provider could not be reached".to_string(),
                Some(msg.clone()),
            ),
            AppError::MisconfiguredSecret => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
                "An internal server error occurred".to_string(),
                Some("signing key is not configured".to_string()),
            ),
            AppError::TokenGenerationFailed(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "TOKEN_ERROR",
                "An error occurred while generating token".to_string(),
                Some(msg.clone()),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred".to_string(),
                Some(msg.clone()),
            ),
        }
    }

    // === Helper constructors ===
    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AppError::Unauthorized(msg.into())
    }

    pub fn invalid_identity(msg: impl Into<String>) -> Self {
        AppError::InvalidIdentity(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    #[cfg(test)]
    pub fn status_code(&self) -> StatusCode {
        self.get_error_info().0
    }
}

// === Conversions ===

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(msg) => AppError::not_found(msg),
            RepositoryError::PoolError(msg)
            | RepositoryError::UniqueViolation(msg)
            | RepositoryError::ForeignKeyViolation(msg)
            | RepositoryError::DatabaseError(msg) => AppError::StoreUnavailable(msg),
        }
    }
}

impl From<JwtError> for AppError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::MissingSecret => AppError::MisconfiguredSecret,
            JwtError::IncompleteUser | JwtError::GenerationFailed(_) => {
                AppError::TokenGenerationFailed(err.to_string())
            }
            JwtError::VerificationFailed(_) => AppError::unauthorized("Invalid token"),
            JwtError::Expired => AppError::AccessTokenExpired,
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Rejected(reason) => AppError::InvalidIdentity(reason),
            IdentityError::ProviderUnavailable(reason) => {
                AppError::IdentityProviderUnavailable(reason)
            }
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        AppError::validation(format!("Invalid JSON: {err}"))
    }
}
