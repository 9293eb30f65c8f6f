use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRef, FromRequestParts};
use axum::http::{HeaderMap, header, request::Parts};

use crate::auth::jwt::{Claims, JwtManager};
use crate::auth::services::ClientInfo;
use crate::error::AppError;

const BEARER: &str = "Bearer ";
const FORWARDED_FOR: &str = "x-forwarded-for";

/// Authentication extractor for protected routes.
/// Validates `Authorization: Bearer <JWT>` with the state's `JwtManager` and
/// exposes the verified claims.
#[derive(Debug, Clone)]
pub struct AuthClaims {
    pub user_id: i64,
    #[allow(dead_code)]
    pub claims: Claims,
}

impl<S> FromRequestParts<S> for AuthClaims
where
    JwtManager: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_str = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or(AppError::InvalidTokenFormat)?
            .to_str()
            .map_err(|_| AppError::InvalidTokenFormat)?;

        let token = auth_str
            .strip_prefix(BEARER)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::InvalidTokenFormat)?;

        let jwt_manager = JwtManager::from_ref(state);
        let claims = jwt_manager.verify_token(token).map_err(|e| {
            tracing::debug!(reason = %e, "Rejected bearer token");
            AppError::from(e)
        })?;

        let user_id = claims
            .user_id()
            .ok_or_else(|| AppError::unauthorized("Invalid token"))?;

        Ok(Self { user_id, claims })
    }
}

/// First hop of `X-Forwarded-For`, as set by the load balancer or API gateway.
fn forwarded_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(ToString::to_string)
}

impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|h| h.to_str().ok())
            .map(ToString::to_string);

        let ip_address = forwarded_client_ip(&parts.headers).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Ok(Self {
            user_agent,
            ip_address,
        })
    }
}
