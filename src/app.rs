// src/app.rs

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::identity::IdentityVerifier;
use crate::auth::jwt::JwtManager;
use crate::auth::services::SessionService;
use crate::handlers::auth::{google_login, logout, logout_all, refresh_token};
use crate::handlers::health::health;
use crate::handlers::user::me;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionService>,
    pub identity: Arc<dyn IdentityVerifier>,
}

impl FromRef<AppState> for JwtManager {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.jwt().clone()
    }
}

/// Authentication routes, mounted under `/auth`
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/google", post(google_login))
        .route("/refresh", post(refresh_token))
        .route("/logout", post(logout))
        // Protected by the AuthClaims extractor
        .route("/logout-all", post(logout_all))
        .route("/me", get(me))
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!(frontend_url, "Invalid FRONTEND_URL, cross-origin requests disabled");
            cors
        }
    }
}

/// Builds the complete application
pub fn build_router(state: AppState, frontend_url: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth_routes())
        .layer(cors_layer(frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use chrono::Utc;
    use session_manager_api::{AuthResponse, ErrorResponse, UserInfo};
    use lambda_http::tower::ServiceExt; // for oneshot

    use crate::auth::clock::ManualClock;
    use crate::auth::identity::{IdentityClaims, IdentityError};
    use crate::auth::jwt::JwtOptions;
    use crate::auth::refresh::hash_token;
    use crate::db::memory::MemoryStore;
    use crate::db::repositories::RefreshTokenStore;

    /// Accepts the literal token "good" as user u1.
    struct StubIdentity;

    #[async_trait]
    impl IdentityVerifier for StubIdentity {
        async fn verify(&self, id_token: &str) -> Result<IdentityClaims, IdentityError> {
            if id_token != "good" {
                return Err(IdentityError::Rejected("bad signature".to_string()));
            }
            Ok(IdentityClaims {
                subject_id: "google-u1".to_string(),
                email: "a@x.com".to_string(),
                display_name: "u1".to_string(),
                avatar_url: None,
                email_verified: true,
            })
        }
    }

    fn test_app() -> (Router, MemoryStore) {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let jwt = JwtManager::new("test_secret_for_auth_routes", JwtOptions::default(), clock.clone())
            .unwrap();
        let sessions = SessionService::new(
            jwt,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            clock,
            30,
        );
        let state = AppState {
            sessions: Arc::new(sessions),
            identity: Arc::new(StubIdentity),
        };
        (build_router(state, "http://localhost:8080"), store)
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("content-type", "application/json")
            .header("user-agent", "route-tests")
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn sign_in(app: &Router) -> AuthResponse {
        let resp = app
            .clone()
            .oneshot(post_json(
                "/auth/google",
                &serde_json::json!({ "id_token": "good" }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        json_body(resp).await
    }

    async fn refresh(app: &Router, token: &str) -> Response {
        app.clone()
            .oneshot(post_json(
                "/auth/refresh",
                &serde_json::json!({ "refresh_token": token }),
            ))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let (app, _) = test_app();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn google_login_returns_token_pair_and_records_client() {
        let (app, store) = test_app();

        let pair = sign_in(&app).await;

        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);
        assert_eq!(pair.user.email, "a@x.com");
        let row = store
            .find_by_hash(&hash_token(&pair.refresh_token))
            .unwrap()
            .unwrap();
        assert_eq!(row.user_agent.as_deref(), Some("route-tests"));
        assert_eq!(row.ip_address.as_deref(), Some("198.51.100.4"));
    }

    #[tokio::test]
    async fn rejected_identity_is_unauthorized() {
        let (app, _) = test_app();

        let resp = app
            .oneshot(post_json(
                "/auth/google",
                &serde_json::json!({ "id_token": "forged" }),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorResponse = json_body(resp).await;
        assert_eq!(body.error, "INVALID_IDENTITY");
    }

    #[tokio::test]
    async fn refresh_rotates_once_then_asks_to_sign_in_again() {
        let (app, _) = test_app();
        let first = sign_in(&app).await;

        let resp = refresh(&app, &first.refresh_token).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let second: AuthResponse = json_body(resp).await;
        assert_ne!(second.refresh_token, first.refresh_token);

        let replay = refresh(&app, &first.refresh_token).await;
        assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
        let body: ErrorResponse = json_body(replay).await;
        assert_eq!(body.error, "INVALID_TOKEN");
        assert_eq!(body.message, "Please sign in again");

        let unknown: ErrorResponse = json_body(refresh(&app, "never-issued").await).await;
        assert_eq!(unknown.message, body.message);
    }

    #[tokio::test]
    async fn malformed_refresh_body_gets_error_envelope() {
        let (app, _) = test_app();

        let resp = app
            .clone()
            .oneshot(post_json("/auth/refresh", &serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = json_body(resp).await;
        assert_eq!(body.error, "VALIDATION_ERROR");

        let empty = Request::builder()
            .uri("/auth/refresh")
            .method("POST")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(empty).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = json_body(resp).await;
        assert_eq!(body.error, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn logout_always_succeeds_and_revokes_token() {
        let (app, _) = test_app();
        let pair = sign_in(&app).await;

        let resp = app
            .clone()
            .oneshot(post_json(
                "/auth/logout",
                &serde_json::json!({ "refresh_token": pair.refresh_token }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            refresh(&app, &pair.refresh_token).await.status(),
            StatusCode::UNAUTHORIZED
        );

        let empty = Request::builder()
            .uri("/auth/logout")
            .method("POST")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(empty).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn logout_all_requires_authorization() {
        let (app, _) = test_app();

        let req = Request::builder()
            .uri("/auth/logout-all")
            .method("POST")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_all_revokes_every_session() {
        let (app, _) = test_app();
        let laptop = sign_in(&app).await;
        let phone = sign_in(&app).await;

        let req = Request::builder()
            .uri("/auth/logout-all")
            .method("POST")
            .header("Authorization", format!("Bearer {}", phone.access_token))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        for pair in [laptop, phone] {
            assert_eq!(
                refresh(&app, &pair.refresh_token).await.status(),
                StatusCode::UNAUTHORIZED
            );
        }
    }

    #[tokio::test]
    async fn me_returns_profile_for_bearer() {
        let (app, _) = test_app();
        let pair = sign_in(&app).await;

        let req = Request::builder()
            .uri("/auth/me")
            .header("Authorization", format!("Bearer {}", pair.access_token))
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let user: UserInfo = json_body(resp).await;
        assert_eq!(user, pair.user);

        let req = Request::builder()
            .uri("/auth/me")
            .header("Authorization", "Bearer not.a.jwt")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
