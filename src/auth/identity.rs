//! Verification of third-party identity assertions (Google Sign-In ID tokens).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use tokio::sync::RwLock;

pub const GOOGLE_CERTS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
pub const GOOGLE_ISSUERS: [&str; 2] = ["https://accounts.google.com", "accounts.google.com"];
const JWKS_TTL: Duration = Duration::from_secs(3600);

/// Trusted identity payload handed to the session service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    pub subject_id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity token rejected: {0}")]
    Rejected(String),
    #[error("Identity provider unavailable: {0}")]
    ProviderUnavailable(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<IdentityClaims, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct GoogleIdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

impl GoogleIdTokenClaims {
    fn into_identity(self) -> Result<IdentityClaims, IdentityError> {
        let email = self
            .email
            .filter(|e| !e.is_empty())
            .ok_or_else(|| IdentityError::Rejected("token does not contain an email".into()))?;
        let display_name = self.name.unwrap_or_else(|| email.clone());

        Ok(IdentityClaims {
            subject_id: self.sub,
            email,
            display_name,
            avatar_url: self.picture,
            email_verified: self.email_verified.unwrap_or(false),
        })
    }
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Verifies Google ID tokens against Google's published signing keys.
pub struct GoogleIdentityVerifier {
    client_id: String,
    certs_url: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedKeys>>,
}

impl GoogleIdentityVerifier {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_certs_url(client_id, GOOGLE_CERTS_URL)
    }

    pub fn with_certs_url(client_id: impl Into<String>, certs_url: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            certs_url: certs_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            cache: RwLock::new(None),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_required_spec_claims(&["exp", "aud", "iss", "sub"]);
        validation
    }

    async fn fetch_keys(&self) -> Result<JwkSet, IdentityError> {
        let keys = self
            .http
            .get(&self.certs_url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| IdentityError::ProviderUnavailable(e.to_string()))?
            .json::<JwkSet>()
            .await
            .map_err(|e| IdentityError::ProviderUnavailable(e.to_string()))?;

        tracing::debug!(count = keys.keys.len(), "Fetched identity provider signing keys");
        Ok(keys)
    }

    /// Returns the decoding key for `kid`, refreshing the cached key set when it is
    /// stale or does not know the id (Google rotates keys regularly).
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref()
                && cached.fetched_at.elapsed() < JWKS_TTL
                && let Some(jwk) = cached.keys.find(kid)
            {
                return DecodingKey::from_jwk(jwk)
                    .map_err(|e| IdentityError::Rejected(e.to_string()));
            }
        }

        let keys = self.fetch_keys().await?;
        let key = keys
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| IdentityError::Rejected(e.to_string()))?
            .ok_or_else(|| IdentityError::Rejected("unknown signing key".into()))?;

        *self.cache.write().await = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        Ok(key)
    }
}

#[async_trait]
impl IdentityVerifier for GoogleIdentityVerifier {
    async fn verify(&self, id_token: &str) -> Result<IdentityClaims, IdentityError> {
        if id_token.is_empty() {
            return Err(IdentityError::Rejected("empty token".into()));
        }

        let header = decode_header(id_token).map_err(|e| IdentityError::Rejected(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::Rejected("token header has no key id".into()))?;
        let key = self.decoding_key(&kid).await?;

        let claims = decode::<GoogleIdTokenClaims>(id_token, &key, &self.validation())
            .map_err(|e| IdentityError::Rejected(e.to_string()))?
            .claims;

        claims.into_identity()
    }
}
