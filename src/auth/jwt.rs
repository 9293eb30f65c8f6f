use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::auth::clock::Clock;
use crate::db::models::user::User;

pub const DEFAULT_ACCESS_TOKEN_MINUTES: i64 = 15;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Signing key is not configured")]
    MissingSecret,
    #[error("Cannot issue a token for a user without an email")]
    IncompleteUser,
    #[error("Token generation failed: {0}")]
    GenerationFailed(jsonwebtoken::errors::Error),
    #[error("Token verification failed: {0}")]
    VerificationFailed(jsonwebtoken::errors::Error),
    #[error("Token expired")]
    Expired,
}

/// Claims carried by an access token.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Local user id, as a decimal string.
    pub sub: String,
    pub email: String,
    pub name: String,
    /// Subject of the external identity the session was opened with.
    pub subject_id: String,
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct JwtOptions {
    /// Embedded and enforced when set; skipped otherwise.
    pub issuer: Option<String>,
    /// Embedded and enforced when set; skipped otherwise.
    pub audience: Option<String>,
    pub access_token_minutes: i64,
}

impl Default for JwtOptions {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            access_token_minutes: DEFAULT_ACCESS_TOKEN_MINUTES,
        }
    }
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    options: JwtOptions,
    clock: Arc<dyn Clock>,
}

impl JwtManager {
    pub fn new(secret: &str, options: JwtOptions, clock: Arc<dyn Clock>) -> Result<Self, JwtError> {
        if secret.is_empty() {
            return Err(JwtError::MissingSecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        // Expiry is checked against the injected clock in `verify_token`.
        validation.validate_exp = false;
        // `set_issuer`/`set_audience` only compare claims that are present.
        let mut required = vec!["exp", "sub"];
        if let Some(issuer) = &options.issuer {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }
        match &options.audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&required);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            options,
            clock,
        })
    }

    /// Lifetime of an access token, in seconds
    pub fn expires_in_seconds(&self) -> i64 {
        self.options.access_token_minutes * 60
    }

    pub fn generate_access_token(&self, user: &User) -> Result<String, JwtError> {
        if user.email.is_empty() {
            return Err(JwtError::IncompleteUser);
        }

        let now = self.clock.now();
        let exp = (now + Duration::minutes(self.options.access_token_minutes)).timestamp();

        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            name: user.display_name.clone(),
            subject_id: user.subject_id.clone(),
            email_verified: user.email_verified,
            picture: user.avatar_url.clone(),
            iat: now.timestamp(),
            exp,
            iss: self.options.issuer.clone(),
            aud: self.options.audience.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(JwtError::GenerationFailed)
    }

    /// Full verification: signature, issuer and audience when configured, and
    /// expiry with no leeway (a token is dead from the second `exp` is reached).
    pub fn verify_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(JwtError::VerificationFailed)?;

        if self.clock.now().timestamp() >= claims.exp {
            return Err(JwtError::Expired);
        }

        Ok(claims)
    }

    pub fn validate_access_token(&self, token: &str) -> bool {
        match self.verify_token(token) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(reason = %e, "Rejected access token");
                false
            }
        }
    }

    /// Reads `sub` without checking the signature or expiry.
    ///
    /// Only for lookups after `verify_token` succeeded on the same token; never
    /// for authorization.
    pub fn peek_user_id(token: &str) -> Option<i64> {
        #[derive(Deserialize)]
        struct Subject {
            sub: Option<serde_json::Value>,
        }

        let mut segments = token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return None;
        };

        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let subject: Subject = serde_json::from_slice(&bytes).ok()?;
        match subject.sub? {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::{ManualClock, SystemClock};
    use chrono::Utc;

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: 42,
            subject_id: "google-sub-u1".to_string(),
            email: "a@x.com".to_string(),
            display_name: "u1".to_string(),
            avatar_url: None,
            email_verified: true,
            is_active: true,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    fn make_jwt_manager() -> JwtManager {
        JwtManager::new(
            "my_secret_key_for_tests",
            JwtOptions::default(),
            Arc::new(SystemClock),
        )
        .expect("valid secret")
    }

    #[test]
    fn empty_secret_is_refused() {
        let result = JwtManager::new("", JwtOptions::default(), Arc::new(SystemClock));
        assert!(matches!(result, Err(JwtError::MissingSecret)));
    }

    #[test]
    fn generate_and_verify_succeeds_with_valid_token() {
        let jwt = make_jwt_manager();
        let token = jwt
            .generate_access_token(&sample_user())
            .expect("Token generation failed");

        let claims = jwt.verify_token(&token).expect("Token verification failed");

        assert_eq!(claims.user_id(), Some(42));
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.subject_id, "google-sub-u1");
        assert_eq!(claims.exp - claims.iat, 900);
        assert!(jwt.validate_access_token(&token));
    }

    #[test]
    fn token_expires_after_configured_minutes() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let jwt = JwtManager::new("secret", JwtOptions::default(), clock.clone()).unwrap();
        let token = jwt.generate_access_token(&sample_user()).unwrap();

        clock.advance(Duration::minutes(14) + Duration::seconds(59));
        assert!(jwt.validate_access_token(&token));

        clock.advance(Duration::seconds(1));
        assert!(!jwt.validate_access_token(&token));
        assert!(matches!(jwt.verify_token(&token), Err(JwtError::Expired)));
    }

    #[test]
    fn zero_minute_tokens_are_dead_on_arrival() {
        let options = JwtOptions {
            access_token_minutes: 0,
            ..JwtOptions::default()
        };
        let jwt = JwtManager::new("secret", options, Arc::new(ManualClock::new(Utc::now())))
            .unwrap();
        let token = jwt.generate_access_token(&sample_user()).unwrap();

        assert!(!jwt.validate_access_token(&token));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = make_jwt_manager()
            .generate_access_token(&sample_user())
            .unwrap();
        let other = JwtManager::new("another_secret", JwtOptions::default(), Arc::new(SystemClock))
            .unwrap();

        assert!(!other.validate_access_token(&token));
    }

    #[test]
    fn issuer_and_audience_are_enforced_when_configured() {
        let strict = JwtOptions {
            issuer: Some("meetings-api".to_string()),
            audience: Some("meetings-web".to_string()),
            ..JwtOptions::default()
        };
        let jwt = JwtManager::new("secret", strict.clone(), Arc::new(SystemClock)).unwrap();
        let token = jwt.generate_access_token(&sample_user()).unwrap();
        assert!(jwt.validate_access_token(&token));

        let other_audience = JwtOptions {
            audience: Some("someone-else".to_string()),
            ..strict.clone()
        };
        let other = JwtManager::new("secret", other_audience, Arc::new(SystemClock)).unwrap();
        assert!(!other.validate_access_token(&token));

        let other_issuer = JwtOptions {
            issuer: Some("billing-api".to_string()),
            ..strict
        };
        let other = JwtManager::new("secret", other_issuer, Arc::new(SystemClock)).unwrap();
        assert!(!other.validate_access_token(&token));
    }

    #[test]
    fn configured_issuer_and_audience_must_be_present() {
        let unscoped = JwtManager::new("secret", JwtOptions::default(), Arc::new(SystemClock))
            .unwrap();
        let bare = unscoped.generate_access_token(&sample_user()).unwrap();

        let strict = JwtOptions {
            issuer: Some("meetings-api".to_string()),
            audience: Some("meetings-web".to_string()),
            ..JwtOptions::default()
        };
        let jwt = JwtManager::new("secret", strict, Arc::new(SystemClock)).unwrap();
        assert!(!jwt.validate_access_token(&bare));

        let audience_only = JwtOptions {
            audience: Some("meetings-web".to_string()),
            ..JwtOptions::default()
        };
        let jwt = JwtManager::new("secret", audience_only, Arc::new(SystemClock)).unwrap();
        assert!(!jwt.validate_access_token(&bare));

        let issuer_only = JwtOptions {
            issuer: Some("meetings-api".to_string()),
            ..JwtOptions::default()
        };
        let jwt = JwtManager::new("secret", issuer_only, Arc::new(SystemClock)).unwrap();
        assert!(!jwt.validate_access_token(&bare));
    }

    #[test]
    fn verify_token_fails_with_invalid_input() {
        let jwt = make_jwt_manager();

        let result = jwt.verify_token("invalid.token.here");

        assert!(matches!(
            result.unwrap_err(),
            JwtError::VerificationFailed(_)
        ));
        assert!(!jwt.validate_access_token(""));
    }

    #[test]
    fn user_without_email_cannot_get_a_token() {
        let user = User {
            email: String::new(),
            ..sample_user()
        };
        assert!(matches!(
            make_jwt_manager().generate_access_token(&user),
            Err(JwtError::IncompleteUser)
        ));
    }

    #[test]
    fn peek_user_id_reads_sub_without_the_key() {
        let token = make_jwt_manager()
            .generate_access_token(&sample_user())
            .unwrap();

        assert_eq!(JwtManager::peek_user_id(&token), Some(42));
    }

    #[test]
    fn peek_user_id_handles_garbage() {
        assert_eq!(JwtManager::peek_user_id("not-a-jwt"), None);
        assert_eq!(JwtManager::peek_user_id("a.b.c.d"), None);

        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"alice"}"#);
        assert_eq!(JwtManager::peek_user_id(&format!("e30.{payload}.sig")), None);

        let payload = URL_SAFE_NO_PAD.encode(br#"{"email":"a@x.com"}"#);
        assert_eq!(JwtManager::peek_user_id(&format!("e30.{payload}.sig")), None);
    }
}
