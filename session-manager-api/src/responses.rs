use serde::{Deserialize, Serialize};

pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// Profile fields returned alongside a token pair
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub id: i64,
    pub email: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub email_verified: bool,
}

/// Token pair issued on sign-in and on every refresh
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Lifetime of `access_token`, in seconds
    pub expires_in: i64,
    pub user: UserInfo,
}

impl AuthResponse {
    pub fn bearer(
        access_token: String,
        refresh_token: String,
        expires_in: i64,
        user: UserInfo,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: TOKEN_TYPE_BEARER.to_string(),
            expires_in,
            user,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> UserInfo {
        UserInfo {
            id: 42,
            email: "a@x.com".to_string(),
            display_name: "u1".to_string(),
            avatar_url: None,
            email_verified: true,
        }
    }

    #[test]
    fn bearer_sets_token_type() {
        let response = AuthResponse::bearer("a".into(), "r".into(), 900, sample_user());
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 900);
    }

    #[test]
    fn serialization_omits_missing_avatar() {
        let json = serde_json::to_string(&sample_user()).unwrap();
        assert!(!json.contains("avatar_url"));
        assert!(json.contains("\"display_name\":\"u1\""));
    }

    #[test]
    fn logout_request_accepts_empty_body() {
        let request: LogoutRequest = serde_json::from_str("{}").unwrap();
        assert!(request.refresh_token.is_none());
    }
}
