use serde::{Deserialize, Serialize};

// -------- REQUEST DTOs --------

/// Google Sign-In credential posted by the frontend
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GoogleLoginRequest {
    pub id_token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}
