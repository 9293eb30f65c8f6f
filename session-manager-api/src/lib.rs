//! # session-manager-api
//!
//! Shared API types for the session-manager service.
//! This crate is designed to be WASM-compatible and can be used in both
//! backend (Rust) and frontend (WASM/TypeScript via wasm-bindgen) applications.
//!
//! ## Features
//!
//! - Request DTOs (GoogleLoginRequest, RefreshTokenRequest, LogoutRequest)
//! - Response DTOs (AuthResponse, UserInfo)
//! - Error response format (ErrorResponse)
//!
//! ## Example
//!
//! ```rust
//! use session_manager_api::RefreshTokenRequest;
//!
//! let request = RefreshTokenRequest {
//!     refresh_token: "opaque-refresh-token".to_string(),
//! };
//! ```

pub mod error;
pub mod requests;
pub mod responses;

// Re-exports for convenient access
pub use error::ErrorResponse;
pub use requests::*;
pub use responses::*;
