use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use tracing::warn;

use super::error::ApiError;
use super::routes::AppState;
use crate::bridge::accounts::authenticate;
use crate::db::models::Account;
use crate::utils::hash::hash_api_key;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Account credential from `X-API-Key` or `Authorization: Bearer`.
fn presented_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(key.trim().to_string());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|key| key.trim().to_string())
}

/// The account behind the request's API key.
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount(pub Account);

impl FromRequestParts<AppState> for AuthenticatedAccount {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let key = presented_api_key(&parts.headers)
            .filter(|key| !key.is_empty())
            .ok_or_else(ApiError::unauthorized)?;
        let account = authenticate(&state.db, &key)
            .await?
            .ok_or_else(ApiError::unauthorized)?;
        Ok(AuthenticatedAccount(account))
    }
}

/// Marker for requests carrying the configured admin key. Without a
/// configured key every request is refused.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let denied = || ApiError::new(StatusCode::UNAUTHORIZED, "Admin authentication required");

        let Some(expected) = state.admin_key.as_deref().filter(|k| !k.is_empty()) else {
            warn!("Admin request refused: no admin key configured");
            return Err(denied());
        };
        let presented = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(denied)?;

        if hash_api_key(presented) != hash_api_key(expected) {
            return Err(denied());
        }
        Ok(AdminAuth)
    }
}
