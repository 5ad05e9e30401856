use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{database::models::User, utils::error::ApiError, AppState};

/// The caller, resolved from the `Authorization: Bearer <session token>` header.
///
/// Rejects missing or unknown sessions with 401 and banned users with 403.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// An authenticated caller who is also an administrator.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;

        let user = state
            .database
            .get_user_by_session(token)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        if user.is_banned {
            return Err(ApiError::Forbidden("This account has been banned"));
        }

        Ok(AuthUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;

        if !user.is_admin {
            return Err(ApiError::Forbidden("Administrator access required"));
        }

        Ok(AdminUser(user))
    }
}
