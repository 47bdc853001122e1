use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::vault::AuthInfo;

pub const TOKEN_HEADER: &str = "X-Vault-Token";

/// Caller identity taken from the `X-Vault-Token` header, falling back to a bearer token.
pub struct Caller(pub AuthInfo);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = if let Some(value) = parts.headers.get(TOKEN_HEADER) {
            value.to_str().ok().map(|s| s.trim().to_string())
        } else if let Some(authz) = parts.headers.get(axum::http::header::AUTHORIZATION) {
            authz
                .to_str()
                .ok()
                .and_then(|s| s.strip_prefix("Bearer ").map(|s| s.trim().to_string()))
        } else {
            None
        };
        let token = token
            .filter(|token| !token.is_empty())
            .ok_or((StatusCode::UNAUTHORIZED, "Missing token".into()))?;
        Ok(Caller(AuthInfo::new(token)))
    }
}
