//! Caller identity and admin gating.
//!
//! Caller bearer tokens are HS256 JWTs minted by an external auth service.
//! Only `sub` (user id) and `role` are read; `exp` is honoured when present.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, Span};

use crate::error::ServerError;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// The authenticated caller, inserted into request extensions by
/// [`require_user`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
    pub role: Option<String>,
}

fn bearer(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

pub fn decode_user(token: &str, secret: &str) -> Result<AuthUser, ServerError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| {
            debug!(error = %e, "rejected bearer token");
            ServerError::Unauthorized("invalid token".into())
        })?;

    if data.claims.sub.trim().is_empty() {
        return Err(ServerError::Unauthorized("token has no subject".into()));
    }
    Ok(AuthUser {
        id: data.claims.sub,
        role: data.claims.role,
    })
}

/// Rejects requests without a valid caller token.
pub async fn require_user(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer(&req) else {
        return ServerError::Unauthorized("missing bearer token".into()).into_response();
    };
    match decode_user(token, &state.config.jwt_secret) {
        Ok(user) => {
            Span::current().record("user_id", user.id.as_str());
            debug!(role = user.role.as_deref().unwrap_or("-"), "caller authenticated");
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ServerError::Unauthorized("missing bearer token".into()))
    }
}

/// Guards `/admin` with `GRADIENT_ADMIN_TOKEN`. Open when the token is unset.
pub async fn check_management_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.config.admin_token.as_deref() {
        match bearer(&req) {
            Some(token) if token == expected => {}
            _ => return ServerError::Unauthorized("unauthorised".into()).into_response(),
        }
    }
    next.run(req).await
}

#[cfg(test)]
pub(crate) fn issue_token(secret: &str, sub: &str) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};
    let claims = Claims {
        sub: sub.into(),
        role: Some("user".into()),
        exp: None,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("encode test token")
}
