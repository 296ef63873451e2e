use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use cine_core::identity::SessionUser;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, state::AppState};

/// Claims of the session token minted by the identity provider.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: usize,
}

impl From<SessionClaims> for SessionUser {
    fn from(claims: SessionClaims) -> Self {
        SessionUser {
            user_id: claims.sub,
            email: claims.email,
            name: claims.name,
        }
    }
}

/// Attaches a [`SessionUser`] when a bearer token is present.
///
/// No `Authorization` header means an anonymous request. A header that is
/// malformed, expired or badly signed is refused with 401.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(header) = req.headers().get(AUTHORIZATION) else {
        return Ok(next.run(req).await);
    };

    let token = header
        .to_str()
        .ok()
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| AppError::AuthenticationError("Malformed Authorization header".to_string()))?;

    let token_data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("Rejected session token: {}", e);
        AppError::AuthenticationError("Invalid session token".to_string())
    })?;

    let user: SessionUser = token_data.claims.into();
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

/// Entitlement reads are limited to the signed-in owner.
pub fn require_owner(session: Option<&SessionUser>, user_id: &str) -> Result<(), AppError> {
    match session {
        None => Err(AppError::AuthenticationError("Sign in required".to_string())),
        Some(user) if user.user_id != user_id => Err(AppError::AuthorizationError(
            "Entitlements of another user".to_string(),
        )),
        Some(_) => Ok(()),
    }
}
