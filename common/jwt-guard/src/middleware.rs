use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;

use crate::claims::Claims;
use crate::error::AuthError;
use crate::validator::{JwtValidator, VerifiedToken};

/// Verified JWT attached to a request.
///
/// Reuses the result of [`require_jwt`] when the middleware ran, otherwise
/// validates the request with the `Arc<JwtValidator>` found in router state.
#[derive(Debug, Clone)]
pub struct AuthContext {
    verified: VerifiedToken,
}

impl AuthContext {
    pub fn claims(&self) -> &Claims {
        self.verified.claims()
    }

    pub fn token(&self) -> &str {
        self.verified.as_str()
    }

    pub fn verified(&self) -> &VerifiedToken {
        &self.verified
    }

    pub fn into_claims(self) -> Claims {
        self.verified.into_claims()
    }
}

impl From<VerifiedToken> for AuthContext {
    fn from(verified: VerifiedToken) -> Self {
        Self { verified }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<JwtValidator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(existing) = parts.extensions.get::<AuthContext>() {
            return Ok(existing.clone());
        }

        let validator = Arc::<JwtValidator>::from_ref(state);
        let verified = validator.validate_request(parts).await?;
        Ok(Self::from(verified))
    }
}

/// Middleware rejecting requests without a valid token.
///
/// Install with `axum::middleware::from_fn_with_state(validator, require_jwt)`;
/// handlers behind it can take [`AuthContext`] or `Extension<AuthContext>`.
pub async fn require_jwt(
    State(validator): State<Arc<JwtValidator>>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let (mut parts, body) = request.into_parts();
    let verified = validator.validate_request(&parts).await?;
    parts.extensions.insert(AuthContext::from(verified));
    Ok(next.run(Request::from_parts(parts, body)).await)
}
