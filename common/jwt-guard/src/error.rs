use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;
pub type KeyResult<T> = Result<T, KeyError>;

/// Every way a request can fail validation. Messages never carry key
/// material or the raw token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no bearer token found in request")]
    MissingToken,
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("token carries no signature headers")]
    NoHeaders,
    #[error("token algorithm '{found}' does not match expected {expected:?}")]
    InvalidAlgorithm {
        expected: jsonwebtoken::Algorithm,
        found: String,
    },
    #[error("failed to resolve verification key: {0}")]
    KeyResolution(#[source] KeyError),
    #[error("token signature verification failed")]
    InvalidSignature,
    #[error("malformed claim payload: {0}")]
    InvalidJson(String),
    #[error("invalid claim '{0}' with value '{1}'")]
    InvalidClaim(&'static str, String),
    #[error("token claims rejected: {0}")]
    Claims(#[from] ClaimsError),
}

/// Failures raised by a [`SecretProvider`](crate::SecretProvider).
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("token missing kid header")]
    MissingKeyId,
    #[error("no decoding key registered for kid '{0}'")]
    UnknownKeyId(String),
    #[error("token missing iss claim")]
    MissingIssuer,
    #[error("no key source registered for issuer '{0}'")]
    UnknownIssuer(String),
    #[error("failed to parse decoding key '{0}': {1}")]
    KeyParse(String, String),
    #[error("failed to fetch JWKS: {0}")]
    JwksFetch(String),
    #[error("failed to parse JWKS response: {0}")]
    JwksDecode(String),
    #[error("JWKS entry missing key id (kid)")]
    JwksMissingKid,
    #[error("key source unavailable: {0}")]
    Unavailable(String),
}

/// Registered-claim checks that a verified token failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaimsError {
    #[error("issuer {found:?} does not match expected '{expected}'")]
    IssuerMismatch {
        expected: String,
        found: Option<String>,
    },
    #[error("audience does not contain '{missing}'")]
    AudienceMismatch { missing: String },
    #[error("token is not valid yet")]
    NotYetValid,
    #[error("token has expired")]
    Expired,
    #[error("token was issued in the future")]
    IssuedInFuture,
}

impl From<KeyError> for AuthError {
    fn from(value: KeyError) -> Self {
        Self::KeyResolution(value)
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match value.kind() {
            ErrorKind::Json(err) => Self::InvalidJson(err.to_string()),
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => {
                Self::MalformedToken(value.to_string())
            }
            // Bad signatures and keys that cannot serve the pinned algorithm alike.
            _ => Self::InvalidSignature,
        }
    }
}

impl AuthError {
    /// Stable machine-readable code, suitable for log fields and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "AUTH_MISSING_TOKEN",
            AuthError::MalformedToken(_) => "AUTH_MALFORMED_TOKEN",
            AuthError::NoHeaders => "AUTH_NO_HEADERS",
            AuthError::InvalidAlgorithm { .. } => "AUTH_ALGORITHM",
            AuthError::KeyResolution(inner) => inner.code(),
            AuthError::InvalidSignature => "AUTH_SIGNATURE",
            AuthError::InvalidJson(_) | AuthError::InvalidClaim(_, _) => "AUTH_CLAIMS_DECODE",
            AuthError::Claims(inner) => inner.code(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuthError::KeyResolution(inner) if inner.is_infrastructure() => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl KeyError {
    pub fn code(&self) -> &'static str {
        match self {
            KeyError::MissingKeyId | KeyError::UnknownKeyId(_) => "AUTH_KEY",
            KeyError::MissingIssuer | KeyError::UnknownIssuer(_) => "AUTH_ISSUER_KEY",
            KeyError::KeyParse(_, _) => "AUTH_KEY_PARSE",
            KeyError::JwksFetch(_) | KeyError::JwksDecode(_) | KeyError::JwksMissingKid => {
                "AUTH_JWKS"
            }
            KeyError::Unavailable(_) => "AUTH_KEY_UNAVAILABLE",
        }
    }

    /// True when the failure lies with the key source rather than the token.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            KeyError::KeyParse(_, _)
                | KeyError::JwksFetch(_)
                | KeyError::JwksDecode(_)
                | KeyError::JwksMissingKid
                | KeyError::Unavailable(_)
        )
    }
}

impl ClaimsError {
    pub fn code(&self) -> &'static str {
        match self {
            ClaimsError::IssuerMismatch { .. } => "AUTH_ISSUER",
            ClaimsError::AudienceMismatch { .. } => "AUTH_AUDIENCE",
            ClaimsError::NotYetValid => "AUTH_NOT_YET_VALID",
            ClaimsError::Expired => "AUTH_EXPIRED",
            ClaimsError::IssuedInFuture => "AUTH_ISSUED_IN_FUTURE",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
