//! Request-time JWT validation.
//!
//! [`JwtValidator`] extracts a bearer token, pins the signing algorithm,
//! resolves the verification key through a [`SecretProvider`], verifies the
//! signature and checks the registered claims. [`require_jwt`] and
//! [`AuthContext`] plug it into axum.

pub mod claims;
pub mod config;
pub mod error;
pub mod extract;
pub mod jwks;
pub mod keystore;
pub mod middleware;
pub mod provider;
pub mod token;
pub mod validator;

pub use claims::{Claims, ExpectedClaims};
pub use config::JwtConfig;
pub use error::{AuthError, AuthResult, ClaimsError, KeyError, KeyResult};
pub use extract::{BearerHeader, CookieToken, FirstOf, QueryToken, TokenExtractor};
pub use jsonwebtoken::{Algorithm, DecodingKey};
pub use jwks::{JwksFetcher, JwksProvider};
pub use keystore::InMemoryKeyStore;
pub use middleware::{require_jwt, AuthContext};
pub use provider::{IssuerRouter, SecretProvider, StaticSecret};
pub use token::{Header, Signature, Token};
pub use validator::{JwtValidator, VerifiedToken};
