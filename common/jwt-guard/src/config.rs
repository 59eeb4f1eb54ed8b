use std::fmt;
use std::sync::Arc;

use jsonwebtoken::Algorithm;

use crate::provider::SecretProvider;

/// Runtime configuration for JWT validation.
///
/// Immutable once built; clones share the same key source.
#[derive(Clone)]
pub struct JwtConfig {
    provider: Arc<dyn SecretProvider>,
    issuer: Option<String>,
    audience: Vec<String>,
    algorithm: Algorithm,
    leeway_seconds: u32,
}

impl JwtConfig {
    /// An empty `issuer` or `audience` disables that check. No leeway by default.
    pub fn new<I, A>(
        provider: Arc<dyn SecretProvider>,
        audience: I,
        issuer: impl Into<String>,
        algorithm: Algorithm,
    ) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let issuer = issuer.into();
        let audience = audience
            .into_iter()
            .map(Into::into)
            .filter(|value: &String| !value.is_empty())
            .collect();

        Self {
            provider,
            issuer: (!issuer.is_empty()).then_some(issuer),
            audience,
            algorithm,
            leeway_seconds: 0,
        }
    }

    /// Allowable clock skew in seconds when checking exp/nbf/iat.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn provider(&self) -> &Arc<dyn SecretProvider> {
        &self.provider
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn leeway_seconds(&self) -> u32 {
        self.leeway_seconds
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("algorithm", &self.algorithm)
            .field("leeway_seconds", &self.leeway_seconds)
            .finish_non_exhaustive()
    }
}
