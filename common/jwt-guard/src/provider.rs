use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use tracing::debug;

use crate::error::{KeyError, KeyResult};
use crate::token::Token;

/// Resolves the key a token's signature must be verified with.
///
/// # Trust boundary
///
/// `secret` runs *before* the signature is checked. The header (`kid`) and
/// the payload (`iss`, ...) visible through `token` are attacker-controlled
/// at this point: use them to pick a key, never to make an authorization
/// decision. The validator has already pinned the algorithm by the time this
/// is called.
///
/// Implementations may suspend (network key sets) and must be safe to call
/// concurrently; any caching or retry policy is theirs to own.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn secret(&self, token: &Token) -> KeyResult<DecodingKey>;
}

#[async_trait]
impl<F> SecretProvider for F
where
    F: Fn(&Token) -> KeyResult<DecodingKey> + Send + Sync,
{
    async fn secret(&self, token: &Token) -> KeyResult<DecodingKey> {
        self(token)
    }
}

/// A single fixed key, whatever the token says.
#[derive(Clone)]
pub struct StaticSecret {
    key: DecodingKey,
}

impl StaticSecret {
    pub fn new(key: DecodingKey) -> Self {
        Self { key }
    }

    /// Shared HMAC secret.
    pub fn hmac(secret: &[u8]) -> Self {
        Self::new(DecodingKey::from_secret(secret))
    }

    pub fn hmac_base64(secret: &str) -> KeyResult<Self> {
        DecodingKey::from_base64_secret(secret)
            .map(Self::new)
            .map_err(|err| KeyError::KeyParse("static".to_string(), err.to_string()))
    }

    pub fn rsa_pem(pem: &[u8]) -> KeyResult<Self> {
        DecodingKey::from_rsa_pem(pem)
            .map(Self::new)
            .map_err(|err| KeyError::KeyParse("static".to_string(), err.to_string()))
    }

    pub fn ec_pem(pem: &[u8]) -> KeyResult<Self> {
        DecodingKey::from_ec_pem(pem)
            .map(Self::new)
            .map_err(|err| KeyError::KeyParse("static".to_string(), err.to_string()))
    }

    pub fn ed_pem(pem: &[u8]) -> KeyResult<Self> {
        DecodingKey::from_ed_pem(pem)
            .map(Self::new)
            .map_err(|err| KeyError::KeyParse("static".to_string(), err.to_string()))
    }
}

#[async_trait]
impl SecretProvider for StaticSecret {
    async fn secret(&self, _token: &Token) -> KeyResult<DecodingKey> {
        Ok(self.key.clone())
    }
}

/// Delegates to a per-issuer provider chosen by the token's unverified `iss`.
///
/// Signature verification with the chosen provider's key is what ties the
/// issuer to the token; the expected-issuer claim check still applies.
#[derive(Clone, Default)]
pub struct IssuerRouter {
    routes: HashMap<String, Arc<dyn SecretProvider>>,
    fallback: Option<Arc<dyn SecretProvider>>,
}

impl IssuerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, issuer: impl Into<String>, provider: Arc<dyn SecretProvider>) -> Self {
        self.routes.insert(issuer.into(), provider);
        self
    }

    /// Provider used for issuers with no explicit route.
    pub fn fallback(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn issuers(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

#[async_trait]
impl SecretProvider for IssuerRouter {
    async fn secret(&self, token: &Token) -> KeyResult<DecodingKey> {
        let issuer = token.unverified_issuer().ok_or(KeyError::MissingIssuer)?;

        let provider = match self.routes.get(&issuer) {
            Some(provider) => provider,
            None => self
                .fallback
                .as_ref()
                .ok_or_else(|| KeyError::UnknownIssuer(issuer.clone()))?,
        };

        debug!(issuer = %issuer, "resolving key by issuer");
        provider.secret(token).await
    }
}
