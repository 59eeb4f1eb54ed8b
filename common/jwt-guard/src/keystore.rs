use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;

use crate::error::{KeyError, KeyResult};
use crate::provider::SecretProvider;
use crate::token::Token;

/// Thread-safe store for decoding keys, indexed by key id.
#[derive(Clone, Default)]
pub struct InMemoryKeyStore {
    inner: Arc<RwLock<HashMap<String, DecodingKey>>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_key(&self, kid: impl Into<String>, key: DecodingKey) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.insert(kid.into(), key);
    }

    pub fn insert_rsa_pem(&self, kid: impl Into<String>, pem: &[u8]) -> KeyResult<()> {
        let kid = kid.into();
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|err| KeyError::KeyParse(kid.clone(), err.to_string()))?;
        self.insert_key(kid, key);
        Ok(())
    }

    pub fn insert_hmac(&self, kid: impl Into<String>, secret: &[u8]) {
        self.insert_key(kid, DecodingKey::from_secret(secret));
    }

    pub fn remove(&self, kid: &str) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.remove(kid).is_some()
    }

    pub fn get(&self, kid: &str) -> Option<DecodingKey> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(kid).cloned()
    }

    pub fn contains(&self, kid: &str) -> bool {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swaps the whole key set in one write, so readers never see a partial rotation.
    pub fn replace_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, DecodingKey)>,
    {
        let fresh: HashMap<String, DecodingKey> = entries.into_iter().collect();
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = fresh;
    }

    pub(crate) fn lookup(&self, token: &Token) -> KeyResult<DecodingKey> {
        let kid = token.key_id().ok_or(KeyError::MissingKeyId)?;
        self.get(kid)
            .ok_or_else(|| KeyError::UnknownKeyId(kid.to_owned()))
    }
}

#[async_trait]
impl SecretProvider for InMemoryKeyStore {
    async fn secret(&self, token: &Token) -> KeyResult<DecodingKey> {
        self.lookup(token)
    }
}
