use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::{JwkSet, PublicKeyUse};
use jsonwebtoken::DecodingKey;
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::{KeyError, KeyResult};
use crate::keystore::InMemoryKeyStore;
use crate::provider::SecretProvider;
use crate::token::Token;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct JwksFetcher {
    client: Client,
    url: String,
}

impl JwksFetcher {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                warn!(error = %err, "JWKS client build failed; using defaults without timeout");
                Client::new()
            });
        Self::with_client(client, url)
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Downloads the key set and converts every signing key to a `DecodingKey`.
    pub async fn fetch(&self) -> KeyResult<Vec<(String, DecodingKey)>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| KeyError::JwksFetch(err.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyError::JwksFetch(format!(
                "HTTP {} from {}",
                response.status(),
                self.url
            )));
        }

        let body: JwkSet = response
            .json()
            .await
            .map_err(|err| KeyError::JwksDecode(err.to_string()))?;

        let mut keys = Vec::with_capacity(body.keys.len());
        for jwk in body.keys.iter() {
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }

            let kid = jwk.common.key_id.clone().ok_or(KeyError::JwksMissingKid)?;
            let key = DecodingKey::from_jwk(jwk)
                .map_err(|err| KeyError::KeyParse(kid.clone(), err.to_string()))?;
            keys.push((kid, key));
        }

        Ok(keys)
    }
}

/// Key store fed from a JWKS endpoint.
///
/// An unknown `kid` triggers one refresh (at most one in flight, and no more
/// often than the minimum refresh interval) before the lookup is retried.
pub struct JwksProvider {
    fetcher: JwksFetcher,
    store: InMemoryKeyStore,
    min_refresh_interval: Duration,
    last_refresh: Mutex<Option<Instant>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl JwksProvider {
    pub fn new(fetcher: JwksFetcher) -> Self {
        Self {
            fetcher,
            store: InMemoryKeyStore::new(),
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            last_refresh: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new(JwksFetcher::new(url))
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    pub fn fetcher(&self) -> &JwksFetcher {
        &self.fetcher
    }

    pub fn store(&self) -> &InMemoryKeyStore {
        &self.store
    }

    /// Fetches the key set and replaces the store. Returns the number of keys loaded.
    ///
    /// An empty set leaves the current keys in place.
    pub async fn refresh(&self) -> KeyResult<usize> {
        let _gate = self.refresh_gate.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> KeyResult<usize> {
        self.mark_refreshed();
        let keys = self.fetcher.fetch().await?;
        let count = keys.len();
        if count > 0 {
            self.store.replace_all(keys);
            info!(count, jwks_url = %self.fetcher.url(), "loaded JWKS keys");
        } else {
            warn!(jwks_url = %self.fetcher.url(), "JWKS endpoint returned no signing keys");
        }
        Ok(count)
    }

    fn mark_refreshed(&self) {
        let mut last = self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *last = Some(Instant::now());
    }

    fn refresh_allowed(&self) -> bool {
        let last = self
            .last_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) => at.elapsed() >= self.min_refresh_interval,
            None => true,
        }
    }
}

#[async_trait]
impl SecretProvider for JwksProvider {
    async fn secret(&self, token: &Token) -> KeyResult<DecodingKey> {
        let kid = token.key_id().ok_or(KeyError::MissingKeyId)?;
        if let Some(key) = self.store.get(kid) {
            return Ok(key);
        }

        let _gate = self.refresh_gate.lock().await;

        // Another request may have refreshed while this one waited.
        if let Some(key) = self.store.get(kid) {
            return Ok(key);
        }

        if !self.refresh_allowed() {
            debug!(kid, "unknown kid, JWKS refresh rate limited");
            return Err(KeyError::UnknownKeyId(kid.to_owned()));
        }

        debug!(kid, "unknown kid, refreshing JWKS");
        self.refresh_locked().await?;
        self.store.lookup(token)
    }
}
