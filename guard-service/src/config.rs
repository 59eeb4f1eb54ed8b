use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use jwt_guard::{
    Algorithm, BearerHeader, CookieToken, FirstOf, JwksProvider, JwtConfig, JwtValidator,
    QueryToken, SecretProvider, StaticSecret,
};
use tracing::{info, warn};

const DEFAULT_ALLOWED_ORIGINS: &[&str] = &["http://localhost:3000", "http://localhost:5173"];

/// Where verification keys come from. Exactly one source is configured.
#[derive(Clone)]
pub enum KeySource {
    Jwks { url: String, refresh: Duration },
    HmacSecret(String),
    PublicKeyPem(String),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Jwks { url, refresh } => f
                .debug_struct("Jwks")
                .field("url", url)
                .field("refresh", refresh)
                .finish(),
            KeySource::HmacSecret(_) => f.write_str("HmacSecret(..)"),
            KeySource::PublicKeyPem(_) => f.write_str("PublicKeyPem(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub issuer: String,
    pub audience: Vec<String>,
    pub algorithm: Algorithm,
    pub leeway_seconds: u32,
    pub key_source: KeySource,
    pub token_cookie: Option<String>,
    pub token_query_param: Option<String>,
    pub allowed_origins: Vec<String>,
    pub host: String,
    pub port: u16,
}

/// A validator ready to share across handlers, plus the JWKS provider behind
/// it when keys come from a JWKS endpoint.
pub struct ValidatorHandle {
    pub validator: Arc<JwtValidator>,
    pub jwks: Option<Arc<JwksProvider>>,
}

impl GuardConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let issuer = var("JWT_ISSUER").unwrap_or_default();
        let audience = var("JWT_AUDIENCE")
            .map(|value| split_list(&value))
            .unwrap_or_default();
        let algorithm_name = var("JWT_ALGORITHM").unwrap_or_else(|| "RS256".to_string());
        let algorithm = algorithm_name
            .trim()
            .parse::<Algorithm>()
            .with_context(|| format!("unsupported JWT_ALGORITHM '{algorithm_name}'"))?;
        let leeway_seconds = var("JWT_LEEWAY_SECONDS")
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(0);

        let refresh_secs = var("JWKS_REFRESH_SECONDS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(300);
        let key_source = match (
            var("JWT_JWKS_URL"),
            var("JWT_HMAC_SECRET"),
            var("JWT_PUBLIC_KEY_PEM"),
        ) {
            (Some(url), None, None) => KeySource::Jwks {
                url,
                refresh: Duration::from_secs(refresh_secs.max(60)),
            },
            (None, Some(secret), None) => KeySource::HmacSecret(secret),
            (None, None, Some(pem)) => KeySource::PublicKeyPem(pem),
            (None, None, None) => bail!(
                "one of JWT_JWKS_URL, JWT_HMAC_SECRET or JWT_PUBLIC_KEY_PEM must be set"
            ),
            _ => bail!("only one of JWT_JWKS_URL, JWT_HMAC_SECRET or JWT_PUBLIC_KEY_PEM may be set"),
        };

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|value| split_list(&value))
            .unwrap_or_else(|| {
                DEFAULT_ALLOWED_ORIGINS
                    .iter()
                    .map(|origin| origin.to_string())
                    .collect()
            });

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match var("PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("PORT '{value}' is not a valid port"))?,
            None => 8080,
        };

        Ok(Self {
            issuer,
            audience,
            algorithm,
            leeway_seconds,
            key_source,
            token_cookie: var("JWT_TOKEN_COOKIE"),
            token_query_param: var("JWT_TOKEN_QUERY_PARAM"),
            allowed_origins,
            host,
            port,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("HOST '{}' is not an IP address", self.host))?;
        Ok(SocketAddr::from((ip, self.port)))
    }

    pub fn build_validator(&self) -> Result<ValidatorHandle> {
        let mut jwks = None;
        let provider: Arc<dyn SecretProvider> = match &self.key_source {
            KeySource::Jwks { url, .. } => {
                info!(jwks_url = %url, "configuring JWKS key source");
                let provider = Arc::new(JwksProvider::from_url(url.clone()));
                jwks = Some(provider.clone());
                provider
            }
            KeySource::HmacSecret(secret) => {
                if !is_hmac(self.algorithm) {
                    bail!(
                        "JWT_HMAC_SECRET cannot verify {:?} tokens; set JWT_ALGORITHM to an HS algorithm",
                        self.algorithm
                    );
                }
                Arc::new(StaticSecret::hmac(secret.as_bytes()))
            }
            KeySource::PublicKeyPem(pem) => Arc::new(self.pem_secret(pem.as_bytes())?),
        };

        let config = JwtConfig::new(
            provider,
            self.audience.clone(),
            self.issuer.clone(),
            self.algorithm,
        )
        .with_leeway(self.leeway_seconds);
        if config.issuer().is_none() {
            warn!("JWT_ISSUER not set; issuer claim will not be checked");
        }
        if config.audience().is_empty() {
            warn!("JWT_AUDIENCE not set; audience claim will not be checked");
        }

        let validator = match self.fallback_extractor() {
            Some(extractor) => JwtValidator::with_extractor(config, extractor),
            None => JwtValidator::new(config),
        };
        info!(algorithm = ?self.algorithm, "JWT validator initialised");

        Ok(ValidatorHandle {
            validator: Arc::new(validator),
            jwks,
        })
    }

    fn pem_secret(&self, pem: &[u8]) -> Result<StaticSecret> {
        let secret = match self.algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => StaticSecret::rsa_pem(pem),
            Algorithm::ES256 | Algorithm::ES384 => StaticSecret::ec_pem(pem),
            Algorithm::EdDSA => StaticSecret::ed_pem(pem),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                bail!("JWT_PUBLIC_KEY_PEM cannot verify HMAC tokens; use JWT_HMAC_SECRET")
            }
        };
        secret.context("failed to parse JWT_PUBLIC_KEY_PEM")
    }

    /// Bearer header first, then the configured cookie and query parameter.
    fn fallback_extractor(&self) -> Option<FirstOf> {
        if self.token_cookie.is_none() && self.token_query_param.is_none() {
            return None;
        }

        let mut extractor = FirstOf::new(Vec::new()).or(BearerHeader);
        if let Some(name) = &self.token_cookie {
            extractor = extractor.or(CookieToken::new(name.clone()));
        }
        if let Some(param) = &self.token_query_param {
            extractor = extractor.or(QueryToken::new(param.clone()));
        }
        Some(extractor)
    }
}

fn is_hmac(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
