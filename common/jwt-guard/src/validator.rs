use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::claims::{Claims, ExpectedClaims};
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};
use crate::extract::{BearerHeader, TokenExtractor};
use crate::token::{Header, Token};

/// A token that passed every check, together with its claims.
///
/// Only [`JwtValidator`] can produce one.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    raw: String,
    token: Token,
    claims: Claims,
}

impl VerifiedToken {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

/// Validates bearer tokens on inbound requests.
///
/// Holds no per-request state; share one instance (usually behind an `Arc`)
/// across all handlers.
#[derive(Clone)]
pub struct JwtValidator {
    config: JwtConfig,
    extractor: Arc<dyn TokenExtractor>,
    signature_only: Validation,
}

impl JwtValidator {
    pub fn new(config: JwtConfig) -> Self {
        Self::with_extractor(config, BearerHeader)
    }

    pub fn with_extractor(config: JwtConfig, extractor: impl TokenExtractor + 'static) -> Self {
        let signature_only = signature_only(config.algorithm());
        Self {
            config,
            extractor: Arc::new(extractor),
            signature_only,
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub async fn validate_request(&self, parts: &Parts) -> AuthResult<VerifiedToken> {
        let raw = self.extractor.extract(parts)?;
        self.validate_token(&raw).await
    }

    pub async fn validate_token(&self, raw: &str) -> AuthResult<VerifiedToken> {
        self.validate_token_at(raw, Utc::now()).await
    }

    /// Same as [`validate_token`](Self::validate_token) but checks the
    /// time-bound claims against `now` instead of the wall clock.
    pub async fn validate_token_at(
        &self,
        raw: &str,
        now: DateTime<Utc>,
    ) -> AuthResult<VerifiedToken> {
        match self.run(raw, now).await {
            Ok(verified) => {
                debug!(
                    kid = verified.token.key_id(),
                    sub = verified.claims.subject.as_deref(),
                    "verified JWT successfully"
                );
                Ok(verified)
            }
            Err(err) => {
                if matches!(&err, AuthError::KeyResolution(inner) if inner.is_infrastructure()) {
                    warn!(code = err.code(), error = %err, "JWT key resolution failed");
                } else {
                    debug!(code = err.code(), error = %err, "rejected JWT");
                }
                Err(err)
            }
        }
    }

    async fn run(&self, raw: &str, now: DateTime<Utc>) -> AuthResult<VerifiedToken> {
        let token = Token::parse(raw)?;
        let header = token.header().ok_or(AuthError::NoHeaders)?;
        if token.signatures().len() > 1 {
            return Err(AuthError::MalformedToken(
                "token carries more than one signature".to_string(),
            ));
        }
        self.check_algorithm(header)?;

        let key = self.config.provider().secret(&token).await?;
        let payload: Value = self.verify(&token, &key)?;
        let claims = Claims::try_from(payload)?;

        let leeway = Duration::seconds(i64::from(self.config.leeway_seconds()));
        claims.validate(&ExpectedClaims {
            issuer: self.config.issuer(),
            audience: self.config.audience(),
            now,
            leeway,
        })?;

        Ok(VerifiedToken {
            raw: raw.to_owned(),
            token,
            claims,
        })
    }

    /// Decodes a validated token's payload into an application type.
    ///
    /// Re-resolves the key and re-checks the signature but does not repeat the
    /// claims checks, which `token` has already passed.
    pub async fn claims<T: DeserializeOwned>(&self, token: &VerifiedToken) -> AuthResult<T> {
        let key = self.config.provider().secret(&token.token).await?;
        self.verify(&token.token, &key)
    }

    fn check_algorithm(&self, header: &Header) -> AuthResult<()> {
        let expected = self.config.algorithm();
        match header.algorithm.parse::<Algorithm>() {
            Ok(found) if found == expected => Ok(()),
            _ => Err(AuthError::InvalidAlgorithm {
                expected,
                found: header.algorithm.clone(),
            }),
        }
    }

    fn verify<T: DeserializeOwned>(&self, token: &Token, key: &DecodingKey) -> AuthResult<T> {
        let compact = token.first_compact().ok_or(AuthError::NoHeaders)?;
        let data = decode::<T>(&compact, key, &self.signature_only)?;
        Ok(data.claims)
    }
}

impl fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Signature check pinned to `algorithm`, with every claim check left to [`Claims::validate`].
fn signature_only(algorithm: Algorithm) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::StaticSecret;
    use jsonwebtoken::{encode, EncodingKey, Header as JwtHeader};
    use serde::Deserialize;
    use serde_json::json;

    const SECRET: &[u8] = b"unit-test-secret";

    fn validator() -> JwtValidator {
        let config = JwtConfig::new(
            Arc::new(StaticSecret::hmac(SECRET)),
            ["svc"],
            "example",
            Algorithm::HS256,
        );
        JwtValidator::new(config)
    }

    fn sign(claims: &Value) -> String {
        encode(
            &JwtHeader::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(SECRET),
        )
        .expect("sign token")
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn validator_and_config_are_shareable() {
        assert_send_sync::<JwtValidator>();
        assert_send_sync::<JwtConfig>();
        assert_send_sync::<VerifiedToken>();
    }

    #[test]
    fn signature_only_validation_leaves_claims_alone() {
        let validation = signature_only(Algorithm::RS256);
        assert_eq!(validation.algorithms, vec![Algorithm::RS256]);
        assert!(validation.required_spec_claims.is_empty());
        assert!(!validation.validate_exp);
        assert!(!validation.validate_aud);
    }

    #[tokio::test]
    async fn claims_decodes_application_type_after_validation() {
        #[derive(Deserialize)]
        struct Profile {
            sub: String,
            plan: String,
        }

        let validator = validator();
        let exp = Utc::now().timestamp() + 600;
        let raw = sign(&json!({
            "iss": "example",
            "aud": "svc",
            "sub": "user-1",
            "plan": "pro",
            "exp": exp
        }));

        let verified = validator.validate_token(&raw).await.expect("valid");
        assert_eq!(verified.as_str(), raw);
        assert!(verified.claims().has_audience("svc"));

        let profile: Profile = validator.claims(&verified).await.expect("profile");
        assert_eq!(profile.sub, "user-1");
        assert_eq!(profile.plan, "pro");
    }

    #[tokio::test]
    async fn payload_that_is_not_an_object_is_rejected() {
        let validator = JwtValidator::new(JwtConfig::new(
            Arc::new(StaticSecret::hmac(SECRET)),
            Vec::<String>::new(),
            "",
            Algorithm::HS256,
        ));
        let raw = sign(&json!(["not", "claims"]));
        let err = validator.validate_token(&raw).await.expect_err("reject");
        assert!(matches!(err, AuthError::InvalidJson(_)), "{err:?}");
    }
}
