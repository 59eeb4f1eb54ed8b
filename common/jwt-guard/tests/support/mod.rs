#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use jwt_guard::{JwtConfig, JwtValidator, KeyResult, SecretProvider, Token};
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::rand_core::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};

pub const SECRET: &[u8] = b"integration-test-secret";
pub const ISSUER: &str = "example";
pub const AUDIENCE: &str = "svc";

/// Provider handing out `key` while counting how often it was asked.
pub struct CountingProvider {
    key: DecodingKey,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(key: DecodingKey) -> Arc<Self> {
        Arc::new(Self {
            key,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn hmac() -> Arc<Self> {
        Self::new(DecodingKey::from_secret(SECRET))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SecretProvider for CountingProvider {
    async fn secret(&self, _token: &Token) -> KeyResult<DecodingKey> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.key.clone())
    }
}

pub fn validator_with(provider: Arc<CountingProvider>, algorithm: Algorithm) -> JwtValidator {
    JwtValidator::new(JwtConfig::new(provider, [AUDIENCE], ISSUER, algorithm))
}

pub fn now() -> i64 {
    Utc::now().timestamp()
}

pub fn sign_hs256(claims: &Value) -> String {
    sign_with(Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(SECRET))
}

pub fn sign_with(header: Header, claims: &Value, key: &EncodingKey) -> String {
    encode(&header, claims, key).expect("sign token")
}

pub struct RsaKeys {
    pub encoding: EncodingKey,
    pub public_pem: String,
    pub modulus: String,
    pub exponent: String,
}

impl RsaKeys {
    /// JWK entry publishing this key as a signing key under `kid`.
    pub fn jwk(&self, kid: &str) -> Value {
        json!({
            "kid": kid,
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "n": self.modulus,
            "e": self.exponent
        })
    }
}

pub fn generate_rsa() -> RsaKeys {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("key generation");
    let private_pem = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .expect("private pem");
    let public_key = private_key.to_public_key();
    let public_pem = public_key
        .to_pkcs1_pem(LineEnding::LF)
        .expect("public pem");

    RsaKeys {
        encoding: EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("encoding key"),
        public_pem,
        modulus: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
        exponent: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
    }
}
