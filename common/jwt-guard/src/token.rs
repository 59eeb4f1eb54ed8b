use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AuthError, AuthResult};

/// Protected JOSE header of one signature.
///
/// `algorithm` is the literal `alg` string from the token, so values the
/// verifier does not support (including `none`) survive parsing and can be
/// rejected by the algorithm check.
#[derive(Debug, Clone)]
pub struct Header {
    pub algorithm: String,
    pub key_id: Option<String>,
    pub token_type: Option<String>,
    pub content_type: Option<String>,
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct HeaderRepr {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default)]
    typ: Option<String>,
    #[serde(default)]
    cty: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<HeaderRepr> for Header {
    fn from(value: HeaderRepr) -> Self {
        Self {
            algorithm: value.alg,
            key_id: value.kid,
            token_type: value.typ,
            content_type: value.cty,
            extra: value.extra,
        }
    }
}

/// One signature over the payload, with its encoded segments kept verbatim.
#[derive(Debug, Clone)]
pub struct Signature {
    header: Header,
    protected: String,
    signature: String,
}

impl Signature {
    pub fn header(&self) -> &Header {
        &self.header
    }
}

/// Structurally parsed, signature-unverified JWS.
///
/// Nothing read from a `Token` is authenticated. It exists so the validator
/// can check the declared algorithm and so key resolution can look at `kid`
/// or `iss` before the signature has been checked.
#[derive(Debug, Clone)]
pub struct Token {
    signatures: Vec<Signature>,
    payload_segment: String,
    payload: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct JsonSerialization {
    payload: String,
    #[serde(default)]
    signatures: Option<Vec<JsonSignature>>,
    #[serde(default)]
    protected: Option<String>,
    #[serde(default)]
    signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonSignature {
    #[serde(default)]
    protected: Option<String>,
    signature: String,
}

impl Token {
    /// Parses either the compact serialization or the JWS JSON serialization
    /// (flattened or general).
    pub fn parse(raw: &str) -> AuthResult<Self> {
        let raw = raw.trim();
        if raw.starts_with('{') {
            Self::parse_json(raw)
        } else {
            Self::parse_compact(raw)
        }
    }

    fn parse_compact(raw: &str) -> AuthResult<Self> {
        let mut segments = raw.split('.');
        let (Some(protected), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(malformed("compact token must have three segments"));
        };

        let signature = Signature::parse(protected, signature)?;
        Self::assemble(payload, vec![signature])
    }

    fn parse_json(raw: &str) -> AuthResult<Self> {
        let repr: JsonSerialization =
            serde_json::from_str(raw).map_err(|err| malformed(&err.to_string()))?;

        let signatures = match (repr.signatures, repr.signature) {
            (Some(_), Some(_)) => {
                return Err(malformed("token mixes general and flattened serialization"));
            }
            (Some(entries), None) => entries
                .into_iter()
                .map(|entry| Signature::parse_optional(entry.protected, &entry.signature))
                .collect::<AuthResult<Vec<_>>>()?,
            (None, Some(signature)) => {
                vec![Signature::parse_optional(repr.protected, &signature)?]
            }
            (None, None) => return Err(malformed("token has no signature member")),
        };

        Self::assemble(&repr.payload, signatures)
    }

    fn assemble(payload_segment: &str, signatures: Vec<Signature>) -> AuthResult<Self> {
        let payload = decode_segment(payload_segment, "payload")?;
        Ok(Self {
            signatures,
            payload_segment: payload_segment.to_owned(),
            payload,
        })
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn headers(&self) -> impl Iterator<Item = &Header> {
        self.signatures.iter().map(Signature::header)
    }

    /// Header of the first signature, the one the validator checks.
    pub fn header(&self) -> Option<&Header> {
        self.signatures.first().map(Signature::header)
    }

    pub fn key_id(&self) -> Option<&str> {
        self.header().and_then(|header| header.key_id.as_deref())
    }

    /// Deserializes the payload without any verification.
    ///
    /// Only for choosing a verification key; never for authorization.
    pub fn unverified_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Unverified `iss` claim, if the payload is a JSON object carrying one.
    pub fn unverified_issuer(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct IssuerOnly {
            iss: Option<String>,
        }

        self.unverified_payload::<IssuerOnly>()
            .ok()
            .and_then(|claims| claims.iss)
    }

    /// Compact form of the first signature, as consumed by `jsonwebtoken`.
    pub(crate) fn first_compact(&self) -> Option<String> {
        self.signatures.first().map(|signature| {
            format!(
                "{}.{}.{}",
                signature.protected, self.payload_segment, signature.signature
            )
        })
    }
}

impl Signature {
    fn parse(protected: &str, signature: &str) -> AuthResult<Self> {
        let header_bytes = decode_segment(protected, "header")?;
        let repr: HeaderRepr = serde_json::from_slice(&header_bytes)
            .map_err(|err| malformed(&format!("invalid header: {err}")))?;
        decode_segment(signature, "signature")?;

        Ok(Self {
            header: repr.into(),
            protected: protected.to_owned(),
            signature: signature.to_owned(),
        })
    }

    fn parse_optional(protected: Option<String>, signature: &str) -> AuthResult<Self> {
        let protected =
            protected.ok_or_else(|| malformed("signature has no protected header"))?;
        Self::parse(&protected, signature)
    }
}

fn decode_segment(segment: &str, what: &str) -> AuthResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| malformed(&format!("{what} is not base64url: {err}")))
}

fn malformed(reason: &str) -> AuthError {
    AuthError::MalformedToken(reason.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encode(value: &Value) -> String {
        URL_SAFE_NO_PAD.encode(value.to_string())
    }

    fn compact(header: Value, payload: Value) -> String {
        format!("{}.{}.c2ln", encode(&header), encode(&payload))
    }

    #[test]
    fn parses_compact_token_headers() {
        let raw = compact(
            json!({"alg": "HS256", "kid": "k1", "typ": "JWT", "x5t": "thumb"}),
            json!({"iss": "example"}),
        );
        let token = Token::parse(&raw).expect("parse");

        assert_eq!(token.signatures().len(), 1);
        let header = token.header().expect("header");
        assert_eq!(header.algorithm, "HS256");
        assert_eq!(header.key_id.as_deref(), Some("k1"));
        assert_eq!(header.token_type.as_deref(), Some("JWT"));
        assert_eq!(header.extra.get("x5t"), Some(&json!("thumb")));
        assert_eq!(token.unverified_issuer().as_deref(), Some("example"));
    }

    #[test]
    fn keeps_unsupported_algorithm_names() {
        let raw = format!(
            "{}.{}.",
            encode(&json!({"alg": "none"})),
            encode(&json!({"sub": "x"}))
        );
        let token = Token::parse(&raw).expect("alg none is structurally valid");
        assert_eq!(token.header().unwrap().algorithm, "none");
    }

    #[test]
    fn rejects_wrong_segment_count() {
        for raw in ["abc", "a.b", "a.b.c.d", ""] {
            let err = Token::parse(raw).expect_err("should reject");
            assert!(matches!(err, AuthError::MalformedToken(_)), "{raw}: {err:?}");
        }
    }

    #[test]
    fn rejects_header_without_alg() {
        let raw = compact(json!({"typ": "JWT"}), json!({}));
        let err = Token::parse(&raw).expect_err("should reject");
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[test]
    fn rejects_non_base64_segments() {
        let raw = format!("{}.***.sig", encode(&json!({"alg": "HS256"})));
        let err = Token::parse(&raw).expect_err("should reject");
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[test]
    fn general_json_serialization_may_have_no_signatures() {
        let raw = json!({"payload": encode(&json!({"sub": "x"})), "signatures": []}).to_string();
        let token = Token::parse(&raw).expect("parse");
        assert!(token.header().is_none());
        assert!(token.first_compact().is_none());
    }

    #[test]
    fn flattened_json_serialization_matches_compact_form() {
        let protected = encode(&json!({"alg": "HS256"}));
        let payload = encode(&json!({"sub": "x"}));
        let raw = json!({
            "payload": payload,
            "protected": protected,
            "signature": "c2ln"
        })
        .to_string();

        let token = Token::parse(&raw).expect("parse");
        assert_eq!(
            token.first_compact().unwrap(),
            format!("{protected}.{payload}.c2ln")
        );
    }

    #[test]
    fn json_signature_requires_protected_header() {
        let raw = json!({
            "payload": encode(&json!({})),
            "signatures": [{"header": {"alg": "HS256"}, "signature": "c2ln"}]
        })
        .to_string();
        let err = Token::parse(&raw).expect_err("should reject");
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }
}
