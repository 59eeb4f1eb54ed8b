use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult, ClaimsError};

/// Registered claims of a token whose signature has been verified.
#[derive(Debug, Clone, Serialize)]
pub struct Claims {
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub audience: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub not_before: Option<DateTime<Utc>>,
    pub issued_at: Option<DateTime<Utc>>,
    pub token_id: Option<String>,
    pub raw: serde_json::Value,
}

impl Claims {
    /// Deserializes the full payload into an application-specific type.
    pub fn custom<T: DeserializeOwned>(&self) -> AuthResult<T> {
        serde_json::from_value(self.raw.clone())
            .map_err(|err| AuthError::InvalidJson(err.to_string()))
    }

    pub fn has_audience(&self, audience: &str) -> bool {
        self.audience.iter().any(|value| value == audience)
    }

    /// Checks issuer, audience and the time-bound claims.
    ///
    /// Every configured audience must be present in the token's audience set.
    pub fn validate(&self, expected: &ExpectedClaims<'_>) -> Result<(), ClaimsError> {
        if let Some(issuer) = expected.issuer {
            if self.issuer.as_deref() != Some(issuer) {
                return Err(ClaimsError::IssuerMismatch {
                    expected: issuer.to_owned(),
                    found: self.issuer.clone(),
                });
            }
        }

        if let Some(missing) = expected
            .audience
            .iter()
            .find(|audience| !self.has_audience(audience))
        {
            return Err(ClaimsError::AudienceMismatch {
                missing: missing.clone(),
            });
        }

        let now = expected.now;
        let latest_now = now
            .checked_add_signed(expected.leeway)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        if let Some(not_before) = self.not_before {
            if latest_now < not_before {
                return Err(ClaimsError::NotYetValid);
            }
        }

        if let Some(expires_at) = self.expires_at {
            let deadline = expires_at
                .checked_add_signed(expected.leeway)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            if now >= deadline {
                return Err(ClaimsError::Expired);
            }
        }

        if let Some(issued_at) = self.issued_at {
            if latest_now < issued_at {
                return Err(ClaimsError::IssuedInFuture);
            }
        }

        Ok(())
    }
}

/// Expectations a verified token is checked against, bound to one instant.
#[derive(Debug, Clone)]
pub struct ExpectedClaims<'a> {
    pub issuer: Option<&'a str>,
    pub audience: &'a [String],
    pub now: DateTime<Utc>,
    pub leeway: Duration,
}

#[derive(Debug, Deserialize)]
struct ClaimsRepr {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<AudienceRepr>,
    #[serde(default)]
    exp: Option<f64>,
    #[serde(default)]
    nbf: Option<f64>,
    #[serde(default)]
    iat: Option<f64>,
    #[serde(default)]
    jti: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AudienceRepr {
    Single(String),
    Many(Vec<String>),
}

/// NumericDate may carry fractional seconds; they are truncated.
fn timestamp(claim: &'static str, value: Option<f64>) -> AuthResult<Option<DateTime<Utc>>> {
    let Some(seconds) = value else {
        return Ok(None);
    };

    let whole = seconds.trunc();
    if !whole.is_finite() || whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
        return Err(AuthError::InvalidClaim(claim, seconds.to_string()));
    }

    Utc.timestamp_opt(whole as i64, 0)
        .single()
        .map(Some)
        .ok_or_else(|| AuthError::InvalidClaim(claim, seconds.to_string()))
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let audience = match value.aud {
            Some(AudienceRepr::Single(item)) => vec![item],
            Some(AudienceRepr::Many(items)) => items,
            None => Vec::new(),
        };

        Ok(Self {
            issuer: value.iss,
            subject: value.sub,
            audience,
            expires_at: timestamp("exp", value.exp)?,
            not_before: timestamp("nbf", value.nbf)?,
            issued_at: timestamp("iat", value.iat)?,
            token_id: value.jti,
            raw: serde_json::Value::Null,
        })
    }
}

impl TryFrom<serde_json::Value> for Claims {
    type Error = AuthError;

    fn try_from(value: serde_json::Value) -> AuthResult<Self> {
        if !value.is_object() {
            return Err(AuthError::InvalidJson(
                "claims payload is not a JSON object".to_string(),
            ));
        }
        let repr: ClaimsRepr = serde_json::from_value(value.clone())
            .map_err(|err| AuthError::InvalidJson(err.to_string()))?;
        let mut claims = Claims::try_from(repr)?;
        claims.raw = value;
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: serde_json::Value) -> Claims {
        Claims::try_from(value).expect("claims decode")
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().unwrap()
    }

    fn expected<'a>(audience: &'a [String], now: i64) -> ExpectedClaims<'a> {
        ExpectedClaims {
            issuer: Some("example"),
            audience,
            now: at(now),
            leeway: Duration::zero(),
        }
    }

    #[test]
    fn decodes_single_and_list_audience() {
        assert_eq!(claims(json!({"aud": "svc"})).audience, vec!["svc"]);
        assert_eq!(
            claims(json!({"aud": ["a", "b"]})).audience,
            vec!["a".to_string(), "b".to_string()]
        );
        assert!(claims(json!({})).audience.is_empty());
    }

    #[test]
    fn rejects_non_object_payload() {
        let err = Claims::try_from(json!(["not", "claims"])).expect_err("should reject");
        assert!(matches!(err, AuthError::InvalidJson(_)));
    }

    #[test]
    fn rejects_out_of_range_timestamp() {
        let err = Claims::try_from(json!({"exp": i64::MAX})).expect_err("should reject");
        assert!(matches!(err, AuthError::InvalidClaim("exp", _)));
    }

    #[test]
    fn fractional_timestamps_are_truncated() {
        let token = claims(json!({"iss": "example", "exp": 1_000.9, "iat": 500.5}));
        assert_eq!(token.expires_at, Some(at(1_000)));
        assert_eq!(token.issued_at, Some(at(500)));
        assert_eq!(token.validate(&expected(&[], 999)), Ok(()));
        assert_eq!(
            token.validate(&expected(&[], 1_000)),
            Err(ClaimsError::Expired)
        );
    }

    #[test]
    fn non_numeric_timestamp_is_rejected() {
        let err = Claims::try_from(json!({"iat": "yesterday"})).expect_err("should reject");
        assert!(matches!(err, AuthError::InvalidJson(_)));
    }

    #[test]
    fn audience_is_a_subset_check() {
        let token = claims(json!({"iss": "example", "aud": ["api-a", "api-b"]}));
        let wanted = vec!["api-a".to_string()];
        assert_eq!(token.validate(&expected(&wanted, 0)), Ok(()));

        let token = claims(json!({"iss": "example", "aud": ["api-b"]}));
        assert_eq!(
            token.validate(&expected(&wanted, 0)),
            Err(ClaimsError::AudienceMismatch {
                missing: "api-a".to_string()
            })
        );

        let both = vec!["api-a".to_string(), "api-c".to_string()];
        let token = claims(json!({"iss": "example", "aud": ["api-a", "api-b"]}));
        assert!(matches!(
            token.validate(&expected(&both, 0)),
            Err(ClaimsError::AudienceMismatch { missing }) if missing == "api-c"
        ));
    }

    #[test]
    fn empty_expectations_are_unchecked() {
        let token = claims(json!({"aud": "whatever"}));
        let unchecked = ExpectedClaims {
            issuer: None,
            audience: &[],
            now: at(0),
            leeway: Duration::zero(),
        };
        assert_eq!(token.validate(&unchecked), Ok(()));
    }

    #[test]
    fn issuer_must_match_exactly() {
        let token = claims(json!({"iss": "Example"}));
        assert!(matches!(
            token.validate(&expected(&[], 0)),
            Err(ClaimsError::IssuerMismatch { .. })
        ));

        let token = claims(json!({}));
        assert_eq!(
            token.validate(&expected(&[], 0)),
            Err(ClaimsError::IssuerMismatch {
                expected: "example".to_string(),
                found: None
            })
        );
    }

    #[test]
    fn expiry_is_exclusive() {
        let token = claims(json!({"iss": "example", "exp": 1_000}));
        assert_eq!(token.validate(&expected(&[], 999)), Ok(()));
        assert_eq!(
            token.validate(&expected(&[], 1_000)),
            Err(ClaimsError::Expired)
        );
    }

    #[test]
    fn not_before_is_inclusive() {
        let token = claims(json!({"iss": "example", "nbf": 1_000}));
        assert_eq!(
            token.validate(&expected(&[], 999)),
            Err(ClaimsError::NotYetValid)
        );
        assert_eq!(token.validate(&expected(&[], 1_000)), Ok(()));
    }

    #[test]
    fn issued_in_future_is_rejected() {
        let token = claims(json!({"iss": "example", "iat": 2_000}));
        assert_eq!(
            token.validate(&expected(&[], 1_000)),
            Err(ClaimsError::IssuedInFuture)
        );
    }

    #[test]
    fn leeway_widens_time_windows() {
        let token = claims(json!({"iss": "example", "exp": 1_000, "nbf": 1_100}));
        let mut lenient = expected(&[], 1_050);
        lenient.leeway = Duration::seconds(60);
        assert_eq!(token.validate(&lenient), Ok(()));
    }

    #[test]
    fn custom_claims_pass_through() {
        #[derive(Deserialize)]
        struct Tenant {
            tid: String,
            roles: Vec<String>,
        }

        let token = claims(json!({"sub": "u1", "tid": "t-9", "roles": ["admin"]}));
        let tenant: Tenant = token.custom().expect("custom claims");
        assert_eq!(tenant.tid, "t-9");
        assert_eq!(tenant.roles, vec!["admin"]);
    }
}
