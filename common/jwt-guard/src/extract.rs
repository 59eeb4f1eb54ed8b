use http::header::{AUTHORIZATION, COOKIE};
use http::request::Parts;

use crate::error::{AuthError, AuthResult};

/// Pulls the raw token string out of an inbound request.
///
/// Implementations only read the request. Every "nothing usable here"
/// outcome is reported as [`AuthError::MissingToken`].
pub trait TokenExtractor: Send + Sync {
    fn extract(&self, parts: &Parts) -> AuthResult<String>;
}

/// `Authorization: Bearer <token>`, with the scheme matched case-insensitively.
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerHeader;

impl TokenExtractor for BearerHeader {
    fn extract(&self, parts: &Parts) -> AuthResult<String> {
        let value = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingToken)?;
        let raw = value.to_str().map_err(|_| AuthError::MissingToken)?;
        parse_bearer(raw)
    }
}

fn parse_bearer(raw: &str) -> AuthResult<String> {
    let raw = raw.trim();
    let (scheme, rest) = raw
        .split_once(|c: char| c.is_ascii_whitespace())
        .ok_or(AuthError::MissingToken)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingToken);
    }

    let token = rest.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    Ok(token.to_owned())
}

/// Token carried in a named cookie.
#[derive(Debug, Clone)]
pub struct CookieToken {
    name: String,
}

impl CookieToken {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl TokenExtractor for CookieToken {
    fn extract(&self, parts: &Parts) -> AuthResult<String> {
        parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|header| header.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .map(|(_, value)| value.trim().trim_matches('"'))
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .ok_or(AuthError::MissingToken)
    }
}

/// Token carried in a named query-string parameter.
#[derive(Debug, Clone)]
pub struct QueryToken {
    param: String,
}

impl QueryToken {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

impl TokenExtractor for QueryToken {
    fn extract(&self, parts: &Parts) -> AuthResult<String> {
        let query = parts.uri.query().ok_or(AuthError::MissingToken)?;

        for pair in query.split('&') {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            if decode_component(name).as_deref() != Some(self.param.as_str()) {
                continue;
            }
            return match decode_component(value) {
                Some(token) if !token.is_empty() => Ok(token),
                _ => Err(AuthError::MissingToken),
            };
        }

        Err(AuthError::MissingToken)
    }
}

fn decode_component(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .ok()
        .map(|value| value.into_owned())
}

/// Tries each extractor in order and returns the first token found.
pub struct FirstOf {
    extractors: Vec<Box<dyn TokenExtractor>>,
}

impl FirstOf {
    pub fn new(extractors: Vec<Box<dyn TokenExtractor>>) -> Self {
        Self { extractors }
    }

    pub fn or(mut self, extractor: impl TokenExtractor + 'static) -> Self {
        self.extractors.push(Box::new(extractor));
        self
    }
}

impl TokenExtractor for FirstOf {
    fn extract(&self, parts: &Parts) -> AuthResult<String> {
        self.extractors
            .iter()
            .find_map(|extractor| extractor.extract(parts).ok())
            .ok_or(AuthError::MissingToken)
    }
}
