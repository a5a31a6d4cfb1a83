//! Bearer token validation

use super::{AccessClaims, AccessInfo, ACCOUNTS_ISSUER};
use crate::error::AuthError;
use axum::http::{header, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const ACCEPTED_ALGORITHMS: [Algorithm; 2] = [Algorithm::ES256, Algorithm::ES384];

const TOKEN_COOKIE: &str = "jwt";

/// Resolves the public key of a token issuer
pub trait KeySource: Send + Sync {
    fn public_key(&self, issuer: &str) -> Result<DecodingKey, AuthError>;
}

/// Fixed issuer → key table loaded at startup
#[derive(Clone, Default)]
pub struct LocalKeySource {
    keys: HashMap<String, DecodingKey>,
}

impl LocalKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(mut self, issuer: impl Into<String>, key: DecodingKey) -> Self {
        self.keys.insert(issuer.into(), key);
        self
    }

    /// Register an EC public key in PEM form
    pub fn add_ec_pem(self, issuer: impl Into<String>, pem: &[u8]) -> Result<Self, AuthError> {
        let key = DecodingKey::from_ec_pem(pem)?;
        Ok(self.add_key(issuer, key))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeySource for LocalKeySource {
    fn public_key(&self, issuer: &str) -> Result<DecodingKey, AuthError> {
        self.keys
            .get(issuer)
            .cloned()
            .ok_or_else(|| AuthError::UnknownIssuer(issuer.to_string()))
    }
}

#[derive(Deserialize)]
struct UnverifiedIssuer {
    #[serde(default)]
    iss: String,
}

/// Validates bearer tokens against trusted issuer keys
#[derive(Clone)]
pub struct AuthCheck {
    keys: Arc<dyn KeySource>,
}

impl AuthCheck {
    pub fn new(keys: Arc<dyn KeySource>) -> Self {
        Self { keys }
    }

    /// Verify `token` and return the caller's access info
    pub fn authenticate(&self, token: &str) -> Result<AccessInfo, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let header = decode_header(token)?;
        if !ACCEPTED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::InvalidToken(ErrorKind::InvalidAlgorithm.into()));
        }

        let issuer = peek_issuer(token)?;
        let key = self.keys.public_key(&issuer)?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
        validation.set_issuer(&[issuer.as_str()]);
        validation.validate_aud = false;

        let claims = decode::<AccessClaims>(token, &key, &validation)?.claims;
        let access = claims.access().ok_or(AuthError::MissingAccessInfo)?;

        if access.user_id.is_some() && claims.iss != ACCOUNTS_ISSUER {
            return Err(AuthError::UserIssuer(claims.iss));
        }

        Ok(access)
    }

    /// Authenticate the token carried by request headers
    pub fn authenticate_headers(&self, headers: &HeaderMap) -> Result<AccessInfo, AuthError> {
        let token = token_from_headers(headers).ok_or(AuthError::MissingToken)?;
        self.authenticate(&token)
    }
}

/// Read the issuer before the signing key is known
fn peek_issuer(token: &str) -> Result<String, AuthError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let unverified = decode::<UnverifiedIssuer>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(unverified.claims.iss)
}

/// Token from an `Authorization: Bearer` value; the scheme is case-insensitive
pub fn strip_bearer_token(value: &str) -> Option<&str> {
    const PREFIX: &str = "bearer ";
    if value.len() > PREFIX.len() && value[..PREFIX.len()].eq_ignore_ascii_case(PREFIX) {
        Some(&value[PREFIX.len()..])
    } else {
        None
    }
}

/// Bearer token from the `Authorization` header, falling back to the `jwt` cookie
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(strip_bearer_token);
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}
