//! Minting bearer tokens for outgoing calls

use super::{AccessClaims, AccessInfo};
use crate::error::AuthError;
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::time::Duration;

/// Supplies a bearer token for each outgoing call
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, AuthError>;
}

/// Signs a fresh short-lived service token on every call
pub struct JwtTokenSource {
    issuer: String,
    key: EncodingKey,
    ttl: Duration,
    access: AccessInfo,
}

impl JwtTokenSource {
    /// Token source for an EC private key in PKCS#8 PEM form.
    ///
    /// Tokens are signed with ES256 and carry the `SERVICE` role with the
    /// issuer as service id.
    pub fn from_ec_pem(
        issuer: impl Into<String>,
        pem: &[u8],
        ttl: Duration,
    ) -> Result<Self, AuthError> {
        let issuer = issuer.into();
        let key = EncodingKey::from_ec_pem(pem).map_err(AuthError::Signing)?;
        Ok(Self {
            access: AccessInfo::service(issuer.clone()),
            issuer,
            key,
            ttl,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn sign(&self, now: i64) -> Result<String, AuthError> {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = AccessClaims::new(
            self.issuer.clone(),
            now,
            now.saturating_add(ttl),
            &self.access,
        );
        encode(&Header::new(Algorithm::ES256), &claims, &self.key).map_err(AuthError::Signing)
    }
}

#[async_trait]
impl TokenSource for JwtTokenSource {
    async fn token(&self) -> Result<String, AuthError> {
        self.sign(chrono::Utc::now().timestamp())
    }
}

/// Hands out a fixed token
#[derive(Debug, Clone)]
pub struct StaticTokenSource(String);

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    const PRIVATE_PEM: &str = include_str!("../../tests/fixtures/ec_private.pem");
    const PUBLIC_PEM: &str = include_str!("../../tests/fixtures/ec_public.pem");

    #[test]
    fn test_signed_claims() {
        let source =
            JwtTokenSource::from_ec_pem("ai", PRIVATE_PEM.as_bytes(), Duration::from_secs(300))
                .unwrap();
        let now = chrono::Utc::now().timestamp();
        let token = source.sign(now).unwrap();

        let key = DecodingKey::from_ec_pem(PUBLIC_PEM.as_bytes()).unwrap();
        let claims = decode::<AccessClaims>(&token, &key, &Validation::new(Algorithm::ES256))
            .unwrap()
            .claims;

        assert_eq!(claims.iss, "ai");
        assert_eq!(claims.iat, now);
        assert_eq!(claims.exp, now + 300);
        assert_eq!(claims.role, Some(Role::Service));
        assert_eq!(claims.service_id.as_deref(), Some("ai"));
    }

    #[test]
    fn test_rejects_bad_pem() {
        let result = JwtTokenSource::from_ec_pem("ai", b"not a key", Duration::from_secs(1));
        assert!(matches!(result, Err(AuthError::Signing(_))));
    }

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticTokenSource::new("t0k3n");
        assert_eq!(source.token().await.unwrap(), "t0k3n");
    }
}
