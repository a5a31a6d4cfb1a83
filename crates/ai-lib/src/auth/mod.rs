//! Bearer credentials shared between services
//!
//! Tokens are ECDSA-signed JWTs. Each token names its issuer and carries
//! the caller's access info (role, service id, user id) as top-level claims.

mod check;
mod token;

pub use check::{strip_bearer_token, token_from_headers, AuthCheck, KeySource, LocalKeySource};
pub use token::{JwtTokenSource, StaticTokenSource, TokenSource};

use serde::{Deserialize, Serialize};

/// Issuer allowed to vouch for end users
pub const ACCOUNTS_ISSUER: &str = "accounts";

/// Caller role carried in the `r` claim
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    User,
    SiteAdmin,
    Service,
}

/// Authenticated identity of a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessInfo {
    pub role: Role,
    pub service_id: Option<String>,
    pub user_id: Option<String>,
}

impl AccessInfo {
    pub fn service(service_id: impl Into<String>) -> Self {
        Self {
            role: Role::Service,
            service_id: Some(service_id.into()),
            user_id: None,
        }
    }
}

/// JWT claim set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(default)]
    pub iss: String,
    #[serde(default)]
    pub iat: i64,
    #[serde(default)]
    pub exp: i64,
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "sid", default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl AccessClaims {
    pub fn new(issuer: impl Into<String>, iat: i64, exp: i64, access: &AccessInfo) -> Self {
        Self {
            iss: issuer.into(),
            iat,
            exp,
            role: Some(access.role),
            service_id: access.service_id.clone(),
            user_id: access.user_id.clone(),
        }
    }

    /// Access info, or `None` when the token carries none of its claims
    pub fn access(&self) -> Option<AccessInfo> {
        if self.role.is_none() && self.service_id.is_none() && self.user_id.is_none() {
            return None;
        }
        Some(AccessInfo {
            role: self.role.unwrap_or_default(),
            service_id: self.service_id.clone(),
            user_id: self.user_id.clone(),
        })
    }
}
