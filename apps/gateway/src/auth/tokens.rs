//! Access-token verification for gateway connections and REST calls.
//!
//! Tokens are issued by the identity service; the gateway only verifies
//! them and reads the profile snapshot they carry.

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// The authenticated user behind a connection, cached for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<AccessClaims> for Identity {
    fn from(claims: AccessClaims) -> Self {
        let display_name = claims
            .display_name
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| claims.username.clone());
        Self {
            user_id: claims.sub,
            username: claims.username,
            display_name,
            avatar_url: claims.avatar_url,
        }
    }
}

/// Resolves a presented credential to a user identity.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn resolve_identity(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT verifier sharing a secret with the identity service.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn resolve_identity(&self, credential: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<AccessClaims>(credential, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(?e, "access token rejected");
                match e.kind() {
                    ErrorKind::ExpiredSignature => AuthError::Expired,
                    ErrorKind::InvalidToken => AuthError::Malformed,
                    _ => AuthError::Invalid,
                }
            })?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::Invalid);
        }

        Ok(data.claims.into())
    }
}

/// Pull a bearer credential from the `Authorization` header, falling back to
/// a `token` query parameter (browsers cannot set headers on WebSocket
/// upgrades).
pub fn bearer_credential<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Result<&'a str, AuthError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().map_err(|_| AuthError::Malformed)?;
        let token = value.strip_prefix("Bearer ").ok_or(AuthError::Malformed)?;
        return non_empty(token);
    }
    match query_token {
        Some(token) => non_empty(token),
        None => Err(AuthError::Missing),
    }
}

fn non_empty(token: &str) -> Result<&str, AuthError> {
    let token = token.trim();
    if token.is_empty() {
        Err(AuthError::Missing)
    } else {
        Ok(token)
    }
}
