//! Token Provider: signed access/refresh tokens carrying identity and role
//! claims (spec §4.9).

use crate::model::{JWTClaims, Role, TokenType, User};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token")]
    InvalidToken,
    #[error("token decoding failed: {0}")]
    DecodingFailed(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid claim: {0}")]
    InvalidClaim(String),
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub issuer: String,
    pub access_token_duration: Duration,
    pub refresh_token_duration: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_expires_at: chrono::DateTime<Utc>,
    pub refresh_token_expires_at: chrono::DateTime<Utc>,
}

struct RevokedEntry {
    jti: String,
    expires_at: chrono::DateTime<Utc>,
}

struct Inner {
    revoked: Vec<RevokedEntry>,
}

pub struct TokenProvider {
    config: TokenConfig,
    inner: Mutex<Inner>,
}

impl TokenProvider {
    pub fn new(config: TokenConfig) -> Arc<Self> {
        Arc::new(TokenProvider {
            config,
            inner: Mutex::new(Inner { revoked: Vec::new() }),
        })
    }

    fn encode_claims(&self, claims: &JWTClaims) -> Result<String, TokenError> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.config.secret.as_bytes()),
        )
        .map_err(|e| TokenError::DecodingFailed(e.to_string()))
    }

    fn build_claims(&self, user: &User, token_type: TokenType, now: chrono::DateTime<Utc>) -> JWTClaims {
        let duration = match token_type {
            TokenType::Access => self.config.access_token_duration,
            TokenType::Refresh => self.config.refresh_token_duration,
        };
        JWTClaims {
            iss: self.config.issuer.clone(),
            sub: user.id.clone(),
            iat: now.timestamp(),
            nbf: None,
            exp: (now + duration).timestamp(),
            jti: Uuid::new_v4().to_string(),
            username: user.username.clone(),
            role: user.role,
            token_type,
        }
    }

    pub async fn generate_token_pair(&self, user: &User) -> Result<TokenPair, TokenError> {
        let now = Utc::now();
        let access_claims = self.build_claims(user, TokenType::Access, now);
        let refresh_claims = self.build_claims(user, TokenType::Refresh, now);

        let access_exp = chrono::DateTime::from_timestamp(access_claims.exp, 0).unwrap_or(now);
        let refresh_exp = chrono::DateTime::from_timestamp(refresh_claims.exp, 0).unwrap_or(now);

        let access_token = self.encode_claims(&access_claims)?;
        let refresh_token = self.encode_claims(&refresh_claims)?;

        tracing::info!(user_id = %user.id, "token_pair_issued");

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_token_expires_at: access_exp,
            refresh_token_expires_at: refresh_exp,
        })
    }

    pub async fn validate(&self, token: &str) -> Result<JWTClaims, TokenError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[self.config.issuer.clone()]);
        validation.validate_exp = true;

        let data = decode::<JWTClaims>(
            token,
            &DecodingKey::from_secret(self.config.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
            jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            _ => TokenError::DecodingFailed(e.to_string()),
        })?;

        let claims = data.claims;
        let now = Utc::now().timestamp();
        if let Some(nbf) = claims.nbf {
            if now < nbf {
                return Err(TokenError::InvalidClaim("nbf".to_string()));
            }
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }

        self.prune_expired().await;
        let inner = self.inner.lock().await;
        if inner.revoked.iter().any(|r| r.jti == claims.jti) {
            return Err(TokenError::InvalidToken);
        }

        Ok(claims)
    }

    pub async fn revoke(&self, jti: &str, expires_at: chrono::DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.revoked.push(RevokedEntry {
            jti: jti.to_string(),
            expires_at,
        });
        tracing::info!(jti = %jti, "token_revoked");
    }

    async fn prune_expired(&self) {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner.revoked.retain(|r| r.expires_at > now);
    }

    pub async fn refresh(&self, token: &str, user: &User) -> Result<TokenPair, TokenError> {
        let claims = self.validate(token).await?;
        if claims.token_type != TokenType::Refresh {
            return Err(TokenError::InvalidClaim("tokenType".to_string()));
        }
        self.generate_token_pair(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TokenConfig {
        TokenConfig {
            secret: "test-secret".to_string(),
            issuer: "agentfleet".to_string(),
            access_token_duration: Duration::minutes(15),
            refresh_token_duration: Duration::days(7),
        }
    }

    fn user() -> User {
        User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            role: Role::Operator,
            active: true,
        }
    }

    // Property 6: token round-trip
    #[tokio::test]
    async fn round_trip_preserves_subject_and_role() {
        let provider = TokenProvider::new(config());
        let pair = provider.generate_token_pair(&user()).await.unwrap();
        let claims = provider.validate(&pair.access_token).await.unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, Role::Operator);
    }

    #[tokio::test]
    async fn revoked_token_fails_validation() {
        let provider = TokenProvider::new(config());
        let pair = provider.generate_token_pair(&user()).await.unwrap();
        let claims = provider.validate(&pair.access_token).await.unwrap();
        provider.revoke(&claims.jti, Utc::now() + Duration::minutes(15)).await;
        let err = provider.validate(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, TokenError::InvalidToken));
    }

    #[tokio::test]
    async fn different_secret_fails_signature_check() {
        let provider_a = TokenProvider::new(config());
        let mut other_config = config();
        other_config.secret = "different-secret".to_string();
        let provider_b = TokenProvider::new(other_config);

        let pair = provider_a.generate_token_pair(&user()).await.unwrap();
        let err = provider_b.validate(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, TokenError::InvalidSignature));
    }

    // S5: token refresh
    #[tokio::test]
    async fn s5_refresh_with_refresh_token_yields_new_pair() {
        let provider = TokenProvider::new(config());
        let pair = provider.generate_token_pair(&user()).await.unwrap();
        let new_pair = provider.refresh(&pair.refresh_token, &user()).await.unwrap();
        assert_ne!(new_pair.access_token, pair.access_token);
        assert_ne!(new_pair.refresh_token, pair.refresh_token);
    }

    #[tokio::test]
    async fn s5_refresh_with_access_token_fails_token_type() {
        let provider = TokenProvider::new(config());
        let pair = provider.generate_token_pair(&user()).await.unwrap();
        let err = provider.refresh(&pair.access_token, &user()).await.unwrap_err();
        assert!(matches!(err, TokenError::InvalidClaim(ref c) if c == "tokenType"));
    }

    #[tokio::test]
    async fn tampered_payload_invalidates_token() {
        let provider = TokenProvider::new(config());
        let pair = provider.generate_token_pair(&user()).await.unwrap();
        let mut tampered = pair.access_token.clone();
        tampered.push('x');
        let err = provider.validate(&tampered).await.unwrap_err();
        assert!(matches!(err, TokenError::InvalidSignature | TokenError::DecodingFailed(_)));
    }
}
