use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{config::JwtConfig, error::ApiError, state::AppState, users::repo::User};

/// Claims carried by a short-lived access token. Identity fields ride
/// along so holders can be identified without a store lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub username: String,
    pub fullname: String,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    pub jti: Uuid,
}

/// Claims carried by a long-lived refresh token: the user id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
    pub jti: Uuid,
}

/// A freshly issued access/refresh pair. The refresh half equals the
/// value stored on the user row at the moment of issuance.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid access token")]
    InvalidAccess,
    #[error("invalid refresh token")]
    InvalidRefresh,
    #[error("refresh token mismatched or already used")]
    RefreshReused,
    #[error("token not generated")]
    Issuance(#[source] anyhow::Error),
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Issuance(e) => ApiError::Internal(e.context("token not generated")),
            other => ApiError::Unauthorized(other.to_string()),
        }
    }
}

/// Holds signing and verification keys for both token kinds plus the
/// expiry policy. Built once from config; nothing in here reads the
/// environment.
#[derive(Clone)]
pub struct TokenKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl FromRef<AppState> for TokenKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::new(&state.config.jwt)
    }
}

impl TokenKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(cfg.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(cfg.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs((cfg.access_ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((cfg.refresh_ttl_minutes as u64) * 60),
        }
    }

    fn window(&self, ttl: Duration) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    pub fn sign_access(&self, user: &User) -> Result<String, TokenError> {
        let (iat, exp) = self.window(self.access_ttl);
        let claims = AccessClaims {
            sub: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            fullname: user.fullname.clone(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::default(), &claims, &self.access_encoding)
            .map_err(|e| TokenError::Issuance(e.into()))?;
        debug!(user_id = %user.id, "access token signed");
        Ok(token)
    }

    pub fn sign_refresh(&self, user_id: Uuid) -> Result<String, TokenError> {
        let (iat, exp) = self.window(self.refresh_ttl);
        let claims = RefreshClaims {
            sub: user_id,
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
        };
        let token = encode(&Header::default(), &claims, &self.refresh_encoding)
            .map_err(|e| TokenError::Issuance(e.into()))?;
        debug!(user_id = %user_id, "refresh token signed");
        Ok(token)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation
    }

    /// Cryptographic check only; resolving the subject to a live user is
    /// the auth gate's job.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        decode::<AccessClaims>(token, &self.access_decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(|e| {
                warn!(error = %e, "access token rejected");
                TokenError::InvalidAccess
            })
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation())
            .map(|data| data.claims)
            .map_err(|e| {
                warn!(error = %e, "refresh token rejected");
                TokenError::InvalidRefresh
            })
    }
}

/// Signs a fresh pair for the user and persists the refresh half onto the
/// user row, replacing whatever was stored. Login lands here; the write
/// touches only the token column, so it cannot fail on unrelated fields.
pub async fn issue_pair(
    db: &PgPool,
    keys: &TokenKeys,
    user_id: Uuid,
) -> Result<TokenPair, TokenError> {
    let user = User::find_by_id(db, user_id)
        .await
        .map_err(TokenError::Issuance)?
        .ok_or_else(|| TokenError::Issuance(anyhow::anyhow!("user {user_id} missing")))?;
    let access_token = keys.sign_access(&user)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    let stored = User::store_refresh_token(db, user.id, &refresh_token)
        .await
        .map_err(TokenError::Issuance)?;
    if !stored {
        return Err(TokenError::Issuance(anyhow::anyhow!(
            "refresh token write affected no rows"
        )));
    }
    debug!(user_id = %user.id, "token pair issued");
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Exchanges a live refresh token for a fresh pair. The presented value
/// must equal the stored one byte for byte, and the persistence step is a
/// compare-and-swap keyed on it, so of two rotations racing with the same
/// stale token at most one succeeds.
pub async fn rotate(
    db: &PgPool,
    keys: &TokenKeys,
    presented: &str,
) -> Result<TokenPair, TokenError> {
    let claims = keys.verify_refresh(presented)?;
    let user = User::find_by_id(db, claims.sub)
        .await
        .map_err(TokenError::Issuance)?
        .ok_or(TokenError::InvalidRefresh)?;
    if !refresh_token_matches(&user, presented) {
        warn!(user_id = %user.id, "refresh token does not match stored value");
        return Err(TokenError::RefreshReused);
    }
    let access_token = keys.sign_access(&user)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    let swapped = User::swap_refresh_token(db, user.id, presented, &refresh_token)
        .await
        .map_err(TokenError::Issuance)?;
    if !swapped {
        warn!(user_id = %user.id, "refresh token rotated concurrently");
        return Err(TokenError::RefreshReused);
    }
    debug!(user_id = %user.id, "token pair rotated");
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

/// Stored-vs-presented comparison; an absent stored value never matches.
pub(crate) fn refresh_token_matches(user: &User, presented: &str) -> bool {
    user.refresh_token.as_deref() == Some(presented)
}

/// Clears the stored refresh token (logout). Idempotent.
pub async fn invalidate(db: &PgPool, user_id: Uuid) -> anyhow::Result<()> {
    User::clear_refresh_token(db, user_id).await
}
