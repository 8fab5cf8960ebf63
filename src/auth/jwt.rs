use std::time::Duration;

use anyhow::Context;
use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    auth::claims::{Claims, TokenKind},
    config::JwtConfig,
    error::{AppError, AppResult},
    state::AppState,
};

#[derive(Clone)]
struct SigningKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl SigningKey {
    /// An empty secret leaves the key unconfigured so signing fails loudly.
    fn from_secret(secret: &str, ttl_minutes: i64) -> Option<Self> {
        if secret.is_empty() {
            return None;
        }
        Some(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::from_secs(ttl_minutes.max(0) as u64 * 60),
        })
    }
}

/// Access and refresh tokens issued together after login, register or refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signs and verifies both token kinds. Access and refresh tokens use
/// independent secrets and lifetimes.
#[derive(Clone)]
pub struct JwtKeys {
    access: Option<SigningKey>,
    refresh: Option<SigningKey>,
    issuer: String,
    audience: String,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            access: SigningKey::from_secret(&cfg.secret, cfg.ttl_minutes),
            refresh: SigningKey::from_secret(&cfg.refresh_secret, cfg.refresh_ttl_minutes),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    fn key(&self, kind: TokenKind) -> Option<&SigningKey> {
        match kind {
            TokenKind::Access => self.access.as_ref(),
            TokenKind::Refresh => self.refresh.as_ref(),
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh.as_ref().map(|k| k.ttl).unwrap_or_default()
    }

    fn sign_at(&self, user_id: Uuid, kind: TokenKind, now: OffsetDateTime) -> anyhow::Result<String> {
        let key = self
            .key(kind)
            .with_context(|| format!("{kind:?} signing secret is not configured"))?;
        let exp = now + TimeDuration::seconds(key.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &key.encoding)?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    /// Mints a fresh access/refresh pair for `user_id`.
    pub fn issue(&self, user_id: Uuid) -> AppResult<TokenPair> {
        let now = OffsetDateTime::now_utc();
        let sign = |kind| {
            self.sign_at(user_id, kind, now).map_err(|e| {
                error!(error = %e, kind = ?kind, "jwt signing failed");
                AppError::ServiceUnavailable("Token service unavailable.".into())
            })
        };
        Ok(TokenPair {
            access_token: sign(TokenKind::Access)?,
            refresh_token: sign(TokenKind::Refresh)?,
        })
    }

    fn verify(&self, token: &str, kind: TokenKind) -> anyhow::Result<Claims> {
        let key = self
            .key(kind)
            .with_context(|| format!("{kind:?} signing secret is not configured"))?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &key.decoding, &validation)?;
        if data.claims.kind != kind {
            anyhow::bail!("expected {kind:?} token, got {:?}", data.claims.kind);
        }
        debug!(user_id = %data.claims.sub, kind = ?kind, "jwt verified");
        Ok(data.claims)
    }

    /// Resolves the user id carried by a bearer access token.
    pub fn verify_access(&self, token: Option<&str>) -> AppResult<Uuid> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthenticated("Access denied. No token provided.".into()))?;
        self.verify(token, TokenKind::Access)
            .map(|claims| claims.sub)
            .map_err(|e| {
                warn!(error = %e, "access token rejected");
                AppError::Forbidden("Invalid or expired access token.".into())
            })
    }

    pub fn verify_refresh(&self, token: &str) -> AppResult<Claims> {
        self.verify(token, TokenKind::Refresh).map_err(|e| {
            warn!(error = %e, "refresh token rejected");
            AppError::Forbidden("Invalid or expired refresh token.".into())
        })
    }
}
