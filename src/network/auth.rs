//! Telegram Authentication
//!
//! Validates Telegram Mini-App `initData` (signed with HMAC-SHA256 under a
//! key derived from the bot token) and issues/validates the short-lived
//! JWTs that game connections present afterwards. The server is its own
//! token issuer; Telegram is the identity provider.

use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::store::TelegramUser;

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Telegram bot token; the HMAC key for initData is derived from it.
    pub bot_token: Option<String>,
    /// HS256 secret for the JWTs this server issues.
    pub jwt_secret: Option<String>,
    /// Lifetime of issued tokens (seconds).
    pub token_ttl_secs: u64,
    /// Reject initData older than this (seconds). 0 disables the check.
    pub max_init_data_age_secs: u64,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            bot_token: std::env::var("BOT_TOKEN").ok(),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            token_ttl_secs: std::env::var("AUTH_TOKEN_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86_400),
            max_init_data_age_secs: std::env::var("AUTH_MAX_INITDATA_AGE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86_400),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Check if authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.jwt_secret.is_some()
    }
}

/// Claims carried in the JWTs this server issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - the Telegram user id as a decimal string.
    pub sub: String,
    /// First name from the Telegram profile.
    pub first_name: String,
    /// Last name, if set.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Username, if set.
    #[serde(default)]
    pub username: Option<String>,
    /// Profile photo URL, if shared.
    #[serde(default)]
    pub photo_url: Option<String>,
    /// IETF language tag, if shared.
    #[serde(default)]
    pub language_code: Option<String>,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
}

impl TokenClaims {
    /// The numeric Telegram user id, if the subject parses.
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }

    /// Rebuild the profile the claims were issued for.
    pub fn profile(&self) -> Option<TelegramUser> {
        Some(TelegramUser {
            id: self.user_id()?,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            photo_url: self.photo_url.clone(),
            language_code: self.language_code.clone(),
        })
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No authentication configured on server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token or hash format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// initData is malformed.
    #[error("invalid initData: {0}")]
    InvalidInitData(String),
    /// initData is too old.
    #[error("initData expired")]
    StaleInitData,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Result<HmacSha256, AuthError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| AuthError::DecodeError(e.to_string()))?;
    mac.update(message);
    Ok(mac)
}

/// Validate Telegram Mini-App initData and extract the user profile.
///
/// Follows the documented scheme: the secret key is
/// `HMAC_SHA256(key = "WebAppData", message = bot_token)`, and the `hash`
/// parameter must equal `HMAC_SHA256(key = secret, message = data_check_string)`
/// where the check string is every other `key=value` pair, sorted by key
/// and joined with newlines.
pub fn validate_init_data(
    init_data: &str,
    config: &AuthConfig,
) -> Result<TelegramUser, AuthError> {
    let bot_token = config.bot_token.as_ref().ok_or(AuthError::NotConfigured)?;

    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(init_data.as_bytes())
        .into_owned()
        .collect();

    let hash = pairs
        .iter()
        .find(|(key, _)| key == "hash")
        .map(|(_, value)| value.clone())
        .ok_or_else(|| AuthError::InvalidInitData("hash parameter missing".into()))?;
    pairs.retain(|(key, _)| key != "hash");
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let data_check_string = pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n");

    let secret = hmac_sha256(b"WebAppData", bot_token.as_bytes())?
        .finalize()
        .into_bytes();
    let expected = hex::decode(&hash).map_err(|_| AuthError::InvalidFormat)?;
    hmac_sha256(&secret, data_check_string.as_bytes())?
        .verify_slice(&expected)
        .map_err(|_| AuthError::InvalidSignature)?;

    if config.max_init_data_age_secs > 0 {
        let auth_date: u64 = pairs
            .iter()
            .find(|(key, _)| key == "auth_date")
            .and_then(|(_, value)| value.parse().ok())
            .ok_or_else(|| AuthError::InvalidInitData("auth_date missing".into()))?;
        if unix_now().saturating_sub(auth_date) > config.max_init_data_age_secs {
            return Err(AuthError::StaleInitData);
        }
    }

    let user_json = pairs
        .iter()
        .find(|(key, _)| key == "user")
        .map(|(_, value)| value.clone())
        .ok_or_else(|| AuthError::InvalidInitData("user payload missing".into()))?;
    let user: TelegramUser = serde_json::from_str(&user_json)
        .map_err(|e| AuthError::InvalidInitData(e.to_string()))?;

    if user.id == 0 {
        return Err(AuthError::MissingClaim("user.id".into()));
    }

    Ok(user)
}

/// Issue a signed token for a validated Telegram user.
pub fn issue_token(user: &TelegramUser, config: &AuthConfig) -> Result<String, AuthError> {
    let secret = config.jwt_secret.as_ref().ok_or(AuthError::NotConfigured)?;

    let now = unix_now();
    let claims = TokenClaims {
        sub: user.id.to_string(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
        photo_url: user.photo_url.clone(),
        language_code: user.language_code.clone(),
        iat: now,
        exp: now + config.token_ttl_secs,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::DecodeError(e.to_string()))
}

/// Validate a token this server issued and extract claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let secret = config.jwt_secret.as_ref().ok_or(AuthError::NotConfigured)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims = std::collections::HashSet::new();
    validation.validate_aud = false;
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = decode(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(map_jwt_error)?;

    let claims = token_data.claims;

    if claims.sub.is_empty() || claims.user_id().is_none() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // Manual expiry check (in case validation was skipped)
    if !config.skip_expiry && claims.exp > 0 && unix_now() > claims.exp {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
