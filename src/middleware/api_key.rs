//! API-key authentication.
//!
//! Callers present a raw key in `X-API-Key`. Only a salted SHA-256 hash of
//! the key is ever stored or cached, so neither Postgres nor Redis holds
//! usable credentials. Resolved contexts are cached to keep the hot path off
//! the database.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

const API_KEY_HEADER: &str = "x-api-key";
const API_KEY_CACHE_PREFIX: &str = "api_key:";

/// The manufacturer identity an authenticated API key resolves to. Attached
/// as a request extension by [`require_api_key`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ApiKeyContext {
    pub api_key_id: Uuid,
    pub manufacturer_uuid: Uuid,
    pub manufacturer_id: String,
    pub manufacturer_name: String,
}

/// Salted hash under which API keys are stored and looked up.
pub fn hash_api_key(raw_key: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Authenticate the request and enforce the general request throttle.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let raw_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing API key")))?;

    let key_hash = hash_api_key(raw_key, state.config.security.api_key_hash_secret.expose_secret());
    let cache_key = format!("{}{}", API_KEY_CACHE_PREFIX, key_hash);

    let ctx = match cached_context(&state, &cache_key).await {
        Some(ctx) => ctx,
        None => {
            let ctx = state
                .db
                .find_api_key(&key_hash)
                .await?
                .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid API key")))?;

            match serde_json::to_string(&ctx) {
                Ok(raw) => {
                    if let Err(e) = state
                        .cache
                        .set(&cache_key, &raw, state.config.cache.api_key_ttl_seconds)
                        .await
                    {
                        warn!(error = %e, "Failed to cache API key context");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize API key context"),
            }

            ctx
        }
    };

    state.rate_limiter.check_request(ctx.api_key_id).await?;

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

async fn cached_context(state: &AppState, cache_key: &str) -> Option<ApiKeyContext> {
    match state.cache.get(cache_key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(ctx) => Some(ctx),
            Err(e) => {
                warn!(error = %e, "Discarding unparseable cached API key context");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "API key cache unavailable, falling back to store");
            None
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ApiKeyContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ApiKeyContext>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing API key context")))
    }
}
