//! Per-API-key rate limiting over shared atomic counters.
//!
//! Counters live in Redis so the limit holds across replicas. When the
//! counter backend is down the limiter fails open: verification keeps
//! working, only the throttle is lost.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::services::cache::VerificationCache;

#[derive(Clone)]
pub struct RateLimiter {
    cache: Arc<dyn VerificationCache>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn VerificationCache>, config: RateLimitConfig) -> Self {
        Self { cache, config }
    }

    /// General request throttle, applied at authentication time.
    pub async fn check_request(&self, api_key_id: Uuid) -> Result<(), AppError> {
        self.check(
            &format!("rate:req:{}", api_key_id),
            self.config.requests,
            self.config.request_window_seconds,
            "Too many requests",
        )
        .await
    }

    /// Tighter throttle on verification scans specifically.
    pub async fn check_verification(&self, api_key_id: Uuid) -> Result<(), AppError> {
        self.check(
            &format!("rate:verify:{}", api_key_id),
            self.config.verifications,
            self.config.verification_window_seconds,
            "Verification rate limit exceeded",
        )
        .await
    }

    async fn check(
        &self,
        key: &str,
        limit: u64,
        window_seconds: u64,
        message: &str,
    ) -> Result<(), AppError> {
        match self.cache.incr_window(key, window_seconds).await {
            Ok(count) if count > limit => Err(AppError::TooManyRequests(
                message.to_string(),
                Some(window_seconds),
            )),
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, key = %key, "Rate limit counter unavailable, allowing request");
                Ok(())
            }
        }
    }
}
