//! The verification pipeline.
//!
//! One scan flows through: rate limit, code normalization, cache lookup,
//! authoritative store lookup, ownership and lifecycle checks, anomaly
//! detection, confidence scoring, and a commit phase that claims first
//! verification and appends the audit event. The commit phase runs on a
//! detached task so a client disconnect cannot leave the scan half-recorded.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::error::AppError;
use crate::middleware::ApiKeyContext;
use crate::models::{
    CodeRecord, Geolocation, NewVerificationEvent, ProductSummary, VerificationOutcome,
};
use crate::services::anomaly::AnomalyDetector;
use crate::services::cache::VerificationCache;
use crate::services::database::CodeStore;
use crate::services::rate_limit::RateLimiter;

const CODE_CACHE_PREFIX: &str = "auth_code:";

/// One scan as submitted by a client, after transport-level validation.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub code: String,
    pub location: Option<Geolocation>,
    pub is_offline: bool,
}

/// Strip separators and fold case so printed and hand-typed codes compare
/// equal to the stored form.
pub fn normalize_code(code: &str) -> String {
    code.trim().replace('-', "").to_uppercase()
}

/// Confidence starts at 1.0 and loses fixed penalties per signal.
pub fn score_confidence(is_duplicate: bool, is_offline: bool, is_suspicious: bool) -> f64 {
    let mut confidence: f64 = 1.0;
    if is_duplicate {
        confidence -= 0.3;
    }
    if is_offline {
        confidence -= 0.2;
    }
    if is_suspicious {
        confidence -= 0.4;
    }
    confidence.clamp(0.0, 1.0)
}

/// Low confidence wins over the duplicate label: a scan that looks like an
/// attack is reported as suspicious even when it is also a repeat.
pub fn classify(
    confidence: f64,
    product: ProductSummary,
    is_duplicate: bool,
    is_offline: bool,
) -> VerificationOutcome {
    if confidence < 0.5 {
        VerificationOutcome::Suspicious {
            confidence,
            product,
            is_duplicate,
            is_offline,
        }
    } else if is_duplicate {
        VerificationOutcome::Duplicate {
            confidence,
            product,
            is_offline,
        }
    } else {
        VerificationOutcome::Authentic {
            confidence,
            product,
            is_offline,
        }
    }
}

pub struct VerificationPipeline {
    store: Arc<dyn CodeStore>,
    cache: Arc<dyn VerificationCache>,
    detector: AnomalyDetector,
    limiter: RateLimiter,
    cache_ttl_seconds: u64,
}

impl VerificationPipeline {
    pub fn new(
        store: Arc<dyn CodeStore>,
        cache: Arc<dyn VerificationCache>,
        detector: AnomalyDetector,
        limiter: RateLimiter,
        cache_ttl_seconds: u64,
    ) -> Self {
        Self {
            store,
            cache,
            detector,
            limiter,
            cache_ttl_seconds,
        }
    }

    /// Run one scan to a terminal verdict. Storage failure is fatal; cache
    /// and counter failures degrade.
    #[instrument(skip(self, ctx, request), fields(api_key = %ctx.api_key_id, offline = request.is_offline))]
    pub async fn verify(
        &self,
        ctx: &ApiKeyContext,
        request: ScanRequest,
    ) -> Result<VerificationOutcome, AppError> {
        self.limiter.check_verification(ctx.api_key_id).await?;

        let code = normalize_code(&request.code);

        let record = match self.lookup(&code).await? {
            Some(record) => record,
            None => {
                info!(result = "invalid", "Unknown authentication code");
                self.finalize_unresolved(ctx, &request, None).await?;
                return Ok(VerificationOutcome::Invalid);
            }
        };

        // Cross-tenant scans are indistinguishable from unknown codes.
        if record.manufacturer_id != ctx.manufacturer_id {
            warn!(
                owner = %record.manufacturer_id,
                caller = %ctx.manufacturer_id,
                "Code belongs to another manufacturer"
            );
            self.finalize_unresolved(ctx, &request, Some(record.code_id))
                .await?;
            return Ok(VerificationOutcome::Invalid);
        }

        let product = ProductSummary::from(&record);

        if record.is_revoked() {
            let outcome = VerificationOutcome::Revoked { product };
            self.finalize_terminal(ctx, &request, &record, &outcome)
                .await?;
            return Ok(outcome);
        }

        if record.is_expired(Utc::now().date_naive()) {
            let outcome = VerificationOutcome::Expired { product };
            self.finalize_terminal(ctx, &request, &record, &outcome)
                .await?;
            return Ok(outcome);
        }

        let is_duplicate = record.first_verified_at.is_some();
        let is_suspicious = self
            .detector
            .check(&code, record.code_id, request.location.as_ref())
            .await;

        let confidence = score_confidence(is_duplicate, request.is_offline, is_suspicious);
        let outcome = classify(confidence, product, is_duplicate, request.is_offline);

        self.commit(ctx, request, record, outcome, is_suspicious)
            .await
    }

    /// Cache-first lookup with write-through. A failing or corrupt cache is
    /// treated as a miss; a failing store is fatal.
    async fn lookup(&self, code: &str) -> Result<Option<CodeRecord>, AppError> {
        let cache_key = format!("{}{}", CODE_CACHE_PREFIX, code);

        match self.cache.get(&cache_key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CodeRecord>(&raw) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => {
                    warn!(error = %e, "Discarding unparseable cached code record");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Cache unavailable, falling back to store");
            }
        }

        let record = self.store.find_code_record(code).await?;

        if let Some(ref record) = record {
            match serde_json::to_string(record) {
                Ok(raw) => {
                    if let Err(e) = self.cache.set(&cache_key, &raw, self.cache_ttl_seconds).await
                    {
                        warn!(error = %e, "Failed to cache code record");
                    }
                }
                Err(e) => warn!(error = %e, "Failed to serialize code record for cache"),
            }
        }

        Ok(record)
    }

    /// Commit phase for authentic/duplicate/suspicious verdicts: claim first
    /// verification, reclassify if another scan won the claim, refresh the
    /// cache, append the audit event. Detached so it survives the caller
    /// going away; awaited so the response reflects the committed verdict.
    async fn commit(
        &self,
        ctx: &ApiKeyContext,
        request: ScanRequest,
        mut record: CodeRecord,
        outcome: VerificationOutcome,
        is_suspicious: bool,
    ) -> Result<VerificationOutcome, AppError> {
        let store = self.store.clone();
        let cache = self.cache.clone();
        let cache_ttl = self.cache_ttl_seconds;
        let api_key_id = ctx.api_key_id;

        let handle = tokio::spawn(async move {
            let mut outcome = outcome;
            let was_duplicate = outcome.is_duplicate();

            if !was_duplicate {
                match store.mark_first_verified(record.code_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        // Lost the first-verification race.
                        let confidence =
                            score_confidence(true, request.is_offline, is_suspicious);
                        let product = ProductSummary::from(&record);
                        outcome = classify(confidence, product, true, request.is_offline);
                    }
                    Err(e) => return Err(e),
                }
            }

            record.first_verified_at.get_or_insert_with(Utc::now);
            let cache_key = format!("{}{}", CODE_CACHE_PREFIX, record.authentication_code);
            if let Ok(raw) = serde_json::to_string(&record) {
                if let Err(e) = cache.set(&cache_key, &raw, cache_ttl).await {
                    warn!(error = %e, "Failed to refresh cached code record");
                }
            }

            let event = NewVerificationEvent {
                code_id: Some(record.code_id),
                api_key_id,
                location: request.location,
                result: outcome.status(),
                confidence: outcome.confidence(),
                is_duplicate: outcome.is_duplicate(),
                is_offline: outcome.is_offline(),
            };
            if let Err(e) = store.record_event(&event).await {
                error!(error = %e, "Failed to record verification event");
            }

            Ok(outcome)
        });

        handle
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Commit task failed: {}", e)))?
    }

    /// Audit trail for invalid scans and revoked/expired verdicts. Event
    /// write failure is logged, never surfaced.
    async fn finalize_unresolved(
        &self,
        ctx: &ApiKeyContext,
        request: &ScanRequest,
        code_id: Option<uuid::Uuid>,
    ) -> Result<(), AppError> {
        let event = NewVerificationEvent {
            code_id,
            api_key_id: ctx.api_key_id,
            location: request.location,
            result: crate::models::VerificationStatus::Invalid,
            confidence: 0.0,
            is_duplicate: false,
            is_offline: request.is_offline,
        };
        self.record_event_detached(event).await
    }

    async fn finalize_terminal(
        &self,
        ctx: &ApiKeyContext,
        request: &ScanRequest,
        record: &CodeRecord,
        outcome: &VerificationOutcome,
    ) -> Result<(), AppError> {
        let event = NewVerificationEvent {
            code_id: Some(record.code_id),
            api_key_id: ctx.api_key_id,
            location: request.location,
            result: outcome.status(),
            confidence: outcome.confidence(),
            is_duplicate: false,
            is_offline: request.is_offline,
        };
        self.record_event_detached(event).await
    }

    async fn record_event_detached(&self, event: NewVerificationEvent) -> Result<(), AppError> {
        let store = self.store.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = store.record_event(&event).await {
                error!(error = %e, "Failed to record verification event");
            }
        });
        handle
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Audit task failed: {}", e)))
    }
}
