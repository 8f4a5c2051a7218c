//! Scan verification handlers.

use axum::{extract::State, Json};
use validator::Validate;

use crate::dtos::{
    GenerateCodesRequest, GenerateCodesResponse, SyncRequest, SyncResponse, SyncResultEntry,
    VerifyRequest, VerifyResponse,
};
use crate::error::AppError;
use crate::middleware::ApiKeyContext;
use crate::services::metrics::{CODES_GENERATED, VERIFICATIONS_TOTAL, VERIFICATION_DURATION};
use crate::services::pipeline::ScanRequest;
use crate::AppState;

/// Verify a single scanned code.
pub async fn verify(
    State(state): State<AppState>,
    ctx: ApiKeyContext,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    payload.validate()?;

    let timer = VERIFICATION_DURATION.start_timer();
    let outcome = state
        .pipeline
        .verify(
            &ctx,
            ScanRequest {
                code: payload.code,
                location: payload.location.as_ref().map(Into::into),
                is_offline: payload.is_offline,
            },
        )
        .await?;
    timer.observe_duration();

    VERIFICATIONS_TOTAL
        .with_label_values(&[outcome.status().as_str()])
        .inc();

    tracing::info!(
        status = %outcome.status(),
        confidence = outcome.confidence(),
        manufacturer = %ctx.manufacturer_id,
        "Verification completed"
    );

    Ok(Json(VerifyResponse::from(outcome)))
}

/// Replay scans a client queued while offline. Each scan is verified
/// independently; one bad scan never sinks the rest of the batch.
pub async fn sync_verifications(
    State(state): State<AppState>,
    ctx: ApiKeyContext,
    Json(payload): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, AppError> {
    payload.validate()?;

    let mut results = Vec::with_capacity(payload.verifications.len());
    let mut failed = 0usize;

    for scan in payload.verifications {
        let outcome = state
            .pipeline
            .verify(
                &ctx,
                ScanRequest {
                    code: scan.code.clone(),
                    location: scan.location.as_ref().map(Into::into),
                    is_offline: true,
                },
            )
            .await;

        match outcome {
            Ok(outcome) => {
                VERIFICATIONS_TOTAL
                    .with_label_values(&[outcome.status().as_str()])
                    .inc();
                results.push(SyncResultEntry {
                    code: scan.code,
                    result: Some(VerifyResponse::from(outcome)),
                    error: None,
                });
            }
            Err(e) => {
                failed += 1;
                results.push(SyncResultEntry {
                    code: scan.code,
                    result: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    tracing::info!(
        processed = results.len(),
        failed = failed,
        manufacturer = %ctx.manufacturer_id,
        "Offline sync completed"
    );

    Ok(Json(SyncResponse {
        processed: results.len(),
        failed,
        results,
    }))
}

/// Derive and persist authentication codes for a batch.
pub async fn generate_codes(
    State(state): State<AppState>,
    ctx: ApiKeyContext,
    Json(payload): Json<GenerateCodesRequest>,
) -> Result<Json<GenerateCodesResponse>, AppError> {
    payload.validate()?;

    let batch = state
        .db
        .get_batch(ctx.manufacturer_uuid, &payload.batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;

    if batch.batch.status != "active" {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Cannot generate codes for a revoked batch"
        )));
    }

    let codes = state.generator.generate_for_batch(
        &ctx.manufacturer_id,
        &payload.batch_id,
        payload.start_index,
        payload.quantity,
    );

    let inserted = state.db.insert_codes(batch.batch.id, &codes).await?;
    CODES_GENERATED.inc_by(inserted);

    tracing::info!(
        batch_id = %payload.batch_id,
        requested = payload.quantity,
        generated = inserted,
        manufacturer = %ctx.manufacturer_id,
        "Authentication codes generated"
    );

    Ok(Json(GenerateCodesResponse {
        batch_id: payload.batch_id,
        generated: inserted,
        sample: codes.into_iter().take(10).collect(),
    }))
}
