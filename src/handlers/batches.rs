//! Batch lifecycle handlers. All operations are scoped to the caller's
//! manufacturer; foreign batches look like they do not exist.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::dtos::{
    CreateBatchRequest, ListBatchesQuery, RevokeBatchRequest, RevokeBatchResponse,
    UpdateBatchRequest,
};
use crate::error::AppError;
use crate::middleware::ApiKeyContext;
use crate::models::{Batch, BatchWithCounts, CreateBatch};
use crate::AppState;

pub async fn create_batch(
    State(state): State<AppState>,
    ctx: ApiKeyContext,
    Json(payload): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<Batch>), AppError> {
    payload.validate()?;

    if let (Some(mfg), Some(exp)) = (payload.manufacturing_date, payload.expiry_date) {
        if exp <= mfg {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Expiry date must be after manufacturing date"
            )));
        }
    }

    let batch = state
        .db
        .create_batch(&CreateBatch {
            manufacturer_id: ctx.manufacturer_uuid,
            batch_id: payload.batch_id,
            product_name: payload.product_name,
            product_code: payload.product_code,
            strength: payload.strength,
            form: payload.form,
            packaging: payload.packaging,
            manufacturing_date: payload.manufacturing_date,
            expiry_date: payload.expiry_date,
            total_units: payload.total_units,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn list_batches(
    State(state): State<AppState>,
    ctx: ApiKeyContext,
    Query(query): Query<ListBatchesQuery>,
) -> Result<Json<Vec<BatchWithCounts>>, AppError> {
    let batches = state
        .db
        .list_batches(
            ctx.manufacturer_uuid,
            query.status.as_deref(),
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0).max(0),
        )
        .await?;

    Ok(Json(batches))
}

pub async fn get_batch(
    State(state): State<AppState>,
    ctx: ApiKeyContext,
    Path(batch_id): Path<String>,
) -> Result<Json<BatchWithCounts>, AppError> {
    let batch = state
        .db
        .get_batch(ctx.manufacturer_uuid, &batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;

    Ok(Json(batch))
}

pub async fn update_batch(
    State(state): State<AppState>,
    ctx: ApiKeyContext,
    Path(batch_id): Path<String>,
    Json(payload): Json<UpdateBatchRequest>,
) -> Result<Json<Batch>, AppError> {
    payload.validate()?;

    let batch = state
        .db
        .update_batch(ctx.manufacturer_uuid, &batch_id, &payload.into())
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Batch not found")))?;

    Ok(Json(batch))
}

/// Revoke a batch and every code in it, then drop the revoked codes from
/// the cache so the new status is visible immediately rather than after
/// TTL expiry.
pub async fn revoke_batch(
    State(state): State<AppState>,
    ctx: ApiKeyContext,
    Path(batch_id): Path<String>,
    Json(payload): Json<RevokeBatchRequest>,
) -> Result<Json<RevokeBatchResponse>, AppError> {
    payload.validate()?;

    let codes = state
        .db
        .revoke_batch(ctx.manufacturer_uuid, &batch_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Active batch not found")))?;

    for code in &codes {
        let cache_key = format!("auth_code:{}", code);
        if let Err(e) = state.cache.delete(&cache_key).await {
            // Stale entries age out at the TTL; the store stays correct.
            tracing::warn!(error = %e, "Failed to invalidate cached code");
        }
    }

    tracing::info!(
        batch_id = %batch_id,
        affected_codes = codes.len(),
        reason = %payload.reason,
        manufacturer = %ctx.manufacturer_id,
        "Batch revoked"
    );

    Ok(Json(RevokeBatchResponse {
        batch_id,
        status: "revoked",
        affected_codes: codes.len(),
        reason: payload.reason,
    }))
}
