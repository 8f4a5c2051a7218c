//! Verification statistics for manufacturer dashboards.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::dtos::{StatsQuery, StatsResponse};
use crate::error::AppError;
use crate::middleware::ApiKeyContext;
use crate::AppState;

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

pub async fn verification_stats(
    State(state): State<AppState>,
    ctx: ApiKeyContext,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, AppError> {
    let start = query.start_date.map(day_start);
    // End bound is exclusive midnight of the following day.
    let end = query.end_date.map(|d| day_start(d) + Duration::days(1));

    if let (Some(s), Some(e)) = (start, end) {
        if e <= s {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "end_date must not precede start_date"
            )));
        }
    }

    let summary = state
        .db
        .verification_summary(ctx.manufacturer_uuid, start, end)
        .await?;
    let daily = state
        .db
        .daily_verification_stats(ctx.manufacturer_uuid, start, end)
        .await?;

    Ok(Json(StatsResponse { summary, daily }))
}
