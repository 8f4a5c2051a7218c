//! End-to-end pipeline behavior over in-memory doubles.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use verification_service::config::{AnomalyConfig, RateLimitConfig};
use verification_service::error::AppError;
use verification_service::middleware::ApiKeyContext;
use verification_service::models::{CodeRecord, Geolocation, LocatedScan, VerificationOutcome};
use verification_service::services::database::CodeStore;
use verification_service::services::{
    AnomalyDetector, MockCache, MockCodeStore, RateLimiter, ScanRequest, VerificationPipeline,
};

const CODE: &str = "A1B2C3D4E5F6A7B8C9D0E1F2A3B4C5D6";

fn pipeline_with(
    store: Arc<MockCodeStore>,
    cache: Arc<MockCache>,
    verification_limit: u64,
) -> VerificationPipeline {
    let store_dyn: Arc<dyn CodeStore> = store;
    let detector = AnomalyDetector::new(
        store_dyn.clone(),
        cache.clone(),
        AnomalyConfig {
            rapid_repeat_threshold: 5,
            rapid_repeat_window_seconds: 3600,
            geo_velocity_km: 100.0,
            geo_velocity_window_seconds: 3600,
            geo_history_limit: 10,
        },
    );
    let limiter = RateLimiter::new(
        cache.clone(),
        RateLimitConfig {
            requests: 100,
            request_window_seconds: 900,
            verifications: verification_limit,
            verification_window_seconds: 3600,
        },
    );
    VerificationPipeline::new(store_dyn, cache, detector, limiter, 3600)
}

fn context() -> ApiKeyContext {
    ApiKeyContext {
        api_key_id: Uuid::new_v4(),
        manufacturer_uuid: Uuid::new_v4(),
        manufacturer_id: "MFR-001".to_string(),
        manufacturer_name: "Acme Pharma".to_string(),
    }
}

fn record(code: &str, manufacturer_id: &str) -> CodeRecord {
    CodeRecord {
        code_id: Uuid::new_v4(),
        authentication_code: code.to_string(),
        serial_number: "BATCH-2025-001-000001".to_string(),
        status: "active".to_string(),
        first_verified_at: None,
        batch_id: "BATCH-2025-001".to_string(),
        product_name: "Amoxicillin 500mg".to_string(),
        manufacturing_date: Some((Utc::now() - Duration::days(30)).date_naive()),
        expiry_date: Some((Utc::now() + Duration::days(365)).date_naive()),
        manufacturer_id: manufacturer_id.to_string(),
        manufacturer_name: "Acme Pharma".to_string(),
    }
}

fn scan(code: &str) -> ScanRequest {
    ScanRequest {
        code: code.to_string(),
        location: None,
        is_offline: false,
    }
}

#[tokio::test]
async fn first_scan_is_authentic_at_full_confidence() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    store.insert_record(record(CODE, "MFR-001"));
    let pipeline = pipeline_with(store.clone(), cache, 1000);

    let outcome = pipeline.verify(&context(), scan(CODE)).await.unwrap();

    assert!(matches!(
        outcome,
        VerificationOutcome::Authentic { confidence, .. } if confidence == 1.0
    ));

    let events = store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result.as_str(), "authentic");
    assert!(!events[0].is_duplicate);
}

#[tokio::test]
async fn dashed_lowercase_input_matches_stored_code() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    store.insert_record(record(CODE, "MFR-001"));
    let pipeline = pipeline_with(store, cache, 1000);

    let dashed = "a1b2-c3d4-e5f6-a7b8-c9d0-e1f2-a3b4-c5d6";
    let outcome = pipeline.verify(&context(), scan(dashed)).await.unwrap();

    assert!(matches!(outcome, VerificationOutcome::Authentic { .. }));
}

#[tokio::test]
async fn second_scan_is_a_duplicate() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    store.insert_record(record(CODE, "MFR-001"));
    let pipeline = pipeline_with(store, cache, 1000);
    let ctx = context();

    pipeline.verify(&ctx, scan(CODE)).await.unwrap();
    let outcome = pipeline.verify(&ctx, scan(CODE)).await.unwrap();

    assert!(matches!(
        outcome,
        VerificationOutcome::Duplicate { confidence, .. } if (confidence - 0.7).abs() < 1e-9
    ));
}

#[tokio::test]
async fn offline_scan_loses_a_fifth_of_confidence() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    store.insert_record(record(CODE, "MFR-001"));
    let pipeline = pipeline_with(store, cache, 1000);

    let outcome = pipeline
        .verify(
            &context(),
            ScanRequest {
                code: CODE.to_string(),
                location: None,
                is_offline: true,
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        VerificationOutcome::Authentic { confidence, is_offline: true, .. }
            if (confidence - 0.8).abs() < 1e-9
    ));
}

#[tokio::test]
async fn unknown_code_is_invalid_and_still_audited() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    let pipeline = pipeline_with(store.clone(), cache, 1000);

    let outcome = pipeline.verify(&context(), scan(CODE)).await.unwrap();

    assert!(matches!(outcome, VerificationOutcome::Invalid));
    assert!(outcome.product().is_none());

    let events = store.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result.as_str(), "invalid");
    assert!(events[0].code_id.is_none());
}

#[tokio::test]
async fn foreign_manufacturer_code_is_indistinguishable_from_unknown() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    store.insert_record(record(CODE, "MFR-002"));
    let pipeline = pipeline_with(store, cache, 1000);

    // Caller authenticates as MFR-001.
    let outcome = pipeline.verify(&context(), scan(CODE)).await.unwrap();

    assert!(matches!(outcome, VerificationOutcome::Invalid));
    assert!(outcome.product().is_none());
}

#[tokio::test]
async fn revoked_code_reports_revoked() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    let mut rec = record(CODE, "MFR-001");
    rec.status = "revoked".to_string();
    store.insert_record(rec);
    let pipeline = pipeline_with(store.clone(), cache, 1000);

    let outcome = pipeline.verify(&context(), scan(CODE)).await.unwrap();

    assert!(matches!(outcome, VerificationOutcome::Revoked { .. }));
    assert!(outcome.product().is_some());
    assert_eq!(store.events()[0].result.as_str(), "revoked");
}

#[tokio::test]
async fn expiry_takes_precedence_over_duplicate() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    let mut rec = record(CODE, "MFR-001");
    rec.expiry_date = Some((Utc::now() - Duration::days(1)).date_naive());
    rec.first_verified_at = Some(Utc::now() - Duration::days(10));
    store.insert_record(rec);
    let pipeline = pipeline_with(store, cache, 1000);

    let outcome = pipeline.verify(&context(), scan(CODE)).await.unwrap();

    assert!(matches!(outcome, VerificationOutcome::Expired { .. }));
}

#[tokio::test]
async fn distant_repeat_scan_is_suspicious_not_duplicate() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    let mut rec = record(CODE, "MFR-001");
    rec.first_verified_at = Some(Utc::now() - Duration::minutes(20));
    let code_id = rec.code_id;
    store.insert_record(rec);
    // Scanned in Lagos twenty minutes ago.
    store.push_history(
        code_id,
        LocatedScan {
            latitude: 6.5244,
            longitude: 3.3792,
            verified_at: Utc::now() - Duration::minutes(20),
        },
    );
    let pipeline = pipeline_with(store, cache, 1000);

    // Now scanned in Abuja, ~536 km away.
    let outcome = pipeline
        .verify(
            &context(),
            ScanRequest {
                code: CODE.to_string(),
                location: Some(Geolocation {
                    latitude: 9.0765,
                    longitude: 7.3986,
                }),
                is_offline: false,
            },
        )
        .await
        .unwrap();

    // Duplicate and geo-velocity penalties stack to 0.3, below the
    // suspicion threshold.
    assert!(matches!(
        outcome,
        VerificationOutcome::Suspicious { confidence, is_duplicate: true, .. }
            if (confidence - 0.3).abs() < 1e-9
    ));
}

#[tokio::test]
async fn concurrent_first_scans_yield_exactly_one_authentic() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    store.insert_record(record(CODE, "MFR-001"));
    let pipeline = Arc::new(pipeline_with(store, cache, 1000));
    let ctx = context();

    let (a, b) = tokio::join!(
        pipeline.verify(&ctx, scan(CODE)),
        pipeline.verify(&ctx, scan(CODE)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let authentic = [&a, &b]
        .iter()
        .filter(|o| matches!(o, VerificationOutcome::Authentic { .. }))
        .count();
    let duplicate = [&a, &b]
        .iter()
        .filter(|o| matches!(o, VerificationOutcome::Duplicate { .. }))
        .count();
    assert_eq!(authentic, 1);
    assert_eq!(duplicate, 1);
}

#[tokio::test]
async fn rate_limit_trips_before_the_store_is_touched() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    store.insert_record(record(CODE, "MFR-001"));
    let pipeline = pipeline_with(store.clone(), cache, 2);
    let ctx = context();

    pipeline.verify(&ctx, scan(CODE)).await.unwrap();
    pipeline.verify(&ctx, scan(CODE)).await.unwrap();
    let err = pipeline.verify(&ctx, scan(CODE)).await.unwrap_err();

    assert!(matches!(err, AppError::TooManyRequests(_, _)));
    // Third attempt was rejected without a lookup: only the first scan hit
    // the store, the second was served from cache.
    assert_eq!(store.lookup_count(), 1);
}

#[tokio::test]
async fn resolved_codes_are_written_through_to_the_cache() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    store.insert_record(record(CODE, "MFR-001"));
    let pipeline = pipeline_with(store.clone(), cache.clone(), 1000);

    pipeline.verify(&context(), scan(CODE)).await.unwrap();

    assert!(cache.contains(&format!("auth_code:{}", CODE)));

    // Second scan is served from cache.
    pipeline.verify(&context(), scan(CODE)).await.unwrap();
    assert_eq!(store.lookup_count(), 1);
}

#[tokio::test]
async fn cache_outage_degrades_to_store_lookups() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    cache.set_failing(true);
    store.insert_record(record(CODE, "MFR-001"));
    let pipeline = pipeline_with(store.clone(), cache, 1000);

    let outcome = pipeline.verify(&context(), scan(CODE)).await.unwrap();

    assert!(matches!(outcome, VerificationOutcome::Authentic { .. }));
    assert_eq!(store.lookup_count(), 1);
}

#[tokio::test]
async fn store_outage_is_fatal() {
    let store = Arc::new(MockCodeStore::new());
    let cache = Arc::new(MockCache::new());
    store.set_failing(true);
    let pipeline = pipeline_with(store, cache, 1000);

    let err = pipeline.verify(&context(), scan(CODE)).await.unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)));
}
