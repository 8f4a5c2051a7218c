//! Batch lifecycle integration tests.
//!
//! Run with a disposable Postgres: DATABASE_URL=... cargo test -- --ignored

mod common;

use chrono::NaiveDate;
use common::{seed_api_key, seed_manufacturer, test_database, unique_batch_id};
use secrecy::Secret;
use uuid::Uuid;

use verification_service::error::AppError;
use verification_service::models::{CreateBatch, UpdateBatch};
use verification_service::services::database::CodeStore;
use verification_service::services::CodeGenerator;

fn create_input(manufacturer_id: Uuid, batch_id: &str) -> CreateBatch {
    CreateBatch {
        manufacturer_id,
        batch_id: batch_id.to_string(),
        product_name: "Amoxicillin 500mg".to_string(),
        product_code: Some("AMX-500".to_string()),
        strength: Some("500mg".to_string()),
        form: Some("capsule".to_string()),
        packaging: Some("blister".to_string()),
        manufacturing_date: NaiveDate::from_ymd_opt(2025, 1, 15),
        expiry_date: NaiveDate::from_ymd_opt(2027, 1, 15),
        total_units: 10_000,
    }
}

#[tokio::test]
#[ignore] // Requires database
async fn create_and_fetch_batch() {
    let db = test_database().await;
    let (mfr, _) = seed_manufacturer(&db).await;
    let batch_id = unique_batch_id();

    let created = db.create_batch(&create_input(mfr, &batch_id)).await.unwrap();
    assert_eq!(created.status, "active");
    assert_eq!(created.batch_id, batch_id);

    let fetched = db.get_batch(mfr, &batch_id).await.unwrap().unwrap();
    assert_eq!(fetched.batch.id, created.id);
    assert_eq!(fetched.code_count, 0);
}

#[tokio::test]
#[ignore] // Requires database
async fn duplicate_batch_id_is_a_conflict() {
    let db = test_database().await;
    let (mfr, _) = seed_manufacturer(&db).await;
    let batch_id = unique_batch_id();

    db.create_batch(&create_input(mfr, &batch_id)).await.unwrap();
    let err = db.create_batch(&create_input(mfr, &batch_id)).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // The same batch id under another manufacturer is fine.
    let (other, _) = seed_manufacturer(&db).await;
    db.create_batch(&create_input(other, &batch_id)).await.unwrap();
}

#[tokio::test]
#[ignore] // Requires database
async fn foreign_batches_are_invisible() {
    let db = test_database().await;
    let (mfr, _) = seed_manufacturer(&db).await;
    let (other, _) = seed_manufacturer(&db).await;
    let batch_id = unique_batch_id();

    db.create_batch(&create_input(mfr, &batch_id)).await.unwrap();
    assert!(db.get_batch(other, &batch_id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires database
async fn partial_update_leaves_other_fields() {
    let db = test_database().await;
    let (mfr, _) = seed_manufacturer(&db).await;
    let batch_id = unique_batch_id();
    db.create_batch(&create_input(mfr, &batch_id)).await.unwrap();

    let updated = db
        .update_batch(
            mfr,
            &batch_id,
            &UpdateBatch {
                product_name: Some("Amoxicillin 250mg".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.product_name, "Amoxicillin 250mg");
    assert_eq!(updated.strength.as_deref(), Some("500mg"));
}

#[tokio::test]
#[ignore] // Requires database
async fn generated_codes_resolve_through_the_store() {
    let db = test_database().await;
    let (mfr, external_id) = seed_manufacturer(&db).await;
    let batch_id = unique_batch_id();
    let batch = db.create_batch(&create_input(mfr, &batch_id)).await.unwrap();

    let generator = CodeGenerator::new(Secret::new("integration-secret".to_string()));
    let codes = generator.generate_for_batch(&external_id, &batch_id, 1, 25);
    let inserted = db.insert_codes(batch.id, &codes).await.unwrap();
    assert_eq!(inserted, 25);

    // Re-inserting the same run changes nothing.
    let reinserted = db.insert_codes(batch.id, &codes).await.unwrap();
    assert_eq!(reinserted, 0);

    let record = db
        .find_code_record(&codes[0].authentication_code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.manufacturer_id, external_id);
    assert_eq!(record.batch_id, batch_id);
    assert_eq!(record.status, "active");
    assert!(record.first_verified_at.is_none());
}

#[tokio::test]
#[ignore] // Requires database
async fn first_verification_claim_is_single_shot() {
    let db = test_database().await;
    let (mfr, external_id) = seed_manufacturer(&db).await;
    let batch_id = unique_batch_id();
    let batch = db.create_batch(&create_input(mfr, &batch_id)).await.unwrap();

    let generator = CodeGenerator::new(Secret::new("integration-secret".to_string()));
    let codes = generator.generate_for_batch(&external_id, &batch_id, 1, 1);
    db.insert_codes(batch.id, &codes).await.unwrap();
    let record = db
        .find_code_record(&codes[0].authentication_code)
        .await
        .unwrap()
        .unwrap();

    assert!(db.mark_first_verified(record.code_id).await.unwrap());
    assert!(!db.mark_first_verified(record.code_id).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires database
async fn revocation_cascades_to_codes_in_one_transaction() {
    let db = test_database().await;
    let (mfr, external_id) = seed_manufacturer(&db).await;
    let batch_id = unique_batch_id();
    let batch = db.create_batch(&create_input(mfr, &batch_id)).await.unwrap();

    let generator = CodeGenerator::new(Secret::new("integration-secret".to_string()));
    let codes = generator.generate_for_batch(&external_id, &batch_id, 1, 10);
    db.insert_codes(batch.id, &codes).await.unwrap();

    let revoked = db.revoke_batch(mfr, &batch_id).await.unwrap().unwrap();
    assert_eq!(revoked.len(), 10);

    let record = db
        .find_code_record(&codes[0].authentication_code)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, "revoked");

    // Revoking again finds no active batch.
    assert!(db.revoke_batch(mfr, &batch_id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore] // Requires database
async fn api_key_lookup_resolves_manufacturer() {
    let db = test_database().await;
    let (mfr, external_id) = seed_manufacturer(&db).await;
    let (key_id, key_hash) = seed_api_key(&db, mfr).await;

    let ctx = db.find_api_key(&key_hash).await.unwrap().unwrap();
    assert_eq!(ctx.api_key_id, key_id);
    assert_eq!(ctx.manufacturer_uuid, mfr);
    assert_eq!(ctx.manufacturer_id, external_id);

    assert!(db.find_api_key("no-such-hash").await.unwrap().is_none());
}
