//! Request and response bodies for the HTTP surface.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    Geolocation, ProductSummary, UpdateBatch, VerificationOutcome, VerificationStatus,
};
use crate::services::generator::GeneratedCode;
use crate::services::database::{DailyVerificationStats, VerificationSummary};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GeolocationDto {
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub latitude: f64,
    #[validate(range(
        min = -180.0,
        max = 180.0,
        message = "Longitude must be between -180 and 180"
    ))]
    pub longitude: f64,
}

impl From<&GeolocationDto> for Geolocation {
    fn from(dto: &GeolocationDto) -> Self {
        Self {
            latitude: dto.latitude,
            longitude: dto.longitude,
        }
    }
}

/// Body of `POST /api/verify`. Codes may arrive with printed separators, so
/// the accepted length runs from the bare 32 up to the fully dashed form.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VerifyRequest {
    #[validate(length(min = 32, max = 39, message = "Authentication code must be 32 characters"))]
    pub code: String,
    #[validate(nested)]
    pub location: Option<GeolocationDto>,
    #[serde(default)]
    pub is_offline: bool,
}

/// Terminal statuses (invalid, revoked, expired) report a confidence of
/// zero rather than omitting the key. Product fields are flattened into
/// the top level and absent entirely for unresolvable codes.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResponse {
    pub status: VerificationStatus,
    pub message: &'static str,
    pub confidence: f64,
    #[serde(flatten)]
    pub product: Option<ProductSummary>,
    pub is_duplicate: bool,
    pub is_offline: bool,
    pub verified_at: DateTime<Utc>,
}

impl From<VerificationOutcome> for VerifyResponse {
    fn from(outcome: VerificationOutcome) -> Self {
        Self {
            status: outcome.status(),
            message: outcome.message(),
            confidence: outcome.confidence(),
            product: outcome.product().cloned(),
            is_duplicate: outcome.is_duplicate(),
            is_offline: outcome.is_offline(),
            verified_at: Utc::now(),
        }
    }
}

/// One scan captured while the client was offline.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OfflineScan {
    #[validate(length(min = 32, max = 39, message = "Authentication code must be 32 characters"))]
    pub code: String,
    #[validate(nested)]
    pub location: Option<GeolocationDto>,
    pub scanned_at: Option<DateTime<Utc>>,
}

/// Body of `POST /api/verify/sync`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SyncRequest {
    #[validate(
        length(min = 1, max = 100, message = "Between 1 and 100 scans per sync"),
        nested
    )]
    pub verifications: Vec<OfflineScan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResultEntry {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<VerifyResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResponse {
    pub processed: usize,
    pub failed: usize,
    pub results: Vec<SyncResultEntry>,
}

/// Body of `POST /api/verify/generate`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateCodesRequest {
    #[validate(length(min = 1, max = 64))]
    pub batch_id: String,
    #[validate(range(min = 1, max = 10000, message = "Quantity must be between 1 and 10000"))]
    pub quantity: u32,
    #[serde(default = "default_start_index")]
    pub start_index: u32,
}

fn default_start_index() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateCodesResponse {
    pub batch_id: String,
    pub generated: u64,
    /// First few codes, enough to spot-check printing without dumping the
    /// whole run into the response.
    pub sample: Vec<GeneratedCode>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateBatchRequest {
    #[validate(length(min = 1, max = 64))]
    pub batch_id: String,
    #[validate(length(min = 1, max = 255))]
    pub product_name: String,
    pub product_code: Option<String>,
    pub strength: Option<String>,
    pub form: Option<String>,
    pub packaging: Option<String>,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    #[validate(range(min = 0, max = 10_000_000))]
    #[serde(default)]
    pub total_units: i32,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateBatchRequest {
    #[validate(length(min = 1, max = 255))]
    pub product_name: Option<String>,
    pub product_code: Option<String>,
    pub strength: Option<String>,
    pub form: Option<String>,
    pub packaging: Option<String>,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    #[validate(range(min = 0, max = 10_000_000))]
    pub total_units: Option<i32>,
}

impl From<UpdateBatchRequest> for UpdateBatch {
    fn from(req: UpdateBatchRequest) -> Self {
        Self {
            product_name: req.product_name,
            product_code: req.product_code,
            strength: req.strength,
            form: req.form,
            packaging: req.packaging,
            manufacturing_date: req.manufacturing_date,
            expiry_date: req.expiry_date,
            total_units: req.total_units,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListBatchesQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RevokeBatchRequest {
    #[validate(length(min = 1, max = 500, message = "A revocation reason is required"))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevokeBatchResponse {
    pub batch_id: String,
    pub status: &'static str,
    pub affected_codes: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub summary: VerificationSummary,
    pub daily: Vec<DailyVerificationStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub cache: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_request_rejects_short_codes() {
        let req = VerifyRequest {
            code: "TOO-SHORT".to_string(),
            location: None,
            is_offline: false,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn verify_request_accepts_dashed_codes() {
        let req = VerifyRequest {
            code: "A1B2-C3D4-E5F6-A7B8-C9D0-E1F2-A3B4-C5D6".to_string(),
            location: None,
            is_offline: false,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn out_of_range_latitude_is_rejected() {
        let req = VerifyRequest {
            code: "A".repeat(32),
            location: Some(GeolocationDto {
                latitude: 91.0,
                longitude: 3.0,
            }),
            is_offline: false,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn sync_request_bounds_batch_size() {
        let scan = OfflineScan {
            code: "A".repeat(32),
            location: None,
            scanned_at: None,
        };
        let req = SyncRequest {
            verifications: vec![scan; 101],
        };
        assert!(req.validate().is_err());
    }

    fn product() -> ProductSummary {
        ProductSummary {
            manufacturer_id: "MFR-001".to_string(),
            manufacturer_name: "Acme Pharma".to_string(),
            batch_id: "BATCH-2025-001".to_string(),
            product_name: "Amoxicillin 500mg".to_string(),
            serial_number: "BATCH-2025-001-000001".to_string(),
            manufacturing_date: None,
            expiry_date: None,
        }
    }

    #[test]
    fn terminal_statuses_report_zero_confidence() {
        let revoked = serde_json::to_value(VerifyResponse::from(VerificationOutcome::Revoked {
            product: product(),
        }))
        .unwrap();
        assert_eq!(revoked["confidence"], 0.0);

        let expired = serde_json::to_value(VerifyResponse::from(VerificationOutcome::Expired {
            product: product(),
        }))
        .unwrap();
        assert_eq!(expired["confidence"], 0.0);

        let invalid =
            serde_json::to_value(VerifyResponse::from(VerificationOutcome::Invalid)).unwrap();
        assert_eq!(invalid["confidence"], 0.0);
    }

    #[test]
    fn product_fields_are_flat_on_the_response() {
        let resp = serde_json::to_value(VerifyResponse::from(VerificationOutcome::Authentic {
            confidence: 1.0,
            product: product(),
            is_offline: false,
        }))
        .unwrap();
        assert_eq!(resp["manufacturer_id"], "MFR-001");
        assert_eq!(resp["batch_id"], "BATCH-2025-001");
        assert_eq!(resp["product_name"], "Amoxicillin 500mg");
        assert!(resp.get("product").is_none());

        // Unresolvable codes leak no product keys at all.
        let invalid =
            serde_json::to_value(VerifyResponse::from(VerificationOutcome::Invalid)).unwrap();
        assert!(invalid.get("product_name").is_none());
        assert!(invalid.get("manufacturer_id").is_none());
    }

    #[test]
    fn revocation_requires_a_reason() {
        let req = RevokeBatchRequest {
            reason: String::new(),
        };
        assert!(req.validate().is_err());
    }
}
