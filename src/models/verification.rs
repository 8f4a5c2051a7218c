//! Verification result and audit-event models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::code::CodeRecord;

/// Terminal classification of a single scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Authentic,
    Duplicate,
    Suspicious,
    Invalid,
    Revoked,
    Expired,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentic => "authentic",
            Self::Duplicate => "duplicate",
            Self::Suspicious => "suspicious",
            Self::Invalid => "invalid",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scan coordinates as supplied by the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Product details echoed back on a resolvable scan. Deliberately absent
/// from `Invalid` responses so cross-tenant lookups leak nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSummary {
    pub manufacturer_id: String,
    pub manufacturer_name: String,
    pub batch_id: String,
    pub product_name: String,
    pub serial_number: String,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
}

impl From<&CodeRecord> for ProductSummary {
    fn from(record: &CodeRecord) -> Self {
        Self {
            manufacturer_id: record.manufacturer_id.clone(),
            manufacturer_name: record.manufacturer_name.clone(),
            batch_id: record.batch_id.clone(),
            product_name: record.product_name.clone(),
            serial_number: record.serial_number.clone(),
            manufacturing_date: record.manufacturing_date,
            expiry_date: record.expiry_date,
        }
    }
}

/// Outcome of one pass through the verification pipeline. Each variant
/// carries only the fields that classification can produce.
#[derive(Debug, Clone)]
pub enum VerificationOutcome {
    Authentic {
        confidence: f64,
        product: ProductSummary,
        is_offline: bool,
    },
    Duplicate {
        confidence: f64,
        product: ProductSummary,
        is_offline: bool,
    },
    Suspicious {
        confidence: f64,
        product: ProductSummary,
        is_duplicate: bool,
        is_offline: bool,
    },
    Invalid,
    Revoked {
        product: ProductSummary,
    },
    Expired {
        product: ProductSummary,
    },
}

impl VerificationOutcome {
    pub fn status(&self) -> VerificationStatus {
        match self {
            Self::Authentic { .. } => VerificationStatus::Authentic,
            Self::Duplicate { .. } => VerificationStatus::Duplicate,
            Self::Suspicious { .. } => VerificationStatus::Suspicious,
            Self::Invalid => VerificationStatus::Invalid,
            Self::Revoked { .. } => VerificationStatus::Revoked,
            Self::Expired { .. } => VerificationStatus::Expired,
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            Self::Authentic { confidence, .. }
            | Self::Duplicate { confidence, .. }
            | Self::Suspicious { confidence, .. } => *confidence,
            Self::Invalid | Self::Revoked { .. } | Self::Expired { .. } => 0.0,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        match self {
            Self::Duplicate { .. } => true,
            Self::Suspicious { is_duplicate, .. } => *is_duplicate,
            _ => false,
        }
    }

    pub fn is_offline(&self) -> bool {
        match self {
            Self::Authentic { is_offline, .. }
            | Self::Duplicate { is_offline, .. }
            | Self::Suspicious { is_offline, .. } => *is_offline,
            _ => false,
        }
    }

    pub fn product(&self) -> Option<&ProductSummary> {
        match self {
            Self::Authentic { product, .. }
            | Self::Duplicate { product, .. }
            | Self::Suspicious { product, .. }
            | Self::Revoked { product }
            | Self::Expired { product } => Some(product),
            Self::Invalid => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Authentic { .. } => "Product verified as authentic",
            Self::Duplicate { .. } => "This code has been verified before",
            Self::Suspicious { .. } => "Suspicious activity detected",
            Self::Invalid => "Authentication code not found",
            Self::Revoked { .. } => "This batch has been revoked",
            Self::Expired { .. } => "This product has expired",
        }
    }
}

/// Append-only record of one verification attempt. `code_id` is `None`
/// when the scanned code resolved to nothing.
#[derive(Debug, Clone)]
pub struct NewVerificationEvent {
    pub code_id: Option<Uuid>,
    pub api_key_id: Uuid,
    pub location: Option<Geolocation>,
    pub result: VerificationStatus,
    pub confidence: f64,
    pub is_duplicate: bool,
    pub is_offline: bool,
}

/// A prior located verification of a code, for geo-velocity checks.
#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct LocatedScan {
    pub latitude: f64,
    pub longitude: f64,
    pub verified_at: DateTime<Utc>,
}
