//! Batch models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Active,
    Revoked,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A manufacturing batch. Identified externally by (manufacturer, batch_id).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub manufacturer_id: Uuid,
    pub batch_id: String,
    pub product_name: String,
    pub product_code: Option<String>,
    pub strength: Option<String>,
    pub form: Option<String>,
    pub packaging: Option<String>,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub total_units: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// Expiry is derived, not a stored status.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.map(|d| d < today).unwrap_or(false)
    }
}

/// Batch with aggregate code counters, as returned by list/get queries.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BatchWithCounts {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub batch: Batch,
    pub code_count: i64,
    pub verified_count: i64,
    pub revoked_count: i64,
}

/// Input for batch creation.
#[derive(Debug, Clone)]
pub struct CreateBatch {
    pub manufacturer_id: Uuid,
    pub batch_id: String,
    pub product_name: String,
    pub product_code: Option<String>,
    pub strength: Option<String>,
    pub form: Option<String>,
    pub packaging: Option<String>,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub total_units: i32,
}

/// Partial update of batch metadata. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateBatch {
    pub product_name: Option<String>,
    pub product_code: Option<String>,
    pub strength: Option<String>,
    pub form: Option<String>,
    pub packaging: Option<String>,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub total_units: Option<i32>,
}
