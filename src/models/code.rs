//! Authentication code models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a single authentication code.
///
/// Transitions only active -> revoked, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Active,
    Revoked,
}

impl CodeStatus {
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

impl std::fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One issued authentication code as stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuthenticationCode {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub serial_number: String,
    pub authentication_code: String,
    pub status: String,
    pub first_verified_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Denormalized code + batch + manufacturer join used by the verification
/// pipeline. This is the unit cached under `auth_code:{code}`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CodeRecord {
    pub code_id: Uuid,
    pub authentication_code: String,
    pub serial_number: String,
    pub status: String,
    pub first_verified_at: Option<DateTime<Utc>>,
    pub batch_id: String,
    pub product_name: String,
    pub manufacturing_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub manufacturer_id: String,
    pub manufacturer_name: String,
}

impl CodeRecord {
    pub fn is_revoked(&self) -> bool {
        CodeStatus::parse(&self.status) == Some(CodeStatus::Revoked)
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.map(|d| d < today).unwrap_or(false)
    }
}
