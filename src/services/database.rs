//! Postgres-backed code store.
//!
//! `Database` owns the connection pool and every query the service runs.
//! The subset the verification pipeline needs is behind the [`CodeStore`]
//! trait so the pipeline can be driven by test doubles.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use secrecy::ExposeSecret;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::AppError;
use crate::middleware::ApiKeyContext;
use crate::models::{
    Batch, BatchWithCounts, CodeRecord, CreateBatch, LocatedScan, NewVerificationEvent, UpdateBatch,
};
use crate::services::generator::GeneratedCode;
use crate::services::metrics::DB_QUERY_DURATION;

/// Storage operations the verification pipeline depends on.
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Authoritative lookup of the denormalized code record.
    async fn find_code_record(&self, code: &str) -> Result<Option<CodeRecord>, AppError>;

    /// Compare-and-set of `first_verified_at`. Returns `true` only for the
    /// attempt that actually set it; concurrent losers get `false`.
    async fn mark_first_verified(&self, code_id: Uuid) -> Result<bool, AppError>;

    /// Append one verification event to the audit trail.
    async fn record_event(&self, event: &NewVerificationEvent) -> Result<(), AppError>;

    /// Most recent located verifications of a code within `window_seconds`,
    /// newest first, bounded by `limit`.
    async fn recent_located_scans(
        &self,
        code_id: Uuid,
        window_seconds: u64,
        limit: i64,
    ) -> Result<Vec<LocatedScan>, AppError>;
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct VerificationSummary {
    pub total_verifications: i64,
    pub authentic_count: i64,
    pub suspicious_count: i64,
    pub invalid_count: i64,
    pub duplicate_count: i64,
    pub offline_count: i64,
    pub avg_confidence: Option<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DailyVerificationStats {
    pub date: NaiveDate,
    pub total: i64,
    pub authentic_count: i64,
    pub suspicious_count: i64,
    pub invalid_count: i64,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(config), fields(service = "verification-service"))]
    pub async fn new(config: &DatabaseConfig) -> Result<Self, AppError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(config.url.expose_secret())
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // API key operations
    // -------------------------------------------------------------------------

    /// Resolve an API key hash to its owning manufacturer. Inactive and
    /// expired keys resolve to `None`.
    #[instrument(skip(self, key_hash))]
    pub async fn find_api_key(&self, key_hash: &str) -> Result<Option<ApiKeyContext>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_api_key"])
            .start_timer();

        let ctx = sqlx::query_as::<_, ApiKeyContext>(
            r#"
            SELECT ak.id AS api_key_id,
                   m.id AS manufacturer_uuid,
                   m.manufacturer_id,
                   m.name AS manufacturer_name
            FROM api_keys ak
            JOIN manufacturers m ON ak.manufacturer_id = m.id
            WHERE ak.key_hash = $1
              AND ak.is_active = TRUE
              AND (ak.expires_at IS NULL OR ak.expires_at > now())
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to look up API key: {}", e)))?;

        timer.observe_duration();

        Ok(ctx)
    }

    // -------------------------------------------------------------------------
    // Batch operations
    // -------------------------------------------------------------------------

    /// Create a new batch. Duplicate (manufacturer, batch_id) is a conflict.
    #[instrument(skip(self, input), fields(batch_id = %input.batch_id))]
    pub async fn create_batch(&self, input: &CreateBatch) -> Result<Batch, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_batch"])
            .start_timer();

        let batch = sqlx::query_as::<_, Batch>(
            r#"
            INSERT INTO batches (manufacturer_id, batch_id, product_name, product_code,
                                 strength, form, packaging, manufacturing_date, expiry_date,
                                 total_units)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id, manufacturer_id, batch_id, product_name, product_code, strength,
                      form, packaging, manufacturing_date, expiry_date, total_units, status,
                      created_at, updated_at
            "#,
        )
        .bind(input.manufacturer_id)
        .bind(&input.batch_id)
        .bind(&input.product_name)
        .bind(&input.product_code)
        .bind(&input.strength)
        .bind(&input.form)
        .bind(&input.packaging)
        .bind(input.manufacturing_date)
        .bind(input.expiry_date)
        .bind(input.total_units)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Batch '{}' already exists for this manufacturer",
                    input.batch_id
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create batch: {}", e)),
        })?;

        timer.observe_duration();

        info!(batch_uuid = %batch.id, batch_id = %batch.batch_id, "Batch created");

        Ok(batch)
    }

    /// List a manufacturer's batches with aggregate code counters.
    #[instrument(skip(self), fields(manufacturer = %manufacturer_uuid))]
    pub async fn list_batches(
        &self,
        manufacturer_uuid: Uuid,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BatchWithCounts>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_batches"])
            .start_timer();

        let limit = limit.clamp(1, 100);

        let batches = sqlx::query_as::<_, BatchWithCounts>(
            r#"
            SELECT b.id, b.manufacturer_id, b.batch_id, b.product_name, b.product_code,
                   b.strength, b.form, b.packaging, b.manufacturing_date, b.expiry_date,
                   b.total_units, b.status, b.created_at, b.updated_at,
                   COUNT(ac.id) AS code_count,
                   COUNT(ac.id) FILTER (WHERE ac.first_verified_at IS NOT NULL) AS verified_count,
                   COUNT(ac.id) FILTER (WHERE ac.status = 'revoked') AS revoked_count
            FROM batches b
            LEFT JOIN authentication_codes ac ON ac.batch_id = b.id
            WHERE b.manufacturer_id = $1
              AND ($2::varchar IS NULL OR b.status = $2)
            GROUP BY b.id
            ORDER BY b.created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(manufacturer_uuid)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list batches: {}", e)))?;

        timer.observe_duration();

        Ok(batches)
    }

    /// Get one batch with counters. Scoped to the manufacturer, so foreign
    /// batch ids resolve to `None`.
    #[instrument(skip(self), fields(manufacturer = %manufacturer_uuid, batch_id = %batch_id))]
    pub async fn get_batch(
        &self,
        manufacturer_uuid: Uuid,
        batch_id: &str,
    ) -> Result<Option<BatchWithCounts>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_batch"])
            .start_timer();

        let batch = sqlx::query_as::<_, BatchWithCounts>(
            r#"
            SELECT b.id, b.manufacturer_id, b.batch_id, b.product_name, b.product_code,
                   b.strength, b.form, b.packaging, b.manufacturing_date, b.expiry_date,
                   b.total_units, b.status, b.created_at, b.updated_at,
                   COUNT(ac.id) AS code_count,
                   COUNT(ac.id) FILTER (WHERE ac.first_verified_at IS NOT NULL) AS verified_count,
                   COUNT(ac.id) FILTER (WHERE ac.status = 'revoked') AS revoked_count
            FROM batches b
            LEFT JOIN authentication_codes ac ON ac.batch_id = b.id
            WHERE b.manufacturer_id = $1 AND b.batch_id = $2
            GROUP BY b.id
            "#,
        )
        .bind(manufacturer_uuid)
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get batch: {}", e)))?;

        timer.observe_duration();

        Ok(batch)
    }

    /// Internal UUID of a batch, if it belongs to the manufacturer.
    pub async fn find_batch_uuid(
        &self,
        manufacturer_uuid: Uuid,
        batch_id: &str,
    ) -> Result<Option<Uuid>, AppError> {
        sqlx::query_scalar(
            "SELECT id FROM batches WHERE manufacturer_id = $1 AND batch_id = $2",
        )
        .bind(manufacturer_uuid)
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find batch: {}", e)))
    }

    /// Partial metadata update. Returns `None` when the batch does not exist
    /// for this manufacturer.
    #[instrument(skip(self, changes), fields(manufacturer = %manufacturer_uuid, batch_id = %batch_id))]
    pub async fn update_batch(
        &self,
        manufacturer_uuid: Uuid,
        batch_id: &str,
        changes: &UpdateBatch,
    ) -> Result<Option<Batch>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_batch"])
            .start_timer();

        let batch = sqlx::query_as::<_, Batch>(
            r#"
            UPDATE batches
            SET product_name = COALESCE($3, product_name),
                product_code = COALESCE($4, product_code),
                strength = COALESCE($5, strength),
                form = COALESCE($6, form),
                packaging = COALESCE($7, packaging),
                manufacturing_date = COALESCE($8, manufacturing_date),
                expiry_date = COALESCE($9, expiry_date),
                total_units = COALESCE($10, total_units),
                updated_at = now()
            WHERE manufacturer_id = $1 AND batch_id = $2
            RETURNING id, manufacturer_id, batch_id, product_name, product_code, strength,
                      form, packaging, manufacturing_date, expiry_date, total_units, status,
                      created_at, updated_at
            "#,
        )
        .bind(manufacturer_uuid)
        .bind(batch_id)
        .bind(&changes.product_name)
        .bind(&changes.product_code)
        .bind(&changes.strength)
        .bind(&changes.form)
        .bind(&changes.packaging)
        .bind(changes.manufacturing_date)
        .bind(changes.expiry_date)
        .bind(changes.total_units)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update batch: {}", e)))?;

        timer.observe_duration();

        Ok(batch)
    }

    /// Revoke a batch and cascade the status to every owned code inside a
    /// single transaction: callers observe all-or-nothing. Returns the
    /// authentication codes that were revoked (for cache invalidation), or
    /// `None` when no active batch matched.
    #[instrument(skip(self), fields(manufacturer = %manufacturer_uuid, batch_id = %batch_id))]
    pub async fn revoke_batch(
        &self,
        manufacturer_uuid: Uuid,
        batch_id: &str,
    ) -> Result<Option<Vec<String>>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["revoke_batch"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let batch_uuid: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE batches
            SET status = 'revoked', updated_at = now()
            WHERE manufacturer_id = $1 AND batch_id = $2 AND status = 'active'
            RETURNING id
            "#,
        )
        .bind(manufacturer_uuid)
        .bind(batch_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to revoke batch: {}", e)))?;

        let Some(batch_uuid) = batch_uuid else {
            tx.rollback().await.ok();
            timer.observe_duration();
            return Ok(None);
        };

        let codes: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE authentication_codes
            SET status = 'revoked', revoked_at = now()
            WHERE batch_id = $1 AND status <> 'revoked'
            RETURNING authentication_code
            "#,
        )
        .bind(batch_uuid)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to revoke codes: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit revocation: {}", e))
        })?;

        timer.observe_duration();

        info!(
            batch_id = %batch_id,
            affected_codes = codes.len(),
            "Batch revoked"
        );

        Ok(Some(codes))
    }

    // -------------------------------------------------------------------------
    // Code generation
    // -------------------------------------------------------------------------

    /// Insert generated codes, skipping hash collisions with existing codes.
    /// Returns the number actually inserted, which may be less than the
    /// number requested.
    #[instrument(skip(self, codes), fields(batch = %batch_uuid, requested = codes.len()))]
    pub async fn insert_codes(
        &self,
        batch_uuid: Uuid,
        codes: &[GeneratedCode],
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_codes"])
            .start_timer();

        let mut inserted = 0u64;
        for code in codes {
            let result = sqlx::query(
                r#"
                INSERT INTO authentication_codes (batch_id, serial_number, authentication_code)
                VALUES ($1, $2, $3)
                ON CONFLICT (authentication_code) DO NOTHING
                "#,
            )
            .bind(batch_uuid)
            .bind(&code.serial_number)
            .bind(&code.authentication_code)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert code: {}", e))
            })?;
            inserted += result.rows_affected();
        }

        timer.observe_duration();

        if inserted < codes.len() as u64 {
            tracing::warn!(
                requested = codes.len(),
                inserted = inserted,
                "Skipped colliding authentication codes"
            );
        }

        Ok(inserted)
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    /// Summary of verification activity by this manufacturer's API keys.
    #[instrument(skip(self), fields(manufacturer = %manufacturer_uuid))]
    pub async fn verification_summary(
        &self,
        manufacturer_uuid: Uuid,
        start: Option<chrono::DateTime<Utc>>,
        end: Option<chrono::DateTime<Utc>>,
    ) -> Result<VerificationSummary, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["verification_summary"])
            .start_timer();

        let summary = sqlx::query_as::<_, VerificationSummary>(
            r#"
            SELECT COUNT(*) AS total_verifications,
                   COUNT(*) FILTER (WHERE ve.result = 'authentic') AS authentic_count,
                   COUNT(*) FILTER (WHERE ve.result = 'suspicious') AS suspicious_count,
                   COUNT(*) FILTER (WHERE ve.result = 'invalid') AS invalid_count,
                   COUNT(*) FILTER (WHERE ve.is_duplicate) AS duplicate_count,
                   COUNT(*) FILTER (WHERE ve.is_offline) AS offline_count,
                   AVG(ve.confidence_score) AS avg_confidence
            FROM verification_events ve
            JOIN api_keys ak ON ve.api_key_id = ak.id
            WHERE ak.manufacturer_id = $1
              AND ($2::timestamptz IS NULL OR ve.verified_at >= $2)
              AND ($3::timestamptz IS NULL OR ve.verified_at < $3)
            "#,
        )
        .bind(manufacturer_uuid)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to compute summary: {}", e)))?;

        timer.observe_duration();

        Ok(summary)
    }

    /// Daily verification counts, most recent 30 days first.
    #[instrument(skip(self), fields(manufacturer = %manufacturer_uuid))]
    pub async fn daily_verification_stats(
        &self,
        manufacturer_uuid: Uuid,
        start: Option<chrono::DateTime<Utc>>,
        end: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<DailyVerificationStats>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["daily_verification_stats"])
            .start_timer();

        let rows = sqlx::query_as::<_, DailyVerificationStats>(
            r#"
            SELECT ve.verified_at::date AS date,
                   COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE ve.result = 'authentic') AS authentic_count,
                   COUNT(*) FILTER (WHERE ve.result = 'suspicious') AS suspicious_count,
                   COUNT(*) FILTER (WHERE ve.result = 'invalid') AS invalid_count
            FROM verification_events ve
            JOIN api_keys ak ON ve.api_key_id = ak.id
            WHERE ak.manufacturer_id = $1
              AND ($2::timestamptz IS NULL OR ve.verified_at >= $2)
              AND ($3::timestamptz IS NULL OR ve.verified_at < $3)
            GROUP BY ve.verified_at::date
            ORDER BY date DESC
            LIMIT 30
            "#,
        )
        .bind(manufacturer_uuid)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to compute daily stats: {}", e)))?;

        timer.observe_duration();

        Ok(rows)
    }
}

#[async_trait]
impl CodeStore for Database {
    #[instrument(skip(self, code))]
    async fn find_code_record(&self, code: &str) -> Result<Option<CodeRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_code_record"])
            .start_timer();

        let record = sqlx::query_as::<_, CodeRecord>(
            r#"
            SELECT ac.id AS code_id,
                   ac.authentication_code,
                   ac.serial_number,
                   ac.status,
                   ac.first_verified_at,
                   b.batch_id,
                   b.product_name,
                   b.manufacturing_date,
                   b.expiry_date,
                   m.manufacturer_id,
                   m.name AS manufacturer_name
            FROM authentication_codes ac
            JOIN batches b ON ac.batch_id = b.id
            JOIN manufacturers m ON b.manufacturer_id = m.id
            WHERE ac.authentication_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to look up code: {}", e)))?;

        timer.observe_duration();

        Ok(record)
    }

    async fn mark_first_verified(&self, code_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_first_verified"])
            .start_timer();

        // Conditional update: the row count tells us who won the race.
        let result = sqlx::query(
            r#"
            UPDATE authentication_codes
            SET first_verified_at = now()
            WHERE id = $1 AND first_verified_at IS NULL
            "#,
        )
        .bind(code_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark first verification: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    async fn record_event(&self, event: &NewVerificationEvent) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_event"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO verification_events (authentication_code_id, api_key_id, location_lat,
                                             location_lng, result, confidence_score,
                                             is_duplicate, is_offline)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.code_id)
        .bind(event.api_key_id)
        .bind(event.location.map(|l| l.latitude))
        .bind(event.location.map(|l| l.longitude))
        .bind(event.result.as_str())
        .bind(event.confidence)
        .bind(event.is_duplicate)
        .bind(event.is_offline)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record event: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    async fn recent_located_scans(
        &self,
        code_id: Uuid,
        window_seconds: u64,
        limit: i64,
    ) -> Result<Vec<LocatedScan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["recent_located_scans"])
            .start_timer();

        let scans = sqlx::query_as::<_, LocatedScan>(
            r#"
            SELECT location_lat AS latitude,
                   location_lng AS longitude,
                   verified_at
            FROM verification_events
            WHERE authentication_code_id = $1
              AND verified_at > now() - make_interval(secs => $2)
              AND location_lat IS NOT NULL
              AND location_lng IS NOT NULL
            ORDER BY verified_at DESC
            LIMIT $3
            "#,
        )
        .bind(code_id)
        .bind(window_seconds as f64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load scan history: {}", e)))?;

        timer.observe_duration();

        Ok(scans)
    }
}

/// In-memory code store for pipeline tests.
pub struct MockCodeStore {
    records: std::sync::Mutex<std::collections::HashMap<String, CodeRecord>>,
    events: std::sync::Mutex<Vec<NewVerificationEvent>>,
    history: std::sync::Mutex<std::collections::HashMap<Uuid, Vec<LocatedScan>>>,
    lookups: std::sync::atomic::AtomicU64,
    failing: std::sync::atomic::AtomicBool,
}

impl Default for MockCodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCodeStore {
    pub fn new() -> Self {
        Self {
            records: std::sync::Mutex::new(std::collections::HashMap::new()),
            events: std::sync::Mutex::new(Vec::new()),
            history: std::sync::Mutex::new(std::collections::HashMap::new()),
            lookups: std::sync::atomic::AtomicU64::new(0),
            failing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn insert_record(&self, record: CodeRecord) {
        self.records
            .lock()
            .expect("mock store mutex poisoned")
            .insert(record.authentication_code.clone(), record);
    }

    pub fn push_history(&self, code_id: Uuid, scan: LocatedScan) {
        self.history
            .lock()
            .expect("mock store mutex poisoned")
            .entry(code_id)
            .or_default()
            .push(scan);
    }

    pub fn events(&self) -> Vec<NewVerificationEvent> {
        self.events
            .lock()
            .expect("mock store mutex poisoned")
            .clone()
    }

    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_failing(&self) -> Result<(), AppError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "mock store unavailable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CodeStore for MockCodeStore {
    async fn find_code_record(&self, code: &str) -> Result<Option<CodeRecord>, AppError> {
        self.check_failing()?;
        self.lookups
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let record = self
            .records
            .lock()
            .expect("mock store mutex poisoned")
            .get(code)
            .cloned();
        Ok(record)
    }

    async fn mark_first_verified(&self, code_id: Uuid) -> Result<bool, AppError> {
        self.check_failing()?;
        let mut records = self.records.lock().expect("mock store mutex poisoned");
        for record in records.values_mut() {
            if record.code_id == code_id {
                if record.first_verified_at.is_none() {
                    record.first_verified_at = Some(Utc::now());
                    return Ok(true);
                }
                return Ok(false);
            }
        }
        Ok(false)
    }

    async fn record_event(&self, event: &NewVerificationEvent) -> Result<(), AppError> {
        self.check_failing()?;
        self.events
            .lock()
            .expect("mock store mutex poisoned")
            .push(event.clone());
        Ok(())
    }

    async fn recent_located_scans(
        &self,
        code_id: Uuid,
        window_seconds: u64,
        limit: i64,
    ) -> Result<Vec<LocatedScan>, AppError> {
        self.check_failing()?;
        let cutoff = Utc::now() - chrono::Duration::seconds(window_seconds as i64);
        let mut scans: Vec<LocatedScan> = self
            .history
            .lock()
            .expect("mock store mutex poisoned")
            .get(&code_id)
            .map(|v| {
                v.iter()
                    .filter(|s| s.verified_at > cutoff)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        scans.sort_by(|a, b| b.verified_at.cmp(&a.verified_at));
        scans.truncate(limit as usize);
        Ok(scans)
    }
}
