//! Shared helpers for database-backed integration tests.

use secrecy::Secret;
use uuid::Uuid;

use verification_service::config::{
    AnomalyConfig, CacheConfig, Config, DatabaseConfig, RateLimitConfig, RedisConfig,
    SecurityConfig, ServerConfig,
};
use verification_service::middleware::hash_api_key;
use verification_service::services::Database;
use verification_service::Application;

const TEST_API_KEY_SALT: &str = "test-salt";

pub struct TestApp {
    pub address: String,
    pub db: Database,
    pub api_key: String,
    pub manufacturer_uuid: Uuid,
    pub manufacturer_id: String,
}

impl TestApp {
    /// Boot the whole service on an ephemeral port against the backends in
    /// DATABASE_URL / TEST_REDIS_URL, with one seeded manufacturer and key.
    pub async fn spawn() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for integration tests");
        let redis_url = std::env::var("TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            database: DatabaseConfig {
                url: Secret::new(database_url),
                max_connections: 5,
                min_connections: 1,
            },
            redis: RedisConfig {
                url: Secret::new(redis_url),
            },
            security: SecurityConfig {
                code_secret: Secret::new("test-code-secret".to_string()),
                api_key_hash_secret: Secret::new(TEST_API_KEY_SALT.to_string()),
                allowed_origins: vec!["*".to_string()],
            },
            cache: CacheConfig {
                code_ttl_seconds: 60,
                api_key_ttl_seconds: 60,
            },
            rate_limit: RateLimitConfig {
                requests: 10_000,
                request_window_seconds: 900,
                verifications: 10_000,
                verification_window_seconds: 3600,
            },
            anomaly: AnomalyConfig {
                rapid_repeat_threshold: 5,
                rapid_repeat_window_seconds: 3600,
                geo_velocity_km: 100.0,
                geo_velocity_window_seconds: 3600,
                geo_history_limit: 10,
            },
            service_name: "verification-service-test".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to come up.
        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        let db = test_database().await;
        let (manufacturer_uuid, manufacturer_id) = seed_manufacturer(&db).await;

        let api_key = format!("mk_test_{}", Uuid::new_v4().simple());
        sqlx::query("INSERT INTO api_keys (key_hash, manufacturer_id) VALUES ($1, $2)")
            .bind(hash_api_key(&api_key, TEST_API_KEY_SALT))
            .bind(manufacturer_uuid)
            .execute(db.pool())
            .await
            .expect("Failed to seed API key");

        TestApp {
            address: format!("http://127.0.0.1:{}", port),
            db,
            api_key,
            manufacturer_uuid,
            manufacturer_id,
        }
    }
}

pub async fn test_database() -> Database {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for integration tests");
    let db = Database::new(&DatabaseConfig {
        url: Secret::new(url),
        max_connections: 5,
        min_connections: 1,
    })
    .await
    .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

/// Insert a manufacturer with a unique external id. Returns (uuid, external id).
pub async fn seed_manufacturer(db: &Database) -> (Uuid, String) {
    let external_id = format!("MFR-{}", &Uuid::new_v4().simple().to_string()[..12]);
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO manufacturers (manufacturer_id, name) VALUES ($1, $2) RETURNING id",
    )
    .bind(&external_id)
    .bind("Test Pharma")
    .fetch_one(db.pool())
    .await
    .expect("Failed to seed manufacturer");
    (id, external_id)
}

/// Insert an active API key for a manufacturer. Returns (key uuid, key hash).
pub async fn seed_api_key(db: &Database, manufacturer_uuid: Uuid) -> (Uuid, String) {
    let key_hash = verification_service::middleware::hash_api_key(
        &format!("mk_test_{}", Uuid::new_v4().simple()),
        "test-salt",
    );
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO api_keys (key_hash, manufacturer_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(&key_hash)
    .bind(manufacturer_uuid)
    .fetch_one(db.pool())
    .await
    .expect("Failed to seed API key");
    (id, key_hash)
}

pub fn unique_batch_id() -> String {
    format!("BATCH-{}", &Uuid::new_v4().simple().to_string()[..12])
}
