use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub security: SecurityConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub anomaly: AnomalyConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RedisConfig {
    pub url: Secret<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SecurityConfig {
    /// Process-wide secret mixed into authentication-code derivation.
    pub code_secret: Secret<String>,
    /// Secret mixed into API-key hashing before storage lookup.
    pub api_key_hash_secret: Secret<String>,
    pub allowed_origins: Vec<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct CacheConfig {
    /// TTL for cached code records. Security-relevant: entries cached
    /// by a read racing a batch revocation stay stale up to this long.
    pub code_ttl_seconds: u64,
    pub api_key_ttl_seconds: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RateLimitConfig {
    pub requests: u64,
    pub request_window_seconds: u64,
    pub verifications: u64,
    pub verification_window_seconds: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct AnomalyConfig {
    pub rapid_repeat_threshold: u64,
    pub rapid_repeat_window_seconds: u64,
    pub geo_velocity_km: f64,
    pub geo_velocity_window_seconds: u64,
    pub geo_history_limit: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            server: ServerConfig {
                host: get_env("VERIFICATION_SERVICE_HOST", Some("0.0.0.0"))?,
                port: get_env("VERIFICATION_SERVICE_PORT", Some("8080"))?.parse()?,
            },
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None)?),
                max_connections: get_env("DATABASE_MAX_CONNECTIONS", Some("10"))?.parse()?,
                min_connections: get_env("DATABASE_MIN_CONNECTIONS", Some("1"))?.parse()?,
            },
            redis: RedisConfig {
                url: Secret::new(get_env("REDIS_URL", Some("redis://localhost:6379"))?),
            },
            security: SecurityConfig {
                code_secret: Secret::new(get_env("CODE_GENERATION_SECRET", None)?),
                api_key_hash_secret: Secret::new(get_env("API_KEY_HASH_SECRET", None)?),
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("*"))?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .collect(),
            },
            cache: CacheConfig {
                code_ttl_seconds: get_env("CACHE_CODE_TTL_SECONDS", Some("3600"))?.parse()?,
                api_key_ttl_seconds: get_env("CACHE_API_KEY_TTL_SECONDS", Some("3600"))?.parse()?,
            },
            rate_limit: RateLimitConfig {
                requests: get_env("RATE_LIMIT_REQUESTS", Some("100"))?.parse()?,
                request_window_seconds: get_env("RATE_LIMIT_REQUEST_WINDOW_SECONDS", Some("900"))?
                    .parse()?,
                verifications: get_env("RATE_LIMIT_VERIFICATIONS", Some("1000"))?.parse()?,
                verification_window_seconds: get_env(
                    "RATE_LIMIT_VERIFICATION_WINDOW_SECONDS",
                    Some("3600"),
                )?
                .parse()?,
            },
            anomaly: AnomalyConfig {
                rapid_repeat_threshold: get_env("ANOMALY_RAPID_REPEAT_THRESHOLD", Some("5"))?
                    .parse()?,
                rapid_repeat_window_seconds: get_env(
                    "ANOMALY_RAPID_REPEAT_WINDOW_SECONDS",
                    Some("3600"),
                )?
                .parse()?,
                geo_velocity_km: get_env("ANOMALY_GEO_VELOCITY_KM", Some("100"))?.parse()?,
                geo_velocity_window_seconds: get_env(
                    "ANOMALY_GEO_VELOCITY_WINDOW_SECONDS",
                    Some("3600"),
                )?
                .parse()?,
                geo_history_limit: get_env("ANOMALY_GEO_HISTORY_LIMIT", Some("10"))?.parse()?,
            },
            service_name: get_env("SERVICE_NAME", Some("verification-service"))?,
        })
    }
}

fn get_env(key: &str, default: Option<&str>) -> Result<String> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => Ok(def.to_string()),
            None => Err(anyhow::anyhow!("{} is required but not set", key)),
        },
    }
}
