pub mod anomaly;
pub mod cache;
pub mod database;
pub mod generator;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;

pub use anomaly::AnomalyDetector;
pub use cache::{MockCache, RedisCache, VerificationCache};
pub use database::{CodeStore, Database, MockCodeStore};
pub use generator::CodeGenerator;
pub use pipeline::{ScanRequest, VerificationPipeline};
pub use rate_limit::RateLimiter;
