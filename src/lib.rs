pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::middleware::from_fn_with_state;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use services::cache::VerificationCache;
use services::database::CodeStore;
use services::{
    AnomalyDetector, CodeGenerator, Database, RateLimiter, RedisCache, VerificationPipeline,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub cache: Arc<dyn VerificationCache>,
    pub pipeline: Arc<VerificationPipeline>,
    pub generator: CodeGenerator,
    pub rate_limiter: RateLimiter,
}

pub struct Application {
    port: u16,
    listener: tokio::net::TcpListener,
    router: Router,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        services::metrics::init_metrics();

        let db = Database::new(&config.database).await?;
        db.run_migrations().await?;

        let cache: Arc<dyn VerificationCache> = Arc::new(RedisCache::new(&config.redis).await?);
        let store: Arc<dyn CodeStore> = Arc::new(db.clone());

        let rate_limiter = RateLimiter::new(cache.clone(), config.rate_limit.clone());
        let detector = AnomalyDetector::new(store.clone(), cache.clone(), config.anomaly.clone());
        let pipeline = Arc::new(VerificationPipeline::new(
            store,
            cache.clone(),
            detector,
            rate_limiter.clone(),
            config.cache.code_ttl_seconds,
        ));
        let generator = CodeGenerator::new(config.security.code_secret.clone());

        let state = AppState {
            config: config.clone(),
            db,
            cache,
            pipeline,
            generator,
            rate_limiter,
        };

        let api_routes = Router::new()
            .route("/verify", post(handlers::verification::verify))
            .route(
                "/verify/sync",
                post(handlers::verification::sync_verifications),
            )
            .route(
                "/verify/generate",
                post(handlers::verification::generate_codes),
            )
            .route(
                "/batches",
                post(handlers::batches::create_batch).get(handlers::batches::list_batches),
            )
            .route(
                "/batches/:batch_id",
                get(handlers::batches::get_batch).put(handlers::batches::update_batch),
            )
            .route(
                "/batches/:batch_id/revoke",
                post(handlers::batches::revoke_batch),
            )
            .route("/stats", get(handlers::stats::verification_stats))
            .layer(from_fn_with_state(
                state.clone(),
                middleware::require_api_key,
            ));

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/metrics", get(handlers::metrics))
            .nest("/api", api_routes)
            .layer(cors_layer(&config))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }),
            )
            .with_state(state);

        // Bound here so tests can ask for port 0 and read the real port.
        let listener = tokio::net::TcpListener::bind(format!(
            "{}:{}",
            config.server.host, config.server.port
        ))
        .await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        tracing::info!("Listening on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.router).await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.security.allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .security
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
