use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verification_service::{config::Config, Application};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,verification_service=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    let application = Application::build(config).await?;
    application.run_until_stopped().await?;

    Ok(())
}
