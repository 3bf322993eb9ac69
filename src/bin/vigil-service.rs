use tracing_subscriber::EnvFilter;

use vigil::runtime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "vigil starting");
    let config = runtime::load_config()?;
    runtime::run(config).await
}
