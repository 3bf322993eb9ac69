use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;

use vigil_adapter_analytics::MemoryCache;
use vigil_application::{Shutdown, ShutdownTrigger};
use vigil_domain::VigilConfig;
use vigil_ports::SystemClock;

use super::bootstrap::Services;
use crate::api;

/// Runs every worker and the HTTP server until a termination signal.
pub async fn run(config: VigilConfig) -> Result<()> {
    let services = Services::connect(&config, Arc::new(SystemClock)).await?;
    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;
    tracing::info!(addr = %config.server.listen_addr, "listening");

    let (trigger, shutdown) = Shutdown::new();
    serve(&config, services, listener, trigger, shutdown_signal()).await
}

/// Spawns the workers, serves until `stop` resolves, then drains within the
/// configured grace period.
pub async fn serve(
    config: &VigilConfig,
    services: Services,
    listener: TcpListener,
    trigger: ShutdownTrigger,
    stop: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let shutdown = trigger.subscribe();
    let mut workers = JoinSet::new();
    workers.spawn(services.ingestor.clone().run(shutdown.clone()));
    workers.spawn(services.dispatcher.clone().run_listener(shutdown.clone()));
    workers.spawn(purge_expired(
        services.cache.clone(),
        Duration::from_secs(config.cache.purge_interval_secs.max(1)),
        shutdown.clone(),
    ));

    let app = api::router(services.app_state());
    let server_shutdown = shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.wait().await })
            .await
    });

    tokio::select! {
        _ = stop => tracing::info!("shutdown signal received"),
        finished = &mut server => {
            tracing::error!(result = ?finished, "http server exited early");
        }
    }
    trigger.trigger();

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    let drained = tokio::time::timeout(grace, async {
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "worker panicked");
            }
        }
        if !server.is_finished() {
            match (&mut server).await {
                Ok(Err(err)) => tracing::error!(error = %err, "http server failed"),
                Err(err) => tracing::error!(error = %err, "http server task panicked"),
                Ok(Ok(())) => {}
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!(grace_secs = grace.as_secs(), "workers did not stop in time, aborting");
        workers.abort_all();
        server.abort();
    }
    tracing::info!("stopped");
    Ok(())
}

async fn purge_expired(cache: Arc<MemoryCache>, every: Duration, shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => match cache.purge_expired() {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "purged expired cache entries"),
                Err(err) => tracing::warn!(error = %err, "cache purge failed"),
            },
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
