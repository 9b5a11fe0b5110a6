use anyhow::Result;
use axum::serve;
use multiclient_core::{config::AppConfig, engine::MultiClientBuilder};
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging(config: &AppConfig) {
    let level = config.logging.level.as_str();
    let default_filter = format!("warn,multiclient_core={level},server={level},tower_http={level}");

    let filter = match std::env::var("RUST_LOG").as_deref() {
        Ok("debug") => EnvFilter::new("warn,multiclient_core=debug,server=debug,tower_http=debug"),
        Ok("trace") => EnvFilter::new("warn,multiclient_core=trace,server=trace,tower_http=trace"),
        Ok(_) => EnvFilter::try_from_env("RUST_LOG")
            .unwrap_or_else(|_| EnvFilter::new(&default_filter)),
        Err(_) => EnvFilter::new(&default_filter),
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config =
        AppConfig::load().map_err(|e| anyhow::anyhow!("Configuration loading failed: {e}"))?;

    init_logging(&config);
    info!("Starting multiclient server");
    debug!(
        engines = config.engines.len(),
        retry_budget = config.policy.retry_budget,
        bind_port = config.server.bind_port,
        "Configuration loaded"
    );

    let client = Arc::new(
        MultiClientBuilder::from_config(&config)
            .and_then(MultiClientBuilder::build)
            .map_err(|e| anyhow::anyhow!("Engine pool initialization failed: {e}"))?,
    );
    client.start();
    info!(engines = client.pool_status().len(), "Engine pool started");

    let app = server::create_app(Arc::clone(&client), &config);
    let addr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "HTTP server listening");

    if let Err(e) = serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "Server error occurred");
    }

    client.shutdown();
    info!("Server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
