//! refdesk-assist service entry point.

use anyhow::Result;
use refdesk_assist::{build_router, AppState, AssistService, OpenAiGateway};
use refdesk_common::config::Config;
use refdesk_common::logging::init_logging_with_exclusions;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = Config::load_with_env()?;
    config.validate()?;
    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Refdesk Assist v{}", env!("CARGO_PKG_VERSION"));

    let gateway = Arc::new(OpenAiGateway::from_config(&config.provider)?);
    let addr = config.listen_address();
    let service = Arc::new(AssistService::new(gateway, config));

    match service.prepare_profile().await {
        Ok(profile) => tracing::info!(
            profile_id = %profile.id,
            reused = profile.reused,
            "Assistant profile ready"
        ),
        Err(e) => tracing::error!(
            error = %e,
            "Could not resolve assistant profile, will retry on first request"
        ),
    }

    let janitor = Arc::new(service.janitor()).spawn();
    let app = build_router(AppState::new(Arc::clone(&service)));

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    janitor.stop().await;
    tracing::info!("Service stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
