#![forbid(unsafe_code)]

use exam_adapter::{router, AdapterConfig, AdapterRuntime, SessionHost};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AdapterConfig::from_env();
    let addr = config.socket_addr()?;
    let runtime = AdapterRuntime::from_adapter_config(&config)?;
    let host = SessionHost::start(runtime, config.tick_interval());
    let app = router(host.clone());

    tracing::info!(
        %addr,
        preset = ?config.preset,
        blueprint_path = ?config.blueprint_path,
        document_store_path = ?config.document_store_path,
        tick_interval_ms = config.tick_interval_ms,
        "exam_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    host.shutdown();
    tracing::info!("exam_adapter_http stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
