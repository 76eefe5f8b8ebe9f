use anyhow::Context;

use warden_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_observability::init();

    let config = AppConfig::from_env().context("load configuration")?;
    let app = warden_api::app::build_app(&config).await?;

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "listening");

    let background = app.background;
    axum::serve(listener, app.router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            // Stop the hub first so open WebSockets are closed and do not
            // hold the server open.
            background.shutdown().await;
        })
        .await
        .context("serve")?;

    tracing::info!("server stopped");
    Ok(())
}
