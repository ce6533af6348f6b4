use anyhow::Result;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod app;
mod core;
mod middleware;
mod models;

use crate::core::{config::Settings, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::new()?;

    info!(
        "Starting memory bridge proxy on {}:{} -> {}",
        settings.server.host,
        settings.server.port,
        settings.upstream_base()
    );

    let state = AppState::from_settings(&settings)?;
    let runtime = state.runtime.clone();
    let app = app::create_app(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    runtime.shutdown();
    info!("Proxy stopped");
    Ok(())
}
