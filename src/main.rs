use std::net::SocketAddr;

use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use cirkle::config::Config;
use cirkle::database;
use cirkle::web::{self, state::AppState};

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("❌ {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    config.log_summary();

    let pool = database::connect(&config.database_url).await?;
    tracing::info!("🗄️  Database ready (schema v{})", database::schema::latest_version());

    let host = config.host.clone();
    let port = config.port;
    let app = web::router(AppState::new(pool.clone(), config));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            let fallback_port = port.checked_add(1).ok_or("no fallback port above 65535")?;
            tracing::warn!(
                "⚠️  Could not bind {}: {}. Trying fallback {}:{}",
                addr,
                e,
                host,
                fallback_port
            );
            let fallback: SocketAddr = format!("{}:{}", host, fallback_port).parse()?;
            tokio::net::TcpListener::bind(fallback).await?
        }
    };

    let bound_addr = listener.local_addr()?;
    tracing::info!("🚀 Server running on http://{}", bound_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    tracing::info!("👋 Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
