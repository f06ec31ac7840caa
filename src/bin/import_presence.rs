use std::env;

use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use cirkle::config::Config;
use cirkle::database;
use cirkle::services::presence_import_service;
use cirkle::services::presence_store::PresenceStore;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Ok(path) = env::var("IMPORT_PATH") else {
        eprintln!("IMPORT_PATH must point at a JSON export of presence documents");
        std::process::exit(2);
    };

    match run(&path).await {
        Ok(report) => {
            println!(
                "presence import: candidates={}, imported={}, skipped={}, failed={}",
                report.candidates, report.imported, report.skipped, report.failed
            );
            if report.failed > 0 {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("presence import failed: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(
    path: &str,
) -> Result<presence_import_service::ImportReport, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let raw = tokio::fs::read_to_string(path).await?;
    let input: serde_json::Value = serde_json::from_str(&raw)?;

    let pool = database::connect(&config.database_url).await?;
    let store = PresenceStore::new(pool.clone(), config.presence.default_radius_meters);
    let report = presence_import_service::import_presence(&store, &input).await?;
    pool.close().await;
    Ok(report)
}
