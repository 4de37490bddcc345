// src/main.rs
use log::{info, warn};

use stuffing_planner::api;
use stuffing_planner::config::AppConfig;

#[tokio::main]
async fn main() {
    // .env first so RUST_LOG from the file reaches the logger.
    let dotenv_result = dotenvy::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = dotenv_result {
        if !is_missing_file(&err) {
            warn!("Could not load .env: {}", err);
        }
    }

    let app_config = AppConfig::from_env();

    info!("Starting stuffing planner service");
    if let Err(err) = api::start_api_server(app_config.api, app_config.planner).await {
        log::error!("API server terminated with an error: {}", err);
        std::process::exit(1);
    }
}

fn is_missing_file(err: &dotenvy::Error) -> bool {
    matches!(err, dotenvy::Error::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
}
