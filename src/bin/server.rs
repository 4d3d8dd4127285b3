use anyhow::Result;
use dotenvy::dotenv;
use log::{info, error};

use productreel::config::Config;
use productreel::database::Database;
use productreel::http_server::start_http_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging, RUST_LOG wins over LOG_LEVEL
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    info!("🚀 Starting product reel server...");
    info!("✅ Configuration loaded");

    // Initialize database
    let database = Database::new(&config.database_path).await?;
    info!("✅ Database connected");

    tokio::fs::create_dir_all(&config.output_dir).await?;
    info!("✅ Output directory ready at {}", config.output_dir);

    let port = config.http_port;
    info!("🌐 Starting HTTP server on port {}", port);
    if let Some(base) = &config.public_base_url {
        info!("📡 Public base URL: {}", base);
    }

    if let Err(e) = start_http_server(config, database).await {
        error!("❌ HTTP server failed: {}", e);
        return Err(e);
    }

    Ok(())
}
