//! Call Agent - backend for AI voice calling campaigns
//!
//! Receives call lifecycle webhooks from Bolna, dials campaign queues,
//! scores finished calls with OpenAI and books follow-up meetings.

mod models;
mod server;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("call_agent_server=info,tower_http=info")))
        .init();

    let config = server::config::ServerConfig::from_env()?;
    tracing::info!("Starting call agent server on port {}", config.port);

    server::run_server(config).await
}
