use std::sync::Arc;

use relaychat::api::{self, AppState};
use relaychat::config::ServerConfig;
use relaychat::{Request, Server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;
    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; openai requests will fail");
    }
    if config.ollama_host.is_none() {
        warn!("OLLAMA_HOST is not set; ollama requests will fail");
    }
    info!(
        openai_base_url = %config.openai_base_url,
        ollama_host = config.ollama_host.as_deref().unwrap_or("-"),
        "relay configured"
    );

    let state = Arc::new(AppState::from_config(&config).await?);
    let pipeline = api::pipeline(state);

    let server = Server::bind(config.bind.to_string()).await?;
    server
        .run(move |req: Request| {
            let pipeline = pipeline.clone();
            async move { pipeline.handle(req).await }
        })
        .await?;
    Ok(())
}
