pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod server;
pub mod session;

use cli::Args;
use llm::replicate::ReplicateClient;
use llm::GenerationBackend;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    // Checked before anything binds: no token, no chat.
    let replicate = args.replicate_config()?;

    info!("--- Core Configuration ---");
    info!("WebSocket Address: {}", args.server_addr);
    info!("HTTP Port: {}", args.http_port);
    info!("Replicate Base URL: {}", replicate.base_url);
    info!("Replicate Poll Interval: {:?}", replicate.poll_interval);
    info!("Default Model: {} ({})", args.default_model, args.default_model.model_id());
    info!("Repetition Penalty: {}", args.repetition_penalty);
    info!("Max Connections/s: {}", args.max_connections_per_second);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let backend: Arc<dyn GenerationBackend> = Arc::new(ReplicateClient::new(replicate));
    let server = Server::new(&args, backend)?;
    server.run().await?;

    Ok(())
}
