use clap::Parser;
use std::time::Duration;

use crate::config::generation::{ ModelVariant, DEFAULT_REPETITION_PENALTY };
use crate::error::ConfigError;
use crate::llm::replicate::{ ReplicateConfig, DEFAULT_BASE_URL };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Replicate Args ---
    /// Replicate API token. Usually supplied through the environment or a .env file.
    #[arg(long, env = "REPLICATE_API_TOKEN", hide_env_values = true)]
    pub replicate_api_token: Option<String>,

    /// Base URL of the Replicate HTTP API.
    #[arg(long, env = "REPLICATE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub replicate_base_url: String,

    /// Delay between status checks when a prediction cannot be streamed.
    #[arg(long, env = "REPLICATE_POLL_INTERVAL_MS", default_value = "500")]
    pub replicate_poll_interval_ms: u64,

    // --- Generation Args ---
    /// Model used when a chat message does not pick one (llama2-7b, llama2-13b)
    #[arg(long, env = "DEFAULT_MODEL", default_value = "llama2-7b")]
    pub default_model: ModelVariant,

    /// Repetition penalty sent with every generation request.
    #[arg(long, env = "REPETITION_PENALTY", default_value_t = DEFAULT_REPETITION_PENALTY)]
    pub repetition_penalty: f64,

    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Port for the HTTP server that serves the chat page.
    #[arg(long, env = "HTTP_PORT", default_value = "8080")]
    pub http_port: u16,

    /// Optional API Key required for clients to connect to the WebSocket server. If set, clients must provide this key.
    #[arg(long, env = "SERVER_API_KEY", hide_env_values = true)]
    pub server_api_key: Option<String>,

    /// New WebSocket connections accepted per second before dropping.
    #[arg(long, env = "MAX_CONNECTIONS_PER_SECOND", default_value = "10")]
    pub max_connections_per_second: u32,

    /// Optional path to the TLS certificate file (PEM format) for enabling WSS/HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PKCS8 PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    /// The credential is mandatory; a blank value counts as missing.
    pub fn api_token(&self) -> Result<String, ConfigError> {
        self.replicate_api_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or(ConfigError::MissingApiToken)
    }

    pub fn replicate_config(&self) -> Result<ReplicateConfig, ConfigError> {
        let api_token = self.api_token()?;
        if self.replicate_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(ReplicateConfig {
            api_token,
            base_url: self.replicate_base_url.clone(),
            poll_interval: Duration::from_millis(self.replicate_poll_interval_ms),
        })
    }

    pub fn server_api_key(&self) -> Option<String> {
        self.server_api_key.clone().filter(|k| !k.trim().is_empty())
    }
}
