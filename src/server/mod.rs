pub mod api;
pub mod tls;
pub mod websocket;

use crate::cli::Args;
use crate::config::generation::ModelVariant;
use crate::error::ConfigError;
use crate::llm::GenerationBackend;
use std::error::Error;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use log::info;

/// Everything a connection needs to run chat turns.
pub struct ChatService {
    pub backend: Arc<dyn GenerationBackend>,
    pub default_model: ModelVariant,
    pub repetition_penalty: f64,
}

impl ChatService {
    pub fn new(backend: Arc<dyn GenerationBackend>, args: &Args) -> Self {
        Self {
            backend,
            default_model: args.default_model,
            repetition_penalty: args.repetition_penalty,
        }
    }
}

pub struct Server {
    ws_addr: String,
    http_port: u16,
    service: Arc<ChatService>,
    api_key: Option<String>,
    connections_per_second: NonZeroU32,
    tls: Option<tls::TlsPaths>,
}

impl Server {
    pub fn new(
        args: &Args,
        backend: Arc<dyn GenerationBackend>
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let connections_per_second = NonZeroU32::new(args.max_connections_per_second).ok_or(
            ConfigError::InvalidRateLimit
        )?;
        let tls = tls::tls_paths(args)?;
        let api_key = args.server_api_key();

        if api_key.is_some() {
            info!("Server configured with API Key authentication.");
        } else {
            info!("Server configured WITHOUT API Key authentication. Connections are open.");
        }

        Ok(Self {
            ws_addr: args.server_addr.clone(),
            http_port: args.http_port,
            service: Arc::new(ChatService::new(backend, args)),
            api_key,
            connections_per_second,
            tls,
        })
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let tls_acceptor = match &self.tls {
            Some(paths) => Some(TlsAcceptor::from(tls::load_tls_config(paths)?)),
            None => None,
        };

        let listener = TcpListener::bind(&self.ws_addr).await?;
        let ws_port = listener.local_addr()?.port();

        let page = api::PageSettings::new(
            self.service.default_model,
            ws_port,
            tls_acceptor.is_some()
        );
        api::start_http_server(self.http_port, page, self.tls.clone()).await?;

        websocket::serve(
            listener,
            tls_acceptor,
            Arc::clone(&self.service),
            self.api_key.clone(),
            self.connections_per_second
        ).await
    }
}
