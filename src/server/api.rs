use crate::config::generation::{
    ModelVariant,
    SliderBounds,
    MAX_LENGTH_BOUNDS,
    TEMPERATURE_BOUNDS,
    TOP_P_BOUNDS,
};
use super::tls::{ load_tls_config, TlsPaths };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{ extract::State, response::{ Html, IntoResponse }, routing::get, Json, Router };
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, error };

const INDEX_HTML: &str = include_str!("../../static/index.html");

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ModelEntry {
    pub key: &'static str,
    pub label: &'static str,
}

/// What the chat page needs to render its controls and find the WebSocket.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct PageSettings {
    pub models: Vec<ModelEntry>,
    pub default_model: &'static str,
    pub temperature: SliderBounds,
    pub top_p: SliderBounds,
    pub max_length: SliderBounds,
    pub websocket_scheme: &'static str,
    pub websocket_port: u16,
}

impl PageSettings {
    pub fn new(default_model: ModelVariant, websocket_port: u16, tls: bool) -> Self {
        Self {
            models: ModelVariant::ALL.iter()
                .map(|m| ModelEntry { key: m.key(), label: m.label() })
                .collect(),
            default_model: default_model.key(),
            temperature: TEMPERATURE_BOUNDS,
            top_p: TOP_P_BOUNDS,
            max_length: MAX_LENGTH_BOUNDS,
            websocket_scheme: if tls { "wss" } else { "ws" },
            websocket_port,
        }
    }
}

#[derive(Clone)]
struct AppState {
    page: Arc<PageSettings>,
}

pub fn router(page: PageSettings) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/api/settings", get(settings_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(AppState { page: Arc::new(page) })
}

pub async fn start_http_server(
    http_port: u16,
    page: PageSettings,
    tls: Option<TlsPaths>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = format!("0.0.0.0:{}", http_port).parse::<SocketAddr>()?;
    let app = router(page);

    if let Some(paths) = tls {
        let mut server_config = (*load_tls_config(&paths)?).clone();
        server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_config(
            Arc::new(server_config)
        );

        tokio::spawn(async move {
            let result = axum_server
                ::bind_rustls(addr, tls_config)
                .serve(app.into_make_service()).await;
            if let Err(e) = result {
                error!("HTTPS server error: {}", e);
            }
        });
        info!("Chat page available at https://{}", addr);
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e|
            format!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e)
        )?;
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                error!("HTTP server error: {}", e);
            }
        });
        info!("Chat page available at http://{}", addr);
    }

    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn settings_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.page.as_ref().clone())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
