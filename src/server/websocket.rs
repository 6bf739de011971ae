use crate::config::generation::GenerationSettings;
use crate::error::TurnError;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::session::ChatSession;
use super::ChatService;

use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::{ accept_hdr_async, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ ErrorResponse, Request, Response };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

use governor::{ clock::DefaultClock, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use url::form_urlencoded;
use chrono::Utc;
use futures::{ Sink, SinkExt, StreamExt };
use log::{ debug, error, info, warn };

const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

type ConnectionLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Accepts WebSocket clients until the listener fails. Every connection
/// gets its own task and its own [`ChatSession`].
pub async fn serve(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    service: Arc<ChatService>,
    api_key: Option<String>,
    connections_per_second: NonZeroU32
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let limiter: ConnectionLimiter = RateLimiter::direct(Quota::per_second(connections_per_second));
    let scheme = if tls_acceptor.is_some() { "wss" } else { "ws" };
    info!("{} server listening on: {}", scheme.to_uppercase(), listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;

        if limiter.check().is_err() {
            warn!("Connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        info!("Incoming connection from: {}", peer);
        let service = Arc::clone(&service);
        let required_api_key = api_key.clone();
        let tls_acceptor = tls_acceptor.clone();

        tokio::spawn(async move {
            let result = match tls_acceptor {
                Some(acceptor) =>
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            debug!("TLS handshake successful for {}", peer);
                            process_connection(peer, tls_stream, service, required_api_key).await
                        }
                        Err(e) => {
                            error!("TLS handshake error for {}: {}", peer, e);
                            Err(Box::new(e) as Box<dyn Error + Send + Sync>)
                        }
                    }
                None => process_connection(peer, stream, service, required_api_key).await,
            };

            if let Err(e) = result {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

fn provided_api_key(req: &Request) -> Option<String> {
    if let Some(key) = req.headers().get("X-API-Key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }
    let query = req.uri().query()?;
    form_urlencoded
        ::parse(query.as_bytes())
        .find(|(name, _)| name == "api_key")
        .map(|(_, value)| value.into_owned())
}

/// Compares without an early exit so the check takes the same time for
/// every key of the right length.
fn keys_match(provided: &str, required: &str) -> bool {
    if provided.len() != required.len() {
        return false;
    }
    provided
        .bytes()
        .zip(required.bytes())
        .fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

fn unauthorized() -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some("Unauthorized".to_string()));
    *resp.status_mut() = StatusCode::UNAUTHORIZED;
    resp
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    service: Arc<ChatService>,
    required_api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{
    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let Some(required) = required_api_key.as_deref() else {
            return Ok(response);
        };
        if provided_api_key(req).is_some_and(|provided| keys_match(&provided, required)) {
            info!("{} authenticated", peer);
            Ok(response)
        } else {
            warn!("{}: bad or missing API key", peer);
            Err(unauthorized())
        }
    };

    match accept_hdr_async(stream, auth_callback).await {
        Ok(ws) => {
            handle_connection(peer, ws, service).await;
            Ok(())
        }
        Err(e) => {
            error!("Handshake failed for {}: {}", peer, e);
            Err(Box::new(e) as _)
        }
    }
}

async fn send_frame<W>(tx: &mut W, frame: &ServerMessage) -> Result<(), Box<dyn Error + Send + Sync>>
    where W: Sink<Message, Error = WsError> + Unpin
{
    let json = serde_json::to_string(frame)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

fn history_frame(session: &ChatSession) -> ServerMessage {
    ServerMessage::History {
        session_id: session.id().to_string(),
        messages: session.conversation().messages().to_vec(),
    }
}

/// Runs a chat turn and answers with the reply or a visible error.
async fn handle_chat<W>(
    session: &mut ChatSession,
    service: &ChatService,
    content: &str,
    settings: &GenerationSettings,
    tx: &mut W
) -> Result<(), Box<dyn Error + Send + Sync>>
    where W: Sink<Message, Error = WsError> + Unpin
{
    if content.trim().is_empty() {
        return send_frame(tx, &ServerMessage::Error {
            message: TurnError::EmptyMessage.to_string(),
        }).await;
    }
    let config = match settings.resolve(service.default_model, service.repetition_penalty) {
        Ok(config) => config,
        Err(e) => {
            warn!("Session {}: rejected settings: {}", session.id(), e);
            return send_frame(tx, &ServerMessage::Error {
                message: TurnError::Config(e).to_string(),
            }).await;
        }
    };

    send_frame(tx, &ServerMessage::Processing).await?;

    let frame = match session.submit(content, &config).await {
        Ok(reply) =>
            ServerMessage::Response {
                content: reply.content().to_string(),
                timestamp: Utc::now().timestamp(),
            },
        Err(e) => ServerMessage::Error { message: e.to_string() },
    };
    send_frame(tx, &frame).await
}

pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    service: Arc<ChatService>
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    let mut session = ChatSession::new(Arc::clone(&service.backend));
    info!("Assigned session {} to {}", session.id(), peer);

    let (mut tx, mut rx) = websocket.split();
    if let Err(e) = send_frame(&mut tx, &history_frame(&session)).await {
        error!("Failed to send history to {}: {}", peer, e);
        return;
    }

    while let Some(msg) = rx.next().await {
        let message = match msg {
            Ok(message) => message,
            Err(e) => {
                match e {
                    | WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(_)
                    | WsError::Utf8 => {
                        info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                    }
                    WsError::Io(ref io_err) if
                        io_err.kind() == std::io::ErrorKind::ConnectionReset
                    => {
                        info!("WebSocket connection reset by peer {}", peer);
                    }
                    _ => {
                        error!("Error receiving message from {}: {}", peer, e);
                    }
                }
                break;
            }
        };

        if message.len() > MAX_MESSAGE_SIZE {
            warn!(
                "Message from {} exceeds size limit ({} > {})",
                peer,
                message.len(),
                MAX_MESSAGE_SIZE
            );
            let _ = send_frame(&mut tx, &ServerMessage::Error {
                message: "Message too large".to_string(),
            }).await;
            break;
        }

        let result = match message {
            Message::Text(text) =>
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Chat { content, settings }) => {
                        handle_chat(&mut session, &service, &content, &settings, &mut tx).await
                    }
                    Ok(ClientMessage::Clear) => {
                        session.clear();
                        send_frame(&mut tx, &history_frame(&session)).await
                    }
                    Err(e) => {
                        warn!("Failed to parse message from {}: {}", peer, e);
                        send_frame(&mut tx, &ServerMessage::Error {
                            message: format!("Failed to parse message: {}", e),
                        }).await
                    }
                }
            Message::Close(_) => {
                info!("Received close frame from {}", peer);
                break;
            }
            Message::Ping(data) =>
                tx
                    .send(Message::Pong(data)).await
                    .map_err(|e| Box::new(e) as Box<dyn Error + Send + Sync>),
            Message::Binary(_) => {
                warn!("Ignoring binary message from {}", peer);
                Ok(())
            }
            Message::Pong(_) | Message::Frame(_) => Ok(()),
        };

        if let Err(e) = result {
            error!("Error sending to {}: {}", peer, e);
            break;
        }
    }
    info!("WebSocket connection closed for {} (session {})", peer, session.id());
}
