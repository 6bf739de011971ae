use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{ header, HeaderMap, StatusCode };
use axum::response::{ IntoResponse, Response };
use axum::routing::{ get, post };
use axum::{ Json, Router };
use futures::StreamExt;
use llama_chat::config::generation::{ GenerationConfig, ModelVariant };
use llama_chat::error::{ ProviderError, TurnError };
use llama_chat::llm::dispatcher::dispatch;
use llama_chat::llm::replicate::{ ReplicateClient, ReplicateConfig };
use llama_chat::llm::{ GenerationBackend, GenerationInput };
use serde_json::{ json, Value };
use tokio::net::TcpListener;
use tokio::sync::{ oneshot, Mutex };

#[derive(Clone)]
struct MockReplicate {
    base_url: String,
    create_status: StatusCode,
    create_body: Value,
    sse_body: String,
    poll_replies: Arc<Mutex<VecDeque<Value>>>,
    seen_create_paths: Arc<Mutex<Vec<String>>>,
    seen_bodies: Arc<Mutex<Vec<Value>>>,
    seen_auth_headers: Arc<Mutex<Vec<String>>>,
}

impl MockReplicate {
    fn new(base_url: String) -> Self {
        Self {
            create_status: StatusCode::CREATED,
            create_body: json!({
                "id": "p-stream",
                "status": "starting",
                "urls": {
                    "get": format!("{}/predictions/p-stream", base_url),
                    "stream": format!("{}/stream/p-stream", base_url)
                }
            }),
            sse_body: String::new(),
            poll_replies: Arc::new(Mutex::new(VecDeque::new())),
            seen_create_paths: Arc::new(Mutex::new(Vec::new())),
            seen_bodies: Arc::new(Mutex::new(Vec::new())),
            seen_auth_headers: Arc::new(Mutex::new(Vec::new())),
            base_url,
        }
    }
}

async fn record_create(state: &MockReplicate, path: &str, headers: &HeaderMap, body: Value) {
    state.seen_create_paths.lock().await.push(path.to_string());
    state.seen_bodies.lock().await.push(body);
    if let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        state.seen_auth_headers.lock().await.push(auth.to_string());
    }
}

async fn create_versioned(
    State(state): State<MockReplicate>,
    headers: HeaderMap,
    Json(body): Json<Value>
) -> Response {
    record_create(&state, "/v1/predictions", &headers, body).await;
    (state.create_status, Json(state.create_body.clone())).into_response()
}

async fn create_for_model(
    State(state): State<MockReplicate>,
    headers: HeaderMap,
    Json(body): Json<Value>
) -> Response {
    record_create(&state, "/v1/models/meta/llama-2-7b-chat/predictions", &headers, body).await;
    (state.create_status, Json(state.create_body.clone())).into_response()
}

async fn stream_events(State(state): State<MockReplicate>) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], state.sse_body.clone()).into_response()
}

async fn poll_prediction(State(state): State<MockReplicate>) -> Response {
    let reply = state.poll_replies
        .lock().await
        .pop_front()
        .unwrap_or_else(|| json!({"id": "p-poll", "status": "processing"}));
    Json(reply).into_response()
}

async fn spawn_mock<F>(configure: F) -> (MockReplicate, oneshot::Sender<()>)
    where F: FnOnce(&mut MockReplicate)
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener address should resolve");
    let mut state = MockReplicate::new(format!("http://{}", addr));
    configure(&mut state);

    let app = Router::new()
        .route("/v1/predictions", post(create_versioned))
        .route("/v1/models/meta/llama-2-7b-chat/predictions", post(create_for_model))
        .route("/stream/p-stream", get(stream_events))
        .route("/predictions/p-poll", get(poll_prediction))
        .with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            }).await
            .expect("mock server should run");
    });

    (state, shutdown_tx)
}

fn client_for(state: &MockReplicate) -> ReplicateClient {
    ReplicateClient::new(ReplicateConfig {
        api_token: "r8_test_token".into(),
        base_url: state.base_url.clone(),
        poll_interval: Duration::from_millis(5),
    })
}

fn input() -> GenerationInput {
    let config = GenerationConfig::for_model(ModelVariant::Llama2_7B, 1.1);
    GenerationInput::new("User: Hi\n\nAssistant:", &config)
}

#[tokio::test]
async fn streams_output_events_in_order() {
    let (state, shutdown) = spawn_mock(|s| {
        s.sse_body =
            "event: output\nid: 1\ndata: Hello\n\n: ping\n\nevent: output\nid: 2\ndata: !\n\nevent: done\ndata: {}\n\n".to_string();
    }).await;
    let client = client_for(&state);

    let config = GenerationConfig::for_model(ModelVariant::Llama2_7B, 1.1);
    let reply = dispatch(&client, "User: Hi\n\nAssistant:", &config).await.unwrap();
    assert_eq!(reply, "Hello!");

    assert_eq!(*state.seen_create_paths.lock().await, vec!["/v1/predictions".to_string()]);
    assert_eq!(*state.seen_auth_headers.lock().await, vec!["Bearer r8_test_token".to_string()]);

    let body = state.seen_bodies.lock().await[0].clone();
    assert_eq!(body["version"], "4f0a4744c7295c024a1de15e1a63c880d3da035fa1f49bfd344fe076074c8eea");
    assert_eq!(body["stream"], true);
    assert_eq!(body["input"]["prompt"], "User: Hi\n\nAssistant:");
    assert_eq!(body["input"]["max_length"], 256);
    assert_eq!(body["input"]["repetition_penalty"], 1.1);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn unversioned_models_poll_until_succeeded() {
    let (state, shutdown) = spawn_mock(|s| {
        s.create_body = json!({
            "id": "p-poll",
            "status": "starting",
            "urls": { "get": format!("{}/predictions/p-poll", s.base_url) }
        });
    }).await;
    {
        let mut replies = state.poll_replies.lock().await;
        replies.push_back(json!({"id": "p-poll", "status": "processing"}));
        replies.push_back(
            json!({"id": "p-poll", "status": "succeeded", "output": ["Hel", "lo", " there"]})
        );
    }
    let client = client_for(&state);

    let stream = client.run("meta/llama-2-7b-chat", &input()).await.unwrap();
    let fragments: Vec<String> = stream
        .map(|f| f.unwrap())
        .collect().await;
    assert_eq!(fragments, vec!["Hel", "lo", " there"]);

    assert_eq!(
        *state.seen_create_paths.lock().await,
        vec!["/v1/models/meta/llama-2-7b-chat/predictions".to_string()]
    );
    assert!(state.seen_bodies.lock().await[0].get("version").is_none());

    let _ = shutdown.send(());
}

#[tokio::test]
async fn rejected_requests_surface_api_detail() {
    let (state, shutdown) = spawn_mock(|s| {
        s.create_status = StatusCode::UNAUTHORIZED;
        s.create_body = json!({"detail": "Invalid token.", "status": 401});
    }).await;
    let client = client_for(&state);

    match client.run(ModelVariant::Llama2_13B.model_id(), &input()).await {
        Err(ProviderError::Api { status, detail }) => {
            assert_eq!(status, 401);
            assert_eq!(detail, "Invalid token.");
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("expected an API error"),
    }

    let _ = shutdown.send(());
}

#[tokio::test]
async fn error_event_fails_the_turn() {
    let (state, shutdown) = spawn_mock(|s| {
        s.sse_body =
            "event: output\ndata: partial\n\nevent: error\ndata: {\"detail\":\"CUDA out of memory\"}\n\nevent: done\ndata: {}\n\n".to_string();
    }).await;
    let client = client_for(&state);

    let config = GenerationConfig::for_model(ModelVariant::Llama2_7B, 1.1);
    match dispatch(&client, "prompt", &config).await {
        Err(TurnError::Provider(ProviderError::Prediction(msg))) => {
            assert_eq!(msg, "CUDA out of memory");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let _ = shutdown.send(());
}

#[tokio::test]
async fn canceled_predictions_are_errors() {
    let (state, shutdown) = spawn_mock(|s| {
        s.sse_body = "event: done\ndata: {\"reason\":\"canceled\"}\n\n".to_string();
    }).await;
    let client = client_for(&state);

    let mut stream = client.run(ModelVariant::Llama2_7B.model_id(), &input()).await.unwrap();
    assert!(matches!(stream.next().await, Some(Err(ProviderError::Canceled))));
    assert!(stream.next().await.is_none());

    let _ = shutdown.send(());
}

#[tokio::test]
async fn already_finished_predictions_return_their_output() {
    let (state, shutdown) = spawn_mock(|s| {
        s.create_body = json!({
            "id": "p-done",
            "status": "succeeded",
            "output": ["Done", "."],
            "urls": {}
        });
    }).await;
    let client = client_for(&state);

    let config = GenerationConfig::for_model(ModelVariant::Llama2_7B, 1.1);
    assert_eq!(dispatch(&client, "prompt", &config).await.unwrap(), "Done.");

    let _ = shutdown.send(());
}

#[tokio::test]
async fn truncated_event_at_end_of_stream_is_not_committed() {
    let (state, shutdown) = spawn_mock(|s| {
        s.sse_body = "event: output\ndata: Hello\n\nevent: output\ndata: wor".to_string();
    }).await;
    let client = client_for(&state);

    let config = GenerationConfig::for_model(ModelVariant::Llama2_7B, 1.1);
    assert_eq!(dispatch(&client, "prompt", &config).await.unwrap(), "Hello");

    let _ = shutdown.send(());
}
