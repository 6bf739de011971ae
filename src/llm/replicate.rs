use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use reqwest::header::{ ACCEPT, CACHE_CONTROL };
use reqwest::{ Client as HttpClient, Response };
use serde::{ Deserialize, Serialize };
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc::Sender;

use super::sse::{ SseDecoder, SseEvent };
use super::{ channel_stream, GenerationBackend, GenerationInput, TextStream };
use crate::error::ProviderError;

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com";

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_token: String,
    pub base_url: String,
    pub poll_interval: Duration,
}

/// Client for the Replicate predictions API.
#[derive(Debug, Clone)]
pub struct ReplicateClient {
    http: HttpClient,
    api_token: String,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Serialize)]
struct CreatePredictionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    input: &'a GenerationInput,
    stream: bool,
}

#[derive(Deserialize, Debug, Default)]
struct PredictionUrls {
    #[serde(default)]
    get: Option<String>,
    #[serde(default)]
    stream: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    urls: PredictionUrls,
}

impl ReplicateClient {
    pub fn new(config: ReplicateConfig) -> Self {
        Self {
            http: HttpClient::new(),
            api_token: config.api_token,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            poll_interval: config.poll_interval,
        }
    }

    /// `owner/name:version` targets a pinned version; a bare `owner/name`
    /// runs the model's latest deployment.
    fn prediction_endpoint<'a>(&self, model_id: &'a str) -> (String, Option<&'a str>) {
        match model_id.split_once(':') {
            Some((_, version)) => (format!("{}/v1/predictions", self.base_url), Some(version)),
            None => (format!("{}/v1/models/{}/predictions", self.base_url, model_id), None),
        }
    }

    async fn create_prediction(
        &self,
        model_id: &str,
        input: &GenerationInput
    ) -> Result<Prediction, ProviderError> {
        let (url, version) = self.prediction_endpoint(model_id);
        let body = CreatePredictionRequest { version, input, stream: true };

        let resp = self.http.post(&url).bearer_auth(&self.api_token).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }
        let prediction = resp
            .json::<Prediction>().await
            .map_err(|e| ProviderError::Decode(format!("invalid prediction payload: {}", e)))?;
        Ok(prediction)
    }

    fn stream_prediction(&self, url: String) -> TextStream {
        let http = self.http.clone();
        let token = self.api_token.clone();

        channel_stream(move |tx| async move {
            let resp = match
                http
                    .get(&url)
                    .bearer_auth(&token)
                    .header(ACCEPT, "text/event-stream")
                    .header(CACHE_CONTROL, "no-store")
                    .send().await
            {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
            };
            if !resp.status().is_success() {
                let _ = tx.send(Err(api_error(resp).await)).await;
                return;
            }

            let mut decoder = SseDecoder::new();
            let mut bytes = resp.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(buf) => {
                        for event in decoder.push(&buf) {
                            if !forward_event(event, &tx).await {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
            if decoder.finish() {
                warn!("Event stream ended in the middle of an event; discarding it");
            }
        })
    }

    fn poll_prediction(&self, url: String) -> TextStream {
        let http = self.http.clone();
        let token = self.api_token.clone();
        let interval = self.poll_interval;

        channel_stream(move |tx| async move {
            loop {
                tokio::time::sleep(interval).await;

                let prediction = match get_prediction(&http, &token, &url).await {
                    Ok(p) => p,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                if !is_terminal(&prediction.status) {
                    debug!("Prediction {} is {}", prediction.id, prediction.status);
                    continue;
                }

                match finish_prediction(prediction) {
                    Ok(fragments) => {
                        for fragment in fragments {
                            if tx.send(Ok(fragment)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                    }
                }
                return;
            }
        })
    }
}

#[async_trait]
impl GenerationBackend for ReplicateClient {
    async fn run(
        &self,
        model_id: &str,
        input: &GenerationInput
    ) -> Result<TextStream, ProviderError> {
        let prediction = self.create_prediction(model_id, input).await?;
        info!("Created prediction {} for {} ({})", prediction.id, model_id, prediction.status);

        if is_terminal(&prediction.status) {
            let fragments = finish_prediction(prediction)?;
            return Ok(Box::pin(futures::stream::iter(fragments.into_iter().map(Ok))));
        }
        if let Some(stream_url) = prediction.urls.stream {
            return Ok(self.stream_prediction(stream_url));
        }
        match prediction.urls.get {
            Some(get_url) => {
                warn!("Prediction {} has no stream url, falling back to polling", prediction.id);
                Ok(self.poll_prediction(get_url))
            }
            None =>
                Err(
                    ProviderError::Decode(
                        format!("prediction {} has neither a stream nor a get url", prediction.id)
                    )
                ),
        }
    }

    fn name(&self) -> &str {
        "replicate"
    }
}

/// Returns false once the stream should stop.
async fn forward_event(event: SseEvent, tx: &Sender<Result<String, ProviderError>>) -> bool {
    match event.event.as_str() {
        "output" => {
            if event.data.is_empty() {
                return true;
            }
            tx.send(Ok(event.data)).await.is_ok()
        }
        "error" => {
            let _ = tx.send(Err(ProviderError::Prediction(error_text(&event.data)))).await;
            false
        }
        "done" => {
            if done_reason(&event.data).as_deref() == Some("canceled") {
                let _ = tx.send(Err(ProviderError::Canceled)).await;
            }
            false
        }
        other => {
            debug!("Ignoring stream event '{}'", other);
            true
        }
    }
}

async fn get_prediction(
    http: &HttpClient,
    token: &str,
    url: &str
) -> Result<Prediction, ProviderError> {
    let resp = http.get(url).bearer_auth(token).send().await?;
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    resp.json::<Prediction>().await.map_err(|e|
        ProviderError::Decode(format!("invalid prediction payload: {}", e))
    )
}

async fn api_error(resp: Response) -> ProviderError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json
        ::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or(body);
    ProviderError::Api { status, detail }
}

fn is_terminal(status: &str) -> bool {
    matches!(status, "succeeded" | "failed" | "canceled")
}

fn finish_prediction(prediction: Prediction) -> Result<Vec<String>, ProviderError> {
    match prediction.status.as_str() {
        "succeeded" => Ok(output_fragments(prediction.output)),
        "failed" => {
            let message = match prediction.error {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => "unknown error".to_string(),
                Some(other) => other.to_string(),
            };
            Err(ProviderError::Prediction(message))
        }
        "canceled" => Err(ProviderError::Canceled),
        other =>
            Err(
                ProviderError::Decode(
                    format!("prediction {} is not finished: {}", prediction.id, other)
                )
            ),
    }
}

fn output_fragments(output: Option<Value>) -> Vec<String> {
    match output {
        Some(Value::Array(items)) =>
            items
                .into_iter()
                .filter_map(|item| {
                    match item {
                        Value::String(s) => Some(s),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    }
                })
                .collect(),
        Some(Value::String(s)) => vec![s],
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other.to_string()],
    }
}

fn error_text(data: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(s)) => s,
        Ok(v) =>
            v
                .get("detail")
                .and_then(|d| d.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| data.to_string()),
        Err(_) => data.to_string(),
    }
}

fn done_reason(data: &str) -> Option<String> {
    serde_json
        ::from_str::<Value>(data)
        .ok()?
        .get("reason")?
        .as_str()
        .map(str::to_string)
}
