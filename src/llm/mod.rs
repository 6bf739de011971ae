pub mod dispatcher;
pub mod replicate;
pub mod sse;

use async_trait::async_trait;
use futures::{ Future, Stream };
use serde::Serialize;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::generation::GenerationConfig;
use crate::error::ProviderError;

/// Lazy, finite, non-restartable sequence of generated text fragments.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Model input sent alongside the model identifier.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GenerationInput {
    pub prompt: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_length: i64,
    pub repetition_penalty: f64,
}

impl GenerationInput {
    pub fn new(prompt: &str, config: &GenerationConfig) -> Self {
        Self {
            prompt: prompt.to_string(),
            temperature: config.temperature,
            top_p: config.top_p,
            max_length: config.max_length,
            repetition_penalty: config.repetition_penalty,
        }
    }
}

/// A hosted text-generation capability.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Starts one generation. Errors before the first fragment are
    /// returned directly; later ones arrive through the stream.
    async fn run(
        &self,
        model_id: &str,
        input: &GenerationInput
    ) -> Result<TextStream, ProviderError>;

    fn name(&self) -> &str;
}

/// Runs `producer` on its own task and exposes what it sends as a [`TextStream`].
pub fn channel_stream<F, Fut>(producer: F) -> TextStream
    where
        F: FnOnce(mpsc::Sender<Result<String, ProviderError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        producer(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}
