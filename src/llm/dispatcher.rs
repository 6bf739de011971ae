use futures::StreamExt;
use log::{ debug, error };

use super::{ GenerationBackend, GenerationInput };
use crate::config::generation::GenerationConfig;
use crate::error::TurnError;

/// Runs one generation and drains it into a single reply.
///
/// Fragments are concatenated in arrival order. Any failure, including one
/// after some fragments arrived, ends the turn and the partial text is dropped.
pub async fn dispatch(
    backend: &dyn GenerationBackend,
    prompt: &str,
    config: &GenerationConfig
) -> Result<String, TurnError> {
    config.validate()?;

    let input = GenerationInput::new(prompt, config);
    let mut stream = backend.run(&config.model_id, &input).await.map_err(|e| {
        error!("{} failed to start generation with {}: {}", backend.name(), config.model_id, e);
        e
    })?;

    let mut reply = String::new();
    let mut fragments = 0usize;
    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(text) => {
                reply.push_str(&text);
                fragments += 1;
            }
            Err(e) => {
                error!(
                    "{} generation failed after {} fragment(s): {}",
                    backend.name(),
                    fragments,
                    e
                );
                return Err(e.into());
            }
        }
    }

    debug!("Received {} fragment(s), {} bytes from {}", fragments, reply.len(), backend.name());
    Ok(reply)
}
