use thiserror::Error;

/// Failures raised by the remote generation capability.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to generation provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation provider returned {status}: {detail}")]
    Api { status: u16, detail: String },

    #[error("prediction failed: {0}")]
    Prediction(String),

    #[error("prediction was canceled")]
    Canceled,

    #[error("unexpected provider response: {0}")]
    Decode(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error(
        "Replicate API token is missing. Set REPLICATE_API_TOKEN in the environment or the .env file."
    )]
    MissingApiToken,

    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("{field} is out of range: {value}")]
    OutOfRange { field: &'static str, value: String },

    #[error("max connections per second must be greater than zero")]
    InvalidRateLimit,

    #[error("poll interval must be greater than zero milliseconds")]
    InvalidPollInterval,
}

/// Why a single chat turn did not produce an assistant reply.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("invalid generation settings: {0}")]
    Config(#[from] ConfigError),

    #[error("Error generating response: {0}")]
    Provider(#[from] ProviderError),
}
