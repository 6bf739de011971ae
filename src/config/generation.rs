use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

pub const DEFAULT_TEMPERATURE: f64 = 0.1;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_MAX_LENGTH: u32 = 256;
pub const DEFAULT_REPETITION_PENALTY: f64 = 1.1;

pub const TEMPERATURE_BOUNDS: SliderBounds = SliderBounds {
    min: 0.01,
    max: 1.0,
    step: 0.01,
    default: DEFAULT_TEMPERATURE,
};

pub const TOP_P_BOUNDS: SliderBounds = SliderBounds {
    min: 0.01,
    max: 1.0,
    step: 0.01,
    default: DEFAULT_TOP_P,
};

pub const MAX_LENGTH_BOUNDS: SliderBounds = SliderBounds {
    min: 32.0,
    max: 512.0,
    step: 8.0,
    default: DEFAULT_MAX_LENGTH as f64,
};

/// Range a chat page should offer for one sampling parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliderBounds {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub default: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelVariant {
    #[serde(rename = "llama2-7b")]
    Llama2_7B,
    #[serde(rename = "llama2-13b")]
    Llama2_13B,
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 2] = [ModelVariant::Llama2_7B, ModelVariant::Llama2_13B];

    pub fn key(&self) -> &'static str {
        match self {
            ModelVariant::Llama2_7B => "llama2-7b",
            ModelVariant::Llama2_13B => "llama2-13b",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ModelVariant::Llama2_7B => "Llama2-7B (Faster)",
            ModelVariant::Llama2_13B => "Llama2-13B (More Powerful)",
        }
    }

    pub fn model_id(&self) -> &'static str {
        match self {
            ModelVariant::Llama2_7B =>
                "a16z-infra/llama7b-v2-chat:4f0a4744c7295c024a1de15e1a63c880d3da035fa1f49bfd344fe076074c8eea",
            ModelVariant::Llama2_13B =>
                "a16z-infra/llama13b-v2-chat:df7690f1994d94e96ad9d568eac121aecf50684a0b0963b25a41cc40061269e5",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModelVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "llama2-7b" | "7b" => Ok(ModelVariant::Llama2_7B),
            "llama2-13b" | "13b" => Ok(ModelVariant::Llama2_13B),
            _ => Err(ConfigError::UnknownModel(s.to_string())),
        }
    }
}

/// Fully resolved parameters for one generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub model_id: String,
    pub temperature: f64,
    pub top_p: f64,
    pub max_length: i64,
    pub repetition_penalty: f64,
}

impl GenerationConfig {
    pub fn for_model(model: ModelVariant, repetition_penalty: f64) -> Self {
        Self {
            model_id: model.model_id().to_string(),
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            max_length: DEFAULT_MAX_LENGTH as i64,
            repetition_penalty,
        }
    }

    /// Rejects anything the remote model would not accept. The page's
    /// sliders already bound these, but frames can come from any client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_interval("temperature", self.temperature)?;
        check_unit_interval("top_p", self.top_p)?;
        if self.max_length <= 0 || self.max_length > i64::from(u32::MAX) {
            return Err(ConfigError::OutOfRange {
                field: "max_length",
                value: self.max_length.to_string(),
            });
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "repetition_penalty",
                value: self.repetition_penalty.to_string(),
            });
        }
        if self.model_id.trim().is_empty() {
            return Err(ConfigError::UnknownModel(self.model_id.clone()));
        }
        Ok(())
    }
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    // NaN fails both comparisons, so it is rejected here too.
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field, value: value.to_string() })
    }
}

/// Per-request values picked by the user; anything left out falls back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_length: Option<i64>,
}

impl GenerationSettings {
    pub fn resolve(
        &self,
        default_model: ModelVariant,
        repetition_penalty: f64
    ) -> Result<GenerationConfig, ConfigError> {
        let model = match self.model.as_deref() {
            Some(key) if !key.trim().is_empty() => key.parse::<ModelVariant>()?,
            _ => default_model,
        };
        let config = GenerationConfig {
            model_id: model.model_id().to_string(),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: self.top_p.unwrap_or(DEFAULT_TOP_P),
            max_length: self.max_length.unwrap_or(DEFAULT_MAX_LENGTH as i64),
            repetition_penalty,
        };
        config.validate()?;
        Ok(config)
    }
}
