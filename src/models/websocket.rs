use serde::{ Serialize, Deserialize };

use super::chat::ChatMessage;
use crate::config::generation::GenerationSettings;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
        #[serde(flatten)]
        settings: GenerationSettings,
    },
    #[serde(rename = "clear")]
    Clear,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "history")] History {
        session_id: String,
        messages: Vec<ChatMessage>,
    },
    #[serde(rename = "response")] Response {
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
    #[serde(rename = "processing")]
    Processing,
}
