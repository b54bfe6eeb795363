// Outbound messages, engine → relay. One message per event: `{type, payload}`.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

pub const TEXT_MESSAGE_NAME: &str = "cognitive-attention-text";
pub const IMAGE_MESSAGE_NAME: &str = "cognitive-attention-image";
pub const AUDIO_MESSAGE_NAME: &str = "cognitive-attention-audio";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextAttentionPayload {
    pub url: String,
    pub text: String,
    pub words_read: usize,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttentionPayload {
    pub url: String,
    pub src: String,
    pub alt: String,
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub hover_duration: u64,
    pub confidence: u8,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAttentionPayload {
    pub url: String,
    pub src: String,
    pub title: String,
    /// Total length in seconds.
    pub duration: f64,
    /// Cumulative playback in milliseconds.
    pub playback_duration: u64,
    pub current_time: f64,
    pub confidence: u8,
    pub timestamp: Timestamp,
}

/// Typed event handed to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AttentionMessage {
    #[serde(rename = "cognitive-attention-text")]
    Text(TextAttentionPayload),
    #[serde(rename = "cognitive-attention-image")]
    Image(ImageAttentionPayload),
    #[serde(rename = "cognitive-attention-audio")]
    Audio(AudioAttentionPayload),
}

impl AttentionMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttentionMessage::Text(_) => TEXT_MESSAGE_NAME,
            AttentionMessage::Image(_) => IMAGE_MESSAGE_NAME,
            AttentionMessage::Audio(_) => AUDIO_MESSAGE_NAME,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_message_wire_shape() {
        let message = AttentionMessage::Text(TextAttentionPayload {
            url: "https://a.test/post".to_string(),
            text: "w41 w42".to_string(),
            words_read: 2,
            timestamp: Timestamp::from_millis(1_700_000_000_000),
        });

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "cognitive-attention-text",
                "payload": {
                    "url": "https://a.test/post",
                    "text": "w41 w42",
                    "wordsRead": 2,
                    "timestamp": 1_700_000_000_000u64
                }
            })
        );
        assert_eq!(message.type_name(), TEXT_MESSAGE_NAME);
    }

    #[test]
    fn audio_payload_uses_camel_case() {
        let message = AttentionMessage::Audio(AudioAttentionPayload {
            url: "https://a.test".to_string(),
            src: "https://a.test/a.mp3".to_string(),
            title: String::new(),
            duration: 120.0,
            playback_duration: 3_000,
            current_time: 3.0,
            confidence: 3,
            timestamp: Timestamp::from_millis(5),
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], AUDIO_MESSAGE_NAME);
        assert_eq!(value["payload"]["playbackDuration"], 3_000);
        assert_eq!(value["payload"]["currentTime"], 3.0);
    }
}
