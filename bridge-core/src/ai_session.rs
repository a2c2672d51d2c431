//! AI-service session manager (C6): session configuration and response
//! triggering over the AI-service leg.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::BridgeResult;

/// Abstracts sending a JSON event to the AI service so C6 stays testable
/// without a live socket.
#[async_trait]
pub trait AiServiceSender: Send + Sync {
    async fn send_json(&self, event: Value) -> BridgeResult<()>;
}

#[async_trait]
impl<T: AiServiceSender + ?Sized> AiServiceSender for std::sync::Arc<T> {
    async fn send_json(&self, event: Value) -> BridgeResult<()> {
        (**self).send_json(event).await
    }
}

/// Tool/function declaration passed to the AI service's session config.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Static parameters the AI-service session is configured with.
#[derive(Debug, Clone)]
pub struct AiSessionConfig {
    pub voice_id: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub input_sample_rate: u32,
    pub vad_enabled: bool,
    pub transcription_model: String,
    pub tools: Vec<ToolSpec>,
}

/// Drives session-level AI-service operations: configuring the session,
/// triggering response generation, and seeding the first turn.
pub struct AiSessionManager<S: AiServiceSender> {
    sender: S,
    config: AiSessionConfig,
}

impl<S: AiServiceSender> AiSessionManager<S> {
    pub fn new(sender: S, config: AiSessionConfig) -> Self {
        Self { sender, config }
    }

    fn modalities() -> Value {
        json!(["text", "audio"])
    }

    fn tools_payload(&self) -> Value {
        Value::Array(
            self.config
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect(),
        )
    }

    /// Sends `session.update` carrying modalities, voice, audio format,
    /// generation parameters, turn detection, and the tool catalogue.
    pub async fn initialize_session(&self) -> BridgeResult<()> {
        let event = json!({
            "type": "session.update",
            "session": {
                "modalities": Self::modalities(),
                "voice": self.config.voice_id,
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm16",
                "temperature": self.config.temperature,
                "max_response_output_tokens": self.config.max_output_tokens,
                "turn_detection": if self.config.vad_enabled {
                    json!({ "type": "server_vad" })
                } else {
                    Value::Null
                },
                "input_audio_transcription": {
                    "model": self.config.transcription_model,
                },
                "tools": self.tools_payload(),
            }
        });
        self.sender.send_json(event).await
    }

    /// Sends `response.create` to trigger a new assistant response.
    pub async fn create_response(&self) -> BridgeResult<()> {
        let event = json!({
            "type": "response.create",
            "response": {
                "modalities": Self::modalities(),
                "voice": self.config.voice_id,
            }
        });
        self.sender.send_json(event).await
    }

    /// Seeds the conversation with a system-role item, then immediately
    /// requests the first response so the agent greets the caller.
    pub async fn send_initial_item(&self, text: &str) -> BridgeResult<()> {
        let item_event = json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "system",
                "content": [{ "type": "input_text", "text": text }],
            }
        });
        self.sender.send_json(item_event).await?;
        self.create_response().await
    }

    /// Delivers a function dispatch result back to the AI service, keyed
    /// by `call_id`, per §4.5's completion step.
    pub async fn send_function_call_output(&self, call_id: &str, result: Value) -> BridgeResult<()> {
        let event = json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": call_id,
                "output": result.to_string(),
            }
        });
        self.sender.send_json(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingSender {
        sent: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl AiServiceSender for RecordingSender {
        async fn send_json(&self, event: Value) -> BridgeResult<()> {
            self.sent.lock().push(event);
            Ok(())
        }
    }

    fn config() -> AiSessionConfig {
        AiSessionConfig {
            voice_id: "alloy".to_string(),
            temperature: 0.8,
            max_output_tokens: 4096,
            input_sample_rate: 16_000,
            vad_enabled: true,
            transcription_model: "whisper-1".to_string(),
            tools: vec![ToolSpec {
                name: "wrap_up".to_string(),
                description: "End the call".to_string(),
                parameters: json!({ "type": "object" }),
            }],
        }
    }

    #[tokio::test]
    async fn initialize_session_carries_tool_catalogue() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let manager = AiSessionManager::new(RecordingSender { sent: sent.clone() }, config());
        manager.initialize_session().await.unwrap();
        let events = sent.lock();
        assert_eq!(events[0]["type"], "session.update");
        assert_eq!(events[0]["session"]["tools"][0]["name"], "wrap_up");
    }

    #[tokio::test]
    async fn send_initial_item_seeds_then_creates_response() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let manager = AiSessionManager::new(RecordingSender { sent: sent.clone() }, config());
        manager.send_initial_item("greet the caller").await.unwrap();
        let events = sent.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "conversation.item.create");
        assert_eq!(events[1]["type"], "response.create");
    }
}
