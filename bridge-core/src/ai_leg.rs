//! AI-service leg connector (C6 transport): opens the outbound channel to
//! the conversational AI service and turns its frames into parsed
//! `(type, payload)` events for the per-call AI-leg read loop.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::ai_session::AiServiceSender;
use crate::error::{BridgeError, BridgeResult};

/// One parsed event off the AI-service leg: its wire `type` field and the
/// full JSON payload, in the shape [`crate::events::AiEventKind::from_wire_type`] expects.
pub type AiEvent = (String, Value);

/// Opens an AI-service leg for a call. `use_local_ai` (§9) swaps the live
/// implementation for [`LocalAiLegConnector`] without the rest of the
/// bridge knowing the difference.
#[async_trait]
pub trait AiLegConnector: Send + Sync {
    async fn connect(
        &self,
        conversation_id: &str,
    ) -> BridgeResult<(Arc<dyn AiServiceSender>, mpsc::UnboundedReceiver<AiEvent>)>;
}

/// Forwards outgoing JSON to the writer task that owns the socket's write
/// half. Decoupled from the read side so C8 and C6 can both hold a sender
/// without contending on a lock around the socket itself.
struct WsAiSender {
    tx: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl AiServiceSender for WsAiSender {
    async fn send_json(&self, event: Value) -> BridgeResult<()> {
        let text = serde_json::to_string(&event).map_err(|e| BridgeError::Protocol(e.to_string()))?;
        self.tx
            .send(Message::Text(text.into()))
            .map_err(|_| BridgeError::Transport("AI-service leg closed".into()))
    }
}

/// Dials a live AI-service endpoint and wires its frames into the
/// `(sender, receiver)` pair the bridge core needs.
pub struct LiveAiLegConnector {
    url: String,
}

impl LiveAiLegConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl AiLegConnector for LiveAiLegConnector {
    async fn connect(
        &self,
        conversation_id: &str,
    ) -> BridgeResult<(Arc<dyn AiServiceSender>, mpsc::UnboundedReceiver<AiEvent>)> {
        let (stream, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| BridgeError::Transport(format!("AI-service connect failed: {e}")))?;
        let (mut write, mut read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<AiEvent>();

        let id = conversation_id.to_string();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    log::warn!("[AiLeg] {id}: write failed, closing leg: {e}");
                    break;
                }
            }
        });

        let id = conversation_id.to_string();
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<Value>(&text) {
                        Ok(payload) => {
                            let raw_type = payload
                                .get("type")
                                .and_then(Value::as_str)
                                .unwrap_or("unknown")
                                .to_string();
                            if in_tx.send((raw_type, payload)).is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("[AiLeg] {id}: malformed event: {e}"),
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("[AiLeg] {id}: AI service closed the leg");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("[AiLeg] {id}: read error, closing leg: {e}");
                        break;
                    }
                }
            }
        });

        Ok((Arc::new(WsAiSender { tx: out_tx }), in_rx))
    }
}

/// In-process stand-in for the AI service, used when `use_local_ai` is set.
/// Acknowledges `session.update` and `conversation.item.create` silently,
/// and immediately answers `response.create` with `response.created` then
/// `response.done`, so a call exercised against it completes its turn-taking
/// without a live endpoint.
pub struct LocalAiLegConnector;

struct LocalAiSender {
    tx: mpsc::UnboundedSender<AiEvent>,
}

#[async_trait]
impl AiServiceSender for LocalAiSender {
    async fn send_json(&self, event: Value) -> BridgeResult<()> {
        let raw_type = event.get("type").and_then(Value::as_str).unwrap_or("unknown");
        if raw_type == "response.create" {
            let _ = self.tx.send(("response.created".to_string(), serde_json::json!({ "type": "response.created" })));
            let _ = self.tx.send(("response.done".to_string(), serde_json::json!({ "type": "response.done" })));
        }
        Ok(())
    }
}

#[async_trait]
impl AiLegConnector for LocalAiLegConnector {
    async fn connect(
        &self,
        _conversation_id: &str,
    ) -> BridgeResult<(Arc<dyn AiServiceSender>, mpsc::UnboundedReceiver<AiEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((Arc::new(LocalAiSender { tx }), rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_connector_echoes_response_create_as_created_then_done() {
        let connector = LocalAiLegConnector;
        let (sender, mut events) = connector.connect("call-1").await.unwrap();

        sender
            .send_json(serde_json::json!({ "type": "response.create" }))
            .await
            .unwrap();

        let (kind, _) = events.recv().await.unwrap();
        assert_eq!(kind, "response.created");
        let (kind, _) = events.recv().await.unwrap();
        assert_eq!(kind, "response.done");
    }

    #[tokio::test]
    async fn local_connector_ignores_other_events() {
        let connector = LocalAiLegConnector;
        let (sender, mut events) = connector.connect("call-1").await.unwrap();

        sender
            .send_json(serde_json::json!({ "type": "session.update" }))
            .await
            .unwrap();
        sender
            .send_json(serde_json::json!({ "type": "response.create" }))
            .await
            .unwrap();

        // session.update produced nothing; the first event received is from
        // the response.create that followed it.
        let (kind, _) = events.recv().await.unwrap();
        assert_eq!(kind, "response.created");
    }
}
