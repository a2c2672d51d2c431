//! AudioCodes-style gateway adapter (C11): 16 kHz PCM16, `session.initiate`
//! / `userStream.*` / `playStream.*` control protocol, served at `/voicebot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::adapters::AdapterDeps;
use crate::api::ws_connection::ConnectionGuard;
use crate::audio_stream::PlatformSink;
use crate::bridge::{BridgeCall, BridgeCallDeps};
use crate::error::BridgeResult;

const PLATFORM_RATE: u32 = 16_000;
const DEFAULT_MEDIA_FORMAT: &str = "raw/lpcm16";

/// Outbound sink: frames C10 hands it into AudioCodes' `playStream.*`
/// control messages, forwarded to a writer task that owns the socket.
struct AudioCodesSink {
    conversation_id: String,
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl AudioCodesSink {
    fn send_control(&self, value: Value) -> BridgeResult<()> {
        self.tx
            .send(WsMessage::Text(value.to_string().into()))
            .map_err(|_| crate::error::BridgeError::Transport("voicebot socket closed".into()))
    }
}

#[async_trait]
impl PlatformSink for AudioCodesSink {
    async fn send_stream_start(&self, stream_id: &str, media_format: &str) -> BridgeResult<()> {
        self.send_control(json!({
            "type": "playStream.start",
            "conversationId": self.conversation_id,
            "streamId": stream_id,
            "mediaFormat": media_format,
        }))
    }

    async fn send_stream_chunk(&self, stream_id: &str, pcm16: &[u8]) -> BridgeResult<()> {
        self.send_control(json!({
            "type": "playStream.chunk",
            "conversationId": self.conversation_id,
            "streamId": stream_id,
            "audioChunk": BASE64.encode(pcm16),
        }))
    }

    async fn send_stream_stop(&self, stream_id: &str) -> BridgeResult<()> {
        self.send_control(json!({
            "type": "playStream.stop",
            "conversationId": self.conversation_id,
            "streamId": stream_id,
        }))
    }

    async fn send_session_end(&self, reason: &str) -> BridgeResult<()> {
        self.send_control(json!({
            "type": "session.end",
            "conversationId": self.conversation_id,
            "reason": reason,
        }))
    }
}

/// Drives one `/voicebot` WebSocket connection end to end. `conn_guard`
/// ties this call into the server's force-close hierarchy -- dropped (and
/// unregistered) when this function returns.
pub async fn handle_socket(socket: WebSocket, deps: AdapterDeps, conn_guard: ConnectionGuard) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let mut ws_sink = ws_sink;
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let Some((conversation_id, bot_name, caller, media_format)) =
        await_session_initiate(&mut ws_stream).await
    else {
        log::warn!("[AudioCodesAdapter] socket closed before session.initiate");
        return;
    };

    let platform: Arc<dyn PlatformSink> = Arc::new(AudioCodesSink {
        conversation_id: conversation_id.clone(),
        tx: tx.clone(),
    });

    let (ai_sender, mut ai_events) = match deps.ai_connector.connect(&conversation_id).await {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("[AudioCodesAdapter] {conversation_id}: AI-service connect failed: {e}");
            return;
        }
    };

    let call_deps = BridgeCallDeps {
        session_manager: deps.session_manager.clone(),
        platform,
        ai_sender,
        ai_session_config: deps.agent.session_config(),
        data_dir: deps.data_dir.clone(),
        bot_source_rate: deps.bot_source_rate,
        platform_rate: PLATFORM_RATE,
        commit_min_bytes: deps.commit_min_bytes,
        max_session_age: deps.max_session_age,
        initial_greeting: deps.initial_greeting.clone(),
    };

    let call = match BridgeCall::accept(
        conversation_id.clone(),
        "audiocodes",
        &bot_name,
        &caller,
        &media_format,
        call_deps,
    )
    .await
    {
        Ok(call) => Arc::new(call),
        Err(e) => {
            log::error!("[AudioCodesAdapter] {conversation_id}: accept failed: {e}");
            return;
        }
    };
    call.install_hang_up();
    deps.agent.register_functions(call.function_handler());

    let _ = tx.send(WsMessage::Text(
        json!({
            "type": "session.accepted",
            "conversationId": conversation_id,
            "mediaFormat": media_format,
        })
        .to_string()
        .into(),
    ));

    let cancel = call.cancellation_token();
    let conn_cancel = conn_guard.cancel_token().clone();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = conn_cancel.cancelled() => {
                call.close("server shutting down").await;
                break;
            }
            frame = ws_stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(e) = handle_platform_frame(&text, &call, &tx).await {
                            log::warn!("[AudioCodesAdapter] {conversation_id}: {e}");
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        call.close("transport closed").await;
                        break;
                    }
                    Some(Err(e)) => {
                        log::warn!("[AudioCodesAdapter] {conversation_id}: read error: {e}");
                        call.close("transport error").await;
                        break;
                    }
                    _ => {}
                }
            }
            event = ai_events.recv() => {
                match event {
                    Some((raw_type, payload)) => {
                        if let Err(e) = call.handle_ai_event(&raw_type, payload).await {
                            log::warn!("[AudioCodesAdapter] {conversation_id}: AI event handling failed: {e}");
                        }
                    }
                    None => {
                        call.close("AI-service leg closed").await;
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_platform_frame(
    text: &str,
    call: &Arc<BridgeCall>,
    tx: &mpsc::UnboundedSender<WsMessage>,
) -> BridgeResult<()> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| crate::error::BridgeError::Protocol(format!("malformed frame: {e}")))?;
    let msg_type = value.get("type").and_then(Value::as_str).unwrap_or("");

    call.platform_event_router().dispatch(msg_type.to_string(), value.clone()).await;

    match msg_type {
        "userStream.start" => {
            let _ = tx.send(WsMessage::Text(
                json!({ "type": "userStream.started", "conversationId": call.conversation_id }).to_string().into(),
            ));
        }
        "userStream.chunk" => {
            let chunk = value
                .get("audioChunk")
                .and_then(Value::as_str)
                .ok_or_else(|| crate::error::BridgeError::Protocol("userStream.chunk missing audioChunk".into()))?;
            let pcm = BASE64
                .decode(chunk)
                .map_err(|e| crate::error::BridgeError::Audio(e.to_string()))?;
            let call = call.clone();
            tokio::spawn(async move {
                if let Err(e) = call.handle_platform_audio(&pcm).await {
                    log::warn!("[AudioCodesAdapter] {}: inbound audio failed: {e}", call.conversation_id);
                }
            });
        }
        "userStream.stop" => {
            let _ = tx.send(WsMessage::Text(
                json!({ "type": "userStream.stopped", "conversationId": call.conversation_id }).to_string().into(),
            ));
            let call = call.clone();
            tokio::spawn(async move {
                if let Err(e) = call.handle_platform_commit().await {
                    log::warn!("[AudioCodesAdapter] {}: commit failed: {e}", call.conversation_id);
                }
            });
        }
        "session.end" => {
            let reason = value.get("reason").and_then(Value::as_str).unwrap_or("client session.end").to_string();
            let call = call.clone();
            tokio::spawn(async move {
                call.close(&reason).await;
            });
        }
        other => {
            log::debug!("[AudioCodesAdapter] {}: unrecognized message type '{other}'", call.conversation_id);
        }
    }
    Ok(())
}

/// Waits for the handshake message, returning `(conversationId, botName,
/// caller, mediaFormat)`. `None` if the socket closes first.
async fn await_session_initiate(
    ws_stream: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<(String, String, String, String)> {
    while let Some(frame) = ws_stream.next().await {
        let WsMessage::Text(text) = frame.ok()? else { continue };
        let value: Value = serde_json::from_str(&text).ok()?;
        if value.get("type").and_then(Value::as_str) != Some("session.initiate") {
            continue;
        }
        let conversation_id = value.get("conversationId").and_then(Value::as_str)?.to_string();
        let bot_name = value.get("botName").and_then(Value::as_str).unwrap_or("bot").to_string();
        let caller = value.get("caller").and_then(Value::as_str).unwrap_or("unknown").to_string();
        let media_format = value
            .get("supportedMediaFormats")
            .and_then(Value::as_array)
            .and_then(|formats| formats.first())
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MEDIA_FORMAT)
            .to_string();
        return Some((conversation_id, bot_name, caller, media_format));
    }
    None
}
