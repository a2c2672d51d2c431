//! Cloud-telephony/Twilio-style adapter (C11): 8 kHz µ-law, `connected` /
//! `start` / `media` / `dtmf` / `stop` protocol, served at `/twilio`.
//!
//! Twilio's media-stream protocol has no per-utterance boundary frame the
//! way AudioCodes' `userStream.stop` does -- speech-end detection is left
//! to the AI service's server-side VAD. The adapter compensates by
//! attempting a commit after every inbound chunk; [`crate::audio_stream::AudioStreamHandler::commit`]'s
//! 100 ms threshold keeps this from flooding the AI service with no-op commits.

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
use crate::codec::{mulaw_decode, mulaw_encode};
use crate::error::BridgeResult;

const PLATFORM_RATE: u32 = 8_000;
const MEDIA_FORMAT: &str = "audio/x-mulaw";

/// Outbound sink: encodes PCM16 to µ-law and frames it as Twilio `media`
/// events. `send_stream_start`/`send_stream_stop`/`send_session_end` have
/// no Twilio wire equivalent (the protocol has no explicit stream-open or
/// bridge-initiated session-end message), so they degrade to a `mark`
/// event or a no-op per the default [`PlatformSink`] impl.
struct TwilioSink {
    stream_sid: String,
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl TwilioSink {
    fn send_event(&self, value: Value) -> BridgeResult<()> {
        self.tx
            .send(WsMessage::Text(value.to_string().into()))
            .map_err(|_| crate::error::BridgeError::Transport("twilio socket closed".into()))
    }
}

#[async_trait]
impl PlatformSink for TwilioSink {
    async fn send_stream_start(&self, _stream_id: &str, _media_format: &str) -> BridgeResult<()> {
        Ok(())
    }

    async fn send_stream_chunk(&self, _stream_id: &str, pcm16: &[u8]) -> BridgeResult<()> {
        let mulaw = mulaw_encode(pcm16);
        self.send_event(json!({
            "event": "media",
            "streamSid": self.stream_sid,
            "media": { "payload": BASE64.encode(&mulaw) },
        }))
    }

    async fn send_stream_stop(&self, stream_id: &str) -> BridgeResult<()> {
        self.send_event(json!({
            "event": "mark",
            "streamSid": self.stream_sid,
            "mark": { "name": stream_id },
        }))
    }
}

/// Drives one `/twilio` WebSocket connection end to end. `conn_guard` ties
/// this call into the server's force-close hierarchy -- dropped (and
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

    let Some((stream_sid, caller)) = await_stream_start(&mut ws_stream).await else {
        log::warn!("[TwilioAdapter] socket closed before start event");
        return;
    };
    // Twilio has no bot-name concept on the wire; the call id doubles as
    // both conversation id and stream SID.
    let conversation_id = stream_sid.clone();

    let platform: Arc<dyn PlatformSink> = Arc::new(TwilioSink {
        stream_sid: stream_sid.clone(),
        tx: tx.clone(),
    });

    let (ai_sender, mut ai_events) = match deps.ai_connector.connect(&conversation_id).await {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("[TwilioAdapter] {conversation_id}: AI-service connect failed: {e}");
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
        "twilio",
        "bot",
        &caller,
        MEDIA_FORMAT,
        call_deps,
    )
    .await
    {
        Ok(call) => Arc::new(call),
        Err(e) => {
            log::error!("[TwilioAdapter] {conversation_id}: accept failed: {e}");
            return;
        }
    };
    call.install_hang_up();
    deps.agent.register_functions(call.function_handler());

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
                        if let Err(e) = handle_platform_frame(&text, &call).await {
                            log::warn!("[TwilioAdapter] {conversation_id}: {e}");
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        call.close("transport closed").await;
                        break;
                    }
                    Some(Err(e)) => {
                        log::warn!("[TwilioAdapter] {conversation_id}: read error: {e}");
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
                            log::warn!("[TwilioAdapter] {conversation_id}: AI event handling failed: {e}");
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

async fn handle_platform_frame(text: &str, call: &Arc<BridgeCall>) -> BridgeResult<()> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| crate::error::BridgeError::Protocol(format!("malformed frame: {e}")))?;
    let event = value.get("event").and_then(Value::as_str).unwrap_or("");

    call.platform_event_router().dispatch(event.to_string(), value.clone()).await;

    match event {
        "media" => {
            let payload = value
                .get("media")
                .and_then(|m| m.get("payload"))
                .and_then(Value::as_str)
                .ok_or_else(|| crate::error::BridgeError::Protocol("media event missing payload".into()))?;
            let mulaw = BASE64
                .decode(payload)
                .map_err(|e| crate::error::BridgeError::Audio(e.to_string()))?;
            let pcm = mulaw_decode(&mulaw);
            let call = call.clone();
            tokio::spawn(async move {
                if let Err(e) = call.handle_platform_audio(&pcm).await {
                    log::warn!("[TwilioAdapter] {}: inbound audio failed: {e}", call.conversation_id);
                    return;
                }
                if let Err(e) = call.handle_platform_commit().await {
                    log::warn!("[TwilioAdapter] {}: commit failed: {e}", call.conversation_id);
                }
            });
        }
        "dtmf" | "mark" => {
            log::debug!("[TwilioAdapter] {}: {event} event", call.conversation_id);
        }
        "stop" => {
            let call = call.clone();
            tokio::spawn(async move {
                call.close("client stop event").await;
            });
        }
        other => {
            log::debug!("[TwilioAdapter] {}: unrecognized event '{other}'", call.conversation_id);
        }
    }
    Ok(())
}

/// Waits for `connected` then `start`, returning `(streamSid, callSid)`.
/// `None` if the socket closes first.
async fn await_stream_start(
    ws_stream: &mut futures::stream::SplitStream<WebSocket>,
) -> Option<(String, String)> {
    while let Some(frame) = ws_stream.next().await {
        let WsMessage::Text(text) = frame.ok()? else { continue };
        let value: Value = serde_json::from_str(&text).ok()?;
        match value.get("event").and_then(Value::as_str) {
            Some("connected") => continue,
            Some("start") => {
                let start = value.get("start")?;
                let stream_sid = start.get("streamSid").and_then(Value::as_str)?.to_string();
                let call_sid = start.get("callSid").and_then(Value::as_str).unwrap_or("unknown").to_string();
                return Some((stream_sid, call_sid));
            }
            _ => continue,
        }
    }
    None
}
