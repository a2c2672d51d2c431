//! AI-service handler (C9): the receive loop that interprets the AI
//! service's event taxonomy and enforces the response-serialization
//! invariant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

use crate::ai_session::{AiServiceSender, AiSessionManager};
use crate::audio_stream::{AudioStreamHandler, PlatformSink};
use crate::error::BridgeResult;
use crate::events::{AiEventKind, EventRouter};
use crate::function_handler::FunctionHandler;
use crate::recorder::CallRecorder;
use crate::session::{Direction, SessionManager, SessionStatus};
use crate::transcript::TranscriptManager;

/// Invoked when an AI-service error event is severe enough to end the
/// call. Mirrors C5's weak-handle-upgraded-inside-a-spawned-task shape
/// for `schedule_hang_up`, since this context has no back-reference to
/// the orchestrator that owns `close()`.
pub type CloseCallback = Arc<dyn Fn(String) + Send + Sync>;

/// AI-service error subtypes that always end the call, even without an
/// explicit `fatal` flag on the payload.
const FATAL_ERROR_TYPES: &[&str] = &["server_error", "session_expired"];

fn error_is_fatal(payload: &Value) -> bool {
    let error = payload.get("error");
    if let Some(fatal) = error.and_then(|e| e.get("fatal")).and_then(Value::as_bool) {
        return fatal;
    }
    error
        .and_then(|e| e.get("type"))
        .and_then(Value::as_str)
        .map(|t| FATAL_ERROR_TYPES.contains(&t))
        .unwrap_or(false)
}

/// Hooks the AI-service handler needs into the rest of the per-call object
/// graph. Owned, not borrowed -- `FunctionCallArgumentsDone` dispatch runs
/// in a spawned task, so every field must outlive the enclosing call.
pub struct AiHandlerContext<P: PlatformSink, A: AiServiceSender> {
    pub audio: Arc<AudioStreamHandler<P, A>>,
    pub transcript: Arc<TranscriptManager>,
    pub functions: Arc<FunctionHandler>,
    pub session: Arc<AiSessionManager<A>>,
    pub router: Arc<EventRouter<AiEventKind>>,
    pub session_manager: Arc<SessionManager>,
    pub conversation_id: String,
    pub recorder: Arc<CallRecorder>,
    pub close: CloseCallback,
}

impl<P: PlatformSink, A: AiServiceSender> Clone for AiHandlerContext<P, A> {
    fn clone(&self) -> Self {
        Self {
            audio: self.audio.clone(),
            transcript: self.transcript.clone(),
            functions: self.functions.clone(),
            session: self.session.clone(),
            router: self.router.clone(),
            session_manager: self.session_manager.clone(),
            conversation_id: self.conversation_id.clone(),
            recorder: self.recorder.clone(),
            close: self.close.clone(),
        }
    }
}

/// Tracks the single-slot "pending user input" marker and whether a
/// response is currently active, enforcing at most one active response
/// per call.
#[derive(Default)]
pub struct ResponseSerializer {
    response_active: AtomicBool,
    pending_commit: AtomicBool,
}

impl ResponseSerializer {
    pub fn set_active(&self, active: bool) {
        self.response_active.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.response_active.load(Ordering::SeqCst)
    }

    /// Called when the platform commits user audio. Returns `true` if a
    /// new response should be created immediately (no response active).
    pub fn on_user_commit(&self) -> bool {
        if self.is_active() {
            self.pending_commit.store(true, Ordering::SeqCst);
            false
        } else {
            true
        }
    }

    /// Called on `response.done`. Returns `true` if a deferred commit was
    /// pending and a new response should now be triggered.
    pub fn on_response_done(&self) -> bool {
        self.set_active(false);
        self.pending_commit.swap(false, Ordering::SeqCst)
    }
}

/// Persists a completed transcript turn to the session's conversation
/// history. Logged, not propagated -- a storage hiccup here must not
/// interrupt the live call.
async fn persist_turn(session_manager: &SessionManager, conversation_id: &str, direction: Direction, text: String) {
    if text.is_empty() {
        return;
    }
    let result = session_manager
        .mutate(conversation_id, |s| {
            s.push_history(direction, text.clone());
            Ok(())
        })
        .await;
    if let Err(e) = result {
        log::warn!("[AiHandler] {conversation_id}: failed to persist transcript turn: {e}");
    }
}

/// Dispatches one AI-service event. Intended to be called from the
/// per-call AI-leg read loop for every deserialized event.
pub async fn handle_ai_event<P: PlatformSink, A: AiServiceSender>(
    raw_type: &str,
    payload: Value,
    ctx: &AiHandlerContext<P, A>,
    serializer: &ResponseSerializer,
) -> BridgeResult<()> {
    let kind = AiEventKind::from_wire_type(raw_type);
    ctx.router.dispatch(kind, payload.clone()).await;

    match kind {
        AiEventKind::SessionUpdated | AiEventKind::SessionCreated => {
            log::debug!("[AiHandler] {raw_type}");
        }
        AiEventKind::SpeechStarted | AiEventKind::SpeechStopped | AiEventKind::InputAudioCommitted => {
            log::debug!("[AiHandler] {raw_type}");
        }
        AiEventKind::ResponseCreated => {
            serializer.set_active(true);
        }
        AiEventKind::AudioDelta => {
            if let Some(b64) = payload.get("delta").and_then(Value::as_str) {
                if let Ok(pcm) = BASE64.decode(b64) {
                    ctx.audio.outbound_chunk(&pcm).await?;
                }
            }
        }
        AiEventKind::AudioDone => {
            ctx.audio.stop_stream().await?;
        }
        AiEventKind::TranscriptDelta => {
            if let Some(delta) = payload.get("delta").and_then(Value::as_str) {
                ctx.transcript.push_bot_delta(delta);
            }
        }
        AiEventKind::TranscriptDone => {
            let text = ctx.transcript.complete_bot();
            persist_turn(&ctx.session_manager, &ctx.conversation_id, Direction::Assistant, text).await;
        }
        AiEventKind::InputTranscriptionDelta => {
            if let Some(delta) = payload.get("delta").and_then(Value::as_str) {
                ctx.transcript.push_caller_delta(delta);
            }
        }
        AiEventKind::InputTranscriptionCompleted => {
            let text = ctx.transcript.complete_caller();
            persist_turn(&ctx.session_manager, &ctx.conversation_id, Direction::User, text).await;
        }
        AiEventKind::FunctionCallArgumentsDelta => {
            if let (Some(call_id), Some(delta)) = (
                payload.get("call_id").and_then(Value::as_str),
                payload.get("delta").and_then(Value::as_str),
            ) {
                ctx.functions.push_argument_delta(call_id, delta);
            }
        }
        AiEventKind::FunctionCallArgumentsDone => {
            if let Some(call_id) = payload.get("call_id").and_then(Value::as_str).map(str::to_string) {
                let arguments_final = payload
                    .get("arguments")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                // Dispatch off the event loop: a slow or hanging callable must
                // not stall delivery of every other AI-service event.
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let result = ctx.functions.complete_call(&call_id, arguments_final).await;
                    ctx.recorder.record_function_event(serde_json::json!({
                        "call_id": call_id,
                        "result": result.clone(),
                    }));
                    if let Err(e) = ctx.session.send_function_call_output(&call_id, result).await {
                        log::warn!(
                            "[AiHandler] {}: failed to deliver function_call_output for {call_id}: {e}",
                            ctx.conversation_id
                        );
                    }
                });
            }
        }
        AiEventKind::OutputItemAdded => {
            if payload.get("item").and_then(|i| i.get("type")).and_then(Value::as_str)
                == Some("function_call")
            {
                if let (Some(call_id), Some(name)) = (
                    payload.get("item").and_then(|i| i.get("call_id")).and_then(Value::as_str),
                    payload.get("item").and_then(|i| i.get("name")).and_then(Value::as_str),
                ) {
                    ctx.functions.begin_call(call_id, name);
                }
            }
        }
        AiEventKind::ResponseDone => {
            if serializer.on_response_done() {
                ctx.session.create_response().await?;
            }
        }
        AiEventKind::Error => {
            log::error!("[AiHandler] AI service error event: {payload}");
            if error_is_fatal(&payload) {
                let message = payload
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                ctx.recorder.record_session_event(serde_json::json!({
                    "event": "ai_service_error",
                    "message": message,
                }));
                if let Err(e) = ctx
                    .session_manager
                    .mutate(&ctx.conversation_id, |s| s.transition(SessionStatus::Error))
                    .await
                {
                    log::warn!("[AiHandler] {}: failed to transition to error: {e}", ctx.conversation_id);
                }
                (ctx.close)(format!("AI service error: {message}"));
            }
        }
        AiEventKind::Unknown => {
            log::debug!("[AiHandler] unrecognized event type '{raw_type}'");
        }
    }
    Ok(())
}

/// Called by the platform-side commit path: triggers an immediate
/// response if none is active, otherwise defers via the serializer.
pub async fn handle_user_commit<A: AiServiceSender>(
    session: &AiSessionManager<A>,
    serializer: &ResponseSerializer,
) -> BridgeResult<()> {
    if serializer.on_user_commit() {
        session.create_response().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializer_defers_commit_during_active_response() {
        let serializer = ResponseSerializer::default();
        serializer.set_active(true);
        assert!(!serializer.on_user_commit());
        assert!(serializer.on_response_done());
    }

    #[test]
    fn serializer_triggers_immediately_when_idle() {
        let serializer = ResponseSerializer::default();
        assert!(serializer.on_user_commit());
    }

    #[test]
    fn response_done_clears_active_flag() {
        let serializer = ResponseSerializer::default();
        serializer.set_active(true);
        serializer.on_response_done();
        assert!(!serializer.is_active());
    }

    #[test]
    fn response_done_without_pending_commit_does_not_trigger() {
        let serializer = ResponseSerializer::default();
        serializer.set_active(true);
        assert!(!serializer.on_response_done());
    }

    #[test]
    fn fatal_error_detected_from_explicit_flag() {
        let payload = serde_json::json!({ "error": { "fatal": true, "type": "invalid_request_error" } });
        assert!(error_is_fatal(&payload));
    }

    #[test]
    fn fatal_error_detected_from_known_type() {
        let payload = serde_json::json!({ "error": { "type": "server_error" } });
        assert!(error_is_fatal(&payload));
    }

    #[test]
    fn non_fatal_error_does_not_trigger_close() {
        let payload = serde_json::json!({ "error": { "type": "invalid_request_error" } });
        assert!(!error_is_fatal(&payload));
    }
}
