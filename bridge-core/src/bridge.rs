//! Bridge core (C10): the per-call orchestrator that wires every other
//! component together through explicit dependency injection and owns the
//! call's lifecycle end to end.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ai_handler::{handle_ai_event, handle_user_commit, AiHandlerContext, ResponseSerializer};
use crate::ai_session::{AiServiceSender, AiSessionConfig, AiSessionManager};
use crate::audio_stream::{AudioStreamHandler, PlatformSink};
use crate::error::BridgeResult;
use crate::events::{AiEventKind, EventRouter, PlatformEventKind};
use crate::function_handler::FunctionHandler;
use crate::recorder::CallRecorder;
use crate::session::{SessionManager, SessionStatus};
use crate::transcript::TranscriptManager;

/// Everything a fresh or resumed call needs, assembled once by the caller
/// (the platform adapter's connection handler) and handed to
/// [`BridgeCall::accept`]. Keeping this as a plain struct -- rather than
/// back-references threaded through every component -- is the explicit
/// dependency-injection composition this orchestrator requires.
pub struct BridgeCallDeps {
    pub session_manager: Arc<SessionManager>,
    pub platform: Arc<dyn PlatformSink>,
    pub ai_sender: Arc<dyn AiServiceSender>,
    pub ai_session_config: AiSessionConfig,
    pub data_dir: PathBuf,
    pub bot_source_rate: u32,
    pub platform_rate: u32,
    pub commit_min_bytes: usize,
    pub max_session_age: Duration,
    pub initial_greeting: String,
}

/// A single active call's object graph and lifecycle.
pub struct BridgeCall {
    pub conversation_id: String,
    session_manager: Arc<SessionManager>,
    platform: Arc<dyn PlatformSink>,
    recorder: Arc<CallRecorder>,
    transcript: Arc<TranscriptManager>,
    functions: Arc<FunctionHandler>,
    ai_session: Arc<AiSessionManager<Arc<dyn AiServiceSender>>>,
    audio: Arc<AudioStreamHandler<Arc<dyn PlatformSink>, Arc<dyn AiServiceSender>>>,
    router: Arc<EventRouter<AiEventKind>>,
    platform_router: Arc<EventRouter<PlatformEventKind>>,
    serializer: Arc<ResponseSerializer>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl BridgeCall {
    /// Accepts a platform session-start event: resumes a prior session
    /// within `max_session_age` if one exists, otherwise creates a fresh
    /// one, opens the AI-service leg, and starts recording.
    pub async fn accept(
        conversation_id: String,
        platform_kind: &str,
        bot_name: &str,
        caller: &str,
        media_format: &str,
        deps: BridgeCallDeps,
    ) -> BridgeResult<Self> {
        let (session, resumed) = match deps
            .session_manager
            .resume(&conversation_id, deps.max_session_age)
            .await?
        {
            Some(session) => (session, true),
            None => {
                let session = deps
                    .session_manager
                    .create(&conversation_id, platform_kind, bot_name, caller, media_format)
                    .await?;
                deps.session_manager
                    .mutate(&conversation_id, |s| s.transition(SessionStatus::Active))
                    .await?;
                (session, false)
            }
        };

        let recorder = Arc::new(CallRecorder::start(
            deps.data_dir.join(&conversation_id),
            deps.bot_source_rate,
        )?);
        recorder.record_session_event(serde_json::json!({
            "event": if resumed { "resumed" } else { "created" },
        }));

        let transcript = Arc::new(TranscriptManager::new());
        transcript.attach_recorder(recorder.clone());
        if resumed {
            transcript.restore(&session.history);
        }

        let functions = Arc::new(FunctionHandler::new());
        let router: Arc<EventRouter<AiEventKind>> = Arc::new(EventRouter::new());
        let platform_router: Arc<EventRouter<PlatformEventKind>> = Arc::new(EventRouter::new());
        let ai_session = Arc::new(AiSessionManager::new(deps.ai_sender.clone(), deps.ai_session_config));
        let audio = Arc::new(AudioStreamHandler::new(
            deps.platform.clone(),
            deps.ai_sender.clone(),
            media_format,
            deps.platform_rate,
            deps.commit_min_bytes,
        ));
        audio.attach_recorder(recorder.clone());

        let call = Self {
            conversation_id,
            session_manager: deps.session_manager,
            platform: deps.platform,
            recorder,
            transcript,
            functions,
            ai_session,
            audio,
            router,
            platform_router,
            serializer: Arc::new(ResponseSerializer::default()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        };

        if resumed {
            log::info!(
                "[BridgeCore] resumed session {} (resumed_count={})",
                call.conversation_id,
                session.resumed_count
            );
        } else {
            call.ai_session.initialize_session().await?;
            call.ai_session.send_initial_item(&deps.initial_greeting).await?;
        }

        Ok(call)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// One decoded inbound audio frame from the platform leg.
    pub async fn handle_platform_audio(&self, pcm16_at_platform_rate: &[u8]) -> BridgeResult<()> {
        self.audio.inbound_chunk(pcm16_at_platform_rate).await
    }

    /// Platform signaled end of an utterance; attempts a commit and, if it
    /// succeeds, triggers (or defers) a new AI response.
    pub async fn handle_platform_commit(&self) -> BridgeResult<()> {
        if self.audio.commit().await? {
            handle_user_commit(&self.ai_session, &self.serializer).await?;
        }
        Ok(())
    }

    /// One event from the AI-service leg's receive loop. Takes `self` via
    /// `Arc` so a fatal AI-service error can schedule this call's close the
    /// same way C5's inferred hang-up does.
    pub async fn handle_ai_event(
        self: &Arc<Self>,
        raw_type: &str,
        payload: serde_json::Value,
    ) -> BridgeResult<()> {
        let weak = Arc::downgrade(self);
        let close: crate::ai_handler::CloseCallback = Arc::new(move |reason| {
            if let Some(call) = weak.upgrade() {
                tokio::spawn(async move {
                    call.close(&reason).await;
                });
            }
        });
        let ctx = AiHandlerContext {
            audio: self.audio.clone(),
            transcript: self.transcript.clone(),
            functions: self.functions.clone(),
            session: self.ai_session.clone(),
            router: self.router.clone(),
            session_manager: self.session_manager.clone(),
            conversation_id: self.conversation_id.clone(),
            recorder: self.recorder.clone(),
            close,
        };
        handle_ai_event(raw_type, payload, &ctx, &self.serializer).await
    }

    pub fn event_router(&self) -> &EventRouter<AiEventKind> {
        &self.router
    }

    pub fn platform_event_router(&self) -> &EventRouter<PlatformEventKind> {
        &self.platform_router
    }

    pub fn function_handler(&self) -> &FunctionHandler {
        &self.functions
    }

    /// Installs the hang-up callback so C5's inferred hang-up reaches this
    /// call's close path. Must be called once after construction; deferred
    /// out of `accept` because the callback needs to capture a handle back
    /// to `self`, which doesn't exist until construction finishes.
    pub fn install_hang_up(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.functions.set_hang_up_callback(Arc::new(move |reason| {
            if let Some(call) = weak.upgrade() {
                tokio::spawn(async move {
                    call.close(&reason).await;
                });
            }
        }));
    }

    /// Closes the call: sends a platform session-end message, stops the
    /// outbound stream, finalizes the recording, transitions the session
    /// to `ended`, and cancels every child task. Idempotent -- a second
    /// call is a no-op. Errors are logged, never propagated.
    pub async fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.functions.cancel_pending();
        self.recorder
            .record_session_event(serde_json::json!({ "event": "closed", "reason": reason }));

        if let Err(e) = self.platform.send_session_end(reason).await {
            log::warn!("[BridgeCore] {}: failed to send session-end: {e}", self.conversation_id);
        }
        if let Err(e) = self.audio.stop_stream().await {
            log::warn!("[BridgeCore] {}: failed to stop outbound stream: {e}", self.conversation_id);
        }
        if let Err(e) = self.recorder.stop(serde_json::json!({ "close_reason": reason })) {
            log::warn!("[BridgeCore] {}: failed to finalize recording: {e}", self.conversation_id);
        }
        if let Err(e) = self.session_manager.end(&self.conversation_id, reason).await {
            log::warn!("[BridgeCore] {}: failed to end session: {e}", self.conversation_id);
        }

        self.cancel.cancel();
        log::info!("[BridgeCore] {} closed: {reason}", self.conversation_id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_session::ToolSpec;
    use crate::session::MemoryStorage;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    struct NoopPlatform;
    #[async_trait]
    impl PlatformSink for NoopPlatform {
        async fn send_stream_start(&self, _stream_id: &str, _media_format: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn send_stream_chunk(&self, _stream_id: &str, _pcm16: &[u8]) -> BridgeResult<()> {
            Ok(())
        }
        async fn send_stream_stop(&self, _stream_id: &str) -> BridgeResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAi {
        sent: Arc<Mutex<Vec<Value>>>,
    }
    #[async_trait]
    impl AiServiceSender for RecordingAi {
        async fn send_json(&self, event: Value) -> BridgeResult<()> {
            self.sent.lock().push(event);
            Ok(())
        }
    }

    fn deps(data_dir: PathBuf, ai_sent: Arc<Mutex<Vec<Value>>>) -> BridgeCallDeps {
        BridgeCallDeps {
            session_manager: Arc::new(SessionManager::new(Arc::new(MemoryStorage::new(
                100,
                Duration::from_secs(60),
            )))),
            platform: Arc::new(NoopPlatform),
            ai_sender: Arc::new(RecordingAi { sent: ai_sent }),
            ai_session_config: AiSessionConfig {
                voice_id: "alloy".to_string(),
                temperature: 0.8,
                max_output_tokens: 4096,
                input_sample_rate: 16_000,
                vad_enabled: true,
                transcription_model: "whisper-1".to_string(),
                tools: vec![ToolSpec {
                    name: "wrap_up".to_string(),
                    description: "end the call".to_string(),
                    parameters: json!({ "type": "object" }),
                }],
            },
            data_dir,
            bot_source_rate: 24_000,
            platform_rate: 16_000,
            commit_min_bytes: 3200,
            max_session_age: Duration::from_secs(3600),
            initial_greeting: "greet the caller".to_string(),
        }
    }

    #[tokio::test]
    async fn fresh_call_sends_session_config_and_greeting() {
        let dir = tempdir().unwrap();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let call = BridgeCall::accept(
            "c1".to_string(),
            "audiocodes",
            "bot",
            "+1555",
            "raw/lpcm16",
            deps(dir.path().to_path_buf(), sent.clone()),
        )
        .await
        .unwrap();

        let events = sent.lock();
        assert_eq!(events[0]["type"], "session.update");
        assert_eq!(events[1]["type"], "conversation.item.create");
        assert_eq!(events[2]["type"], "response.create");
        drop(events);
        assert!(!call.is_closed());
    }

    #[tokio::test]
    async fn fresh_call_transitions_session_to_active() {
        let dir = tempdir().unwrap();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let session_manager = Arc::new(SessionManager::new(Arc::new(MemoryStorage::new(
            100,
            Duration::from_secs(60),
        ))));
        let mut call_deps = deps(dir.path().to_path_buf(), sent.clone());
        call_deps.session_manager = session_manager.clone();

        BridgeCall::accept("c1".to_string(), "audiocodes", "bot", "+1555", "raw/lpcm16", call_deps)
            .await
            .unwrap();

        let session = session_manager.get("c1", false).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let call = BridgeCall::accept(
            "c1".to_string(),
            "audiocodes",
            "bot",
            "+1555",
            "raw/lpcm16",
            deps(dir.path().to_path_buf(), sent.clone()),
        )
        .await
        .unwrap();

        call.close("test done").await;
        call.close("test done again").await;
        assert!(call.is_closed());
    }

    #[tokio::test]
    async fn sub_commit_audio_never_reaches_ai_service_as_commit() {
        let dir = tempdir().unwrap();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let call = BridgeCall::accept(
            "c1".to_string(),
            "audiocodes",
            "bot",
            "+1555",
            "raw/lpcm16",
            deps(dir.path().to_path_buf(), sent.clone()),
        )
        .await
        .unwrap();

        // 50ms at 16kHz = 1600 bytes, under the 3200-byte threshold.
        let pcm = vec![0u8; 1600];
        call.handle_platform_audio(&pcm).await.unwrap();
        call.handle_platform_commit().await.unwrap();

        let has_commit = sent
            .lock()
            .iter()
            .any(|e| e["type"] == "input_audio_buffer.commit");
        assert!(!has_commit);
    }
}
