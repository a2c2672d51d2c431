//! Audio stream handler (C8): inbound commit accounting and outbound
//! stream framing between a platform leg and the AI-service leg.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::json;

use crate::ai_session::AiServiceSender;
use crate::codec::{pad_to_min, resample};
use crate::error::BridgeResult;
use crate::recorder::CallRecorder;

/// Sink for outbound (AI -> platform) audio framing. Adapters implement
/// this to apply their own wire encoding (µ-law, JSON shape) on top of the
/// raw PCM16 bytes C8 hands them.
#[async_trait]
pub trait PlatformSink: Send + Sync {
    async fn send_stream_start(&self, stream_id: &str, media_format: &str) -> BridgeResult<()>;
    async fn send_stream_chunk(&self, stream_id: &str, pcm16: &[u8]) -> BridgeResult<()>;
    async fn send_stream_stop(&self, stream_id: &str) -> BridgeResult<()>;
    /// Sends a platform-native session-end message, if the platform
    /// protocol has one. Default no-op for platforms that don't.
    async fn send_session_end(&self, _reason: &str) -> BridgeResult<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: PlatformSink + ?Sized> PlatformSink for std::sync::Arc<T> {
    async fn send_stream_start(&self, stream_id: &str, media_format: &str) -> BridgeResult<()> {
        (**self).send_stream_start(stream_id, media_format).await
    }
    async fn send_stream_chunk(&self, stream_id: &str, pcm16: &[u8]) -> BridgeResult<()> {
        (**self).send_stream_chunk(stream_id, pcm16).await
    }
    async fn send_stream_stop(&self, stream_id: &str) -> BridgeResult<()> {
        (**self).send_stream_stop(stream_id).await
    }
    async fn send_session_end(&self, reason: &str) -> BridgeResult<()> {
        (**self).send_session_end(reason).await
    }
}

const AI_SAMPLE_RATE: u32 = 16_000;

/// Per-call audio bridge between a platform leg and the AI-service leg.
pub struct AudioStreamHandler<P: PlatformSink, A: AiServiceSender> {
    platform: P,
    ai: A,
    platform_media_format: String,
    platform_rate: u32,
    commit_min_bytes: usize,
    bytes_sent: AtomicU64,
    chunks_sent: AtomicU64,
    active_stream_id: Mutex<Option<String>>,
    socket_closed: std::sync::atomic::AtomicBool,
    recorder: Mutex<Option<Arc<CallRecorder>>>,
}

impl<P: PlatformSink, A: AiServiceSender> AudioStreamHandler<P, A> {
    pub fn new(
        platform: P,
        ai: A,
        platform_media_format: impl Into<String>,
        platform_rate: u32,
        commit_min_bytes: usize,
    ) -> Self {
        Self {
            platform,
            ai,
            platform_media_format: platform_media_format.into(),
            platform_rate,
            commit_min_bytes,
            bytes_sent: AtomicU64::new(0),
            chunks_sent: AtomicU64::new(0),
            active_stream_id: Mutex::new(None),
            socket_closed: std::sync::atomic::AtomicBool::new(false),
            recorder: Mutex::new(None),
        }
    }

    /// Attaches the call's recorder so inbound/outbound frames are captured
    /// alongside the live streams. Mirrors [`crate::transcript::TranscriptManager::attach_recorder`].
    pub fn attach_recorder(&self, recorder: Arc<CallRecorder>) {
        *self.recorder.lock() = Some(recorder);
    }

    /// Handles one inbound PCM16 frame at the platform's native sample
    /// rate (already µ-law-decoded by the adapter if applicable).
    /// Resamples to 16kHz, pads short frames, updates commit counters, and
    /// forwards the chunk to the AI service.
    pub async fn inbound_chunk(&self, pcm16_at_platform_rate: &[u8]) -> BridgeResult<()> {
        let resampled = resample(pcm16_at_platform_rate, self.platform_rate, AI_SAMPLE_RATE);
        // Counters track genuine audio content so the commit threshold
        // reflects real speech, not padding added for wire-format hygiene.
        self.bytes_sent.fetch_add(resampled.len() as u64, Ordering::SeqCst);
        self.chunks_sent.fetch_add(1, Ordering::SeqCst);

        if let Some(recorder) = self.recorder.lock().as_ref() {
            if let Err(e) = recorder.record_caller_frame(&resampled) {
                log::warn!("[AudioStreamHandler] failed to record caller frame: {e}");
            }
        }

        let padded = pad_to_min(&resampled, self.commit_min_bytes);
        let event = json!({
            "type": "input_audio_buffer.append",
            "audio": BASE64.encode(&padded),
        });
        self.ai.send_json(event).await
    }

    /// Sends a commit event to the AI service only if accumulated bytes
    /// meet the 100ms threshold. Resets counters either way is wrong --
    /// only a real commit resets them; a suppressed attempt retains them
    /// for the next call.
    pub async fn commit(&self) -> BridgeResult<bool> {
        let bytes = self.bytes_sent.load(Ordering::SeqCst);
        if (bytes as usize) < self.commit_min_bytes {
            log::info!(
                "[AudioStreamHandler] commit suppressed: {bytes} bytes < {} threshold",
                self.commit_min_bytes
            );
            return Ok(false);
        }
        self.ai
            .send_json(json!({ "type": "input_audio_buffer.commit" }))
            .await?;
        self.bytes_sent.store(0, Ordering::SeqCst);
        self.chunks_sent.store(0, Ordering::SeqCst);
        Ok(true)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::SeqCst)
    }

    /// Handles a decoded 24kHz PCM16 audio chunk from the AI service,
    /// resampling to the platform's rate and forwarding it as a stream
    /// chunk, opening a stream first if none is active.
    pub async fn outbound_chunk(&self, pcm16_at_24k: &[u8]) -> BridgeResult<()> {
        if self.socket_closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(recorder) = self.recorder.lock().as_ref() {
            if let Err(e) = recorder.record_bot_frame(pcm16_at_24k) {
                log::warn!("[AudioStreamHandler] failed to record bot frame: {e}");
            }
        }

        let (stream_id, is_new_stream) = {
            let mut active = self.active_stream_id.lock();
            match active.as_ref() {
                Some(id) => (id.clone(), false),
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    *active = Some(id.clone());
                    (id, true)
                }
            }
        };

        if is_new_stream
            && self
                .platform
                .send_stream_start(&stream_id, &self.platform_media_format)
                .await
                .is_err()
        {
            self.socket_closed.store(true, Ordering::SeqCst);
            return Ok(());
        }

        let resampled = resample(pcm16_at_24k, 24_000, self.platform_rate);
        if self
            .platform
            .send_stream_chunk(&stream_id, &resampled)
            .await
            .is_err()
        {
            self.socket_closed.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Closes the currently open outbound stream, if any.
    pub async fn stop_stream(&self) -> BridgeResult<()> {
        let stream_id = self.active_stream_id.lock().take();
        if let Some(stream_id) = stream_id {
            if self.socket_closed.load(Ordering::SeqCst) {
                return Ok(());
            }
            let _ = self.platform.send_stream_stop(&stream_id).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingPlatform {
        starts: Arc<PMutex<Vec<String>>>,
        chunks: Arc<PMutex<usize>>,
        stops: Arc<PMutex<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl PlatformSink for RecordingPlatform {
        async fn send_stream_start(&self, stream_id: &str, _media_format: &str) -> BridgeResult<()> {
            if self.fail {
                return Err(crate::error::BridgeError::Transport("closed".into()));
            }
            self.starts.lock().push(stream_id.to_string());
            Ok(())
        }
        async fn send_stream_chunk(&self, _stream_id: &str, _pcm16: &[u8]) -> BridgeResult<()> {
            if self.fail {
                return Err(crate::error::BridgeError::Transport("closed".into()));
            }
            *self.chunks.lock() += 1;
            Ok(())
        }
        async fn send_stream_stop(&self, _stream_id: &str) -> BridgeResult<()> {
            *self.stops.lock() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingAi {
        events: Arc<PMutex<Vec<serde_json::Value>>>,
    }

    #[async_trait]
    impl AiServiceSender for RecordingAi {
        async fn send_json(&self, event: serde_json::Value) -> BridgeResult<()> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    fn silence(ms: u32, rate: u32) -> Vec<u8> {
        let samples = (rate / 1000 * ms) as usize;
        vec![0u8; samples * 2]
    }

    #[tokio::test]
    async fn commit_suppressed_below_threshold() {
        let handler = AudioStreamHandler::new(
            RecordingPlatform::default(),
            RecordingAi::default(),
            "raw/lpcm16",
            16_000,
            3200,
        );
        handler.inbound_chunk(&silence(50, 16_000)).await.unwrap();
        let committed = handler.commit().await.unwrap();
        assert!(!committed);
        assert!(handler.bytes_sent() > 0);
    }

    #[tokio::test]
    async fn commit_succeeds_at_threshold_and_resets() {
        let handler = AudioStreamHandler::new(
            RecordingPlatform::default(),
            RecordingAi::default(),
            "raw/lpcm16",
            16_000,
            3200,
        );
        handler.inbound_chunk(&silence(200, 16_000)).await.unwrap();
        let committed = handler.commit().await.unwrap();
        assert!(committed);
        assert_eq!(handler.bytes_sent(), 0);
    }

    #[tokio::test]
    async fn outbound_opens_stream_once_for_multiple_chunks() {
        let starts = Arc::new(PMutex::new(Vec::new()));
        let chunks = Arc::new(PMutex::new(0));
        let platform = RecordingPlatform {
            starts: starts.clone(),
            chunks: chunks.clone(),
            ..Default::default()
        };
        let handler = AudioStreamHandler::new(platform, RecordingAi::default(), "raw/lpcm16", 16_000, 3200);
        handler.outbound_chunk(&silence(20, 24_000)).await.unwrap();
        handler.outbound_chunk(&silence(20, 24_000)).await.unwrap();
        assert_eq!(starts.lock().len(), 1);
        assert_eq!(*chunks.lock(), 2);
    }

    #[tokio::test]
    async fn outbound_tolerates_closed_socket() {
        let platform = RecordingPlatform {
            fail: true,
            ..Default::default()
        };
        let handler = AudioStreamHandler::new(platform, RecordingAi::default(), "raw/lpcm16", 16_000, 3200);
        let result = handler.outbound_chunk(&silence(20, 24_000)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn attached_recorder_captures_inbound_and_outbound_frames() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(CallRecorder::start(dir.path(), 24_000).unwrap());
        let handler = AudioStreamHandler::new(
            RecordingPlatform::default(),
            RecordingAi::default(),
            "raw/lpcm16",
            16_000,
            3200,
        );
        handler.attach_recorder(recorder.clone());
        handler.inbound_chunk(&silence(50, 16_000)).await.unwrap();
        handler.outbound_chunk(&silence(20, 24_000)).await.unwrap();
        recorder.stop(serde_json::json!({})).unwrap();
        assert!(dir.path().join("caller.wav").exists());
        assert!(dir.path().join("bot.wav").exists());
    }

    #[tokio::test]
    async fn stop_stream_clears_active_id() {
        let stops = Arc::new(PMutex::new(0));
        let platform = RecordingPlatform {
            stops: stops.clone(),
            ..Default::default()
        };
        let handler = AudioStreamHandler::new(platform, RecordingAi::default(), "raw/lpcm16", 16_000, 3200);
        handler.outbound_chunk(&silence(20, 24_000)).await.unwrap();
        handler.stop_stream().await.unwrap();
        assert_eq!(*stops.lock(), 1);
        handler.stop_stream().await.unwrap();
        assert_eq!(*stops.lock(), 1);
    }
}
