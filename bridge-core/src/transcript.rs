//! Transcript manager (C4): per-direction delta buffering and restore.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::recorder::{CallRecorder, TranscriptChannel, TranscriptKind, TranscriptRecord};
use crate::session::{ConversationItem, Direction};

/// Buffers streaming transcript deltas for one direction (caller or bot)
/// until a completion event arrives, then flushes the concatenated text.
pub struct TranscriptManager {
    caller_buffer: Mutex<String>,
    bot_buffer: Mutex<String>,
    recorder: Mutex<Option<Arc<CallRecorder>>>,
}

impl Default for TranscriptManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptManager {
    pub fn new() -> Self {
        Self {
            caller_buffer: Mutex::new(String::new()),
            bot_buffer: Mutex::new(String::new()),
            recorder: Mutex::new(None),
        }
    }

    pub fn attach_recorder(&self, recorder: Arc<CallRecorder>) {
        *self.recorder.lock() = Some(recorder);
    }

    /// Appends an input-audio-transcription delta (caller direction).
    pub fn push_caller_delta(&self, delta: &str) {
        self.caller_buffer.lock().push_str(delta);
    }

    /// Appends a response-audio-transcript delta (bot direction).
    pub fn push_bot_delta(&self, delta: &str) {
        self.bot_buffer.lock().push_str(delta);
    }

    /// Flushes the caller buffer: emits it to the recorder and clears it.
    pub fn complete_caller(&self) -> String {
        let text = {
            let mut buf = self.caller_buffer.lock();
            std::mem::take(&mut *buf)
        };
        self.emit(TranscriptChannel::Caller, TranscriptKind::Input, &text);
        text
    }

    /// Flushes the bot buffer: emits it to the recorder and clears it.
    pub fn complete_bot(&self) -> String {
        let text = {
            let mut buf = self.bot_buffer.lock();
            std::mem::take(&mut *buf)
        };
        self.emit(TranscriptChannel::Bot, TranscriptKind::Output, &text);
        text
    }

    fn emit(&self, channel: TranscriptChannel, kind: TranscriptKind, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(recorder) = self.recorder.lock().as_ref() {
            recorder.record_transcript(TranscriptRecord {
                timestamp: chrono::Utc::now(),
                channel,
                kind,
                text: text.to_string(),
                confidence: None,
                duration_ms: None,
            });
        }
    }

    /// Rehydrates both buffers from a persisted conversation history on
    /// resume. Each buffer is seeded with the text of the most recent
    /// history item for its direction, so a stray delta that arrives
    /// before the next completion event continues from the last known
    /// utterance instead of an empty string.
    pub fn restore(&self, history: &[ConversationItem]) {
        let mut caller = String::new();
        let mut bot = String::new();
        for item in history {
            match item.direction {
                Direction::User => caller = item.text.clone(),
                Direction::Assistant => bot = item.text.clone(),
                Direction::System => {}
            }
        }
        *self.caller_buffer.lock() = caller;
        *self.bot_buffer.lock() = bot;
    }
}
