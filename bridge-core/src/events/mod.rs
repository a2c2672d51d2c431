//! Event routing for the bridge (C7).
//!
//! The router dispatches platform-leg and AI-service-leg events through
//! ordered, priority-ranked handler lists, with a middleware pipeline that
//! can redact, annotate, or drop an event before it reaches handlers.

mod router;

pub use router::{EventRouter, Handler, Middleware};

use serde::{Deserialize, Serialize};

/// AI-service event kinds, per the fixed taxonomy the leg must handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiEventKind {
    SessionUpdated,
    SessionCreated,
    SpeechStarted,
    SpeechStopped,
    InputAudioCommitted,
    ResponseCreated,
    AudioDelta,
    AudioDone,
    TranscriptDelta,
    TranscriptDone,
    InputTranscriptionDelta,
    InputTranscriptionCompleted,
    FunctionCallArgumentsDelta,
    FunctionCallArgumentsDone,
    OutputItemAdded,
    ResponseDone,
    Error,
    Unknown,
}

impl AiEventKind {
    /// Maps a raw AI-service `type` field to its kind. Unrecognized types
    /// map to `Unknown` rather than failing -- the router logs these at
    /// debug level instead of treating them as errors.
    pub fn from_wire_type(raw: &str) -> Self {
        match raw {
            "session.updated" => Self::SessionUpdated,
            "session.created" => Self::SessionCreated,
            "input_audio_buffer.speech_started" => Self::SpeechStarted,
            "input_audio_buffer.speech_stopped" => Self::SpeechStopped,
            "input_audio_buffer.committed" => Self::InputAudioCommitted,
            "response.created" => Self::ResponseCreated,
            "response.audio.delta" => Self::AudioDelta,
            "response.audio.done" => Self::AudioDone,
            "response.audio_transcript.delta" => Self::TranscriptDelta,
            "response.audio_transcript.done" => Self::TranscriptDone,
            "conversation.item.input_audio_transcription.delta" => Self::InputTranscriptionDelta,
            "conversation.item.input_audio_transcription.completed" => {
                Self::InputTranscriptionCompleted
            }
            "response.function_call_arguments.delta" => Self::FunctionCallArgumentsDelta,
            "response.function_call_arguments.done" => Self::FunctionCallArgumentsDone,
            "response.output_item.added" => Self::OutputItemAdded,
            "response.done" => Self::ResponseDone,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

/// Platform event kinds are adapter-defined wire strings (e.g.
/// `"userStream.chunk"`, `"media"`), so the router keys on the raw string
/// rather than a closed enum -- each adapter (C11) owns its own vocabulary.
pub type PlatformEventKind = String;
