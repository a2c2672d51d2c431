//! Call session data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};

/// Lifecycle status of a call session.
///
/// Transitions form a DAG: `initiated -> active`, `active <-> paused`,
/// and any status may move to `ended` or `error`. Every other edge,
/// including any move out of a terminal state, is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiated,
    Active,
    Paused,
    Ended,
    Error,
}

impl SessionStatus {
    /// Whether a transition from `self` to `next` is permitted by the DAG.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Ended, _) | (Error, _) => false,
            (_, Ended) | (_, Error) => true,
            (Initiated, Active) => true,
            (Active, Paused) | (Paused, Active) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Error)
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Initiated
    }
}

/// Unknown status strings deserialize to `initiated` per the storage contract.
pub fn status_from_str_lenient(s: &str) -> SessionStatus {
    match s {
        "active" => SessionStatus::Active,
        "paused" => SessionStatus::Paused,
        "ended" => SessionStatus::Ended,
        "error" => SessionStatus::Error,
        "initiated" => SessionStatus::Initiated,
        other => {
            log::warn!("[SessionModel] unknown status '{other}', defaulting to initiated");
            SessionStatus::Initiated
        }
    }
}

/// Speaking direction for a conversation item or transcript delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    User,
    Assistant,
    System,
}

/// An append-only entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationItem {
    pub direction: Direction,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

/// Lifecycle status of a single function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionCallStatus {
    Streaming,
    Completed,
    Failed,
}

/// A single function invocation, keyed by `call_id` and unique per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallRecord {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
    pub status: FunctionCallStatus,
    pub result: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

/// A typed update to apply to a session. Unknown fields are rejected by
/// construction (the struct has no catch-all), unlike the dynamic
/// keyword-argument merge the behavior was modeled on.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub media_format: Option<String>,
    pub ai_session_id: Option<String>,
    pub active_response_id: Option<Option<String>>,
    pub last_error: Option<Option<String>>,
    pub metadata: Option<Value>,
}

/// One active call, owned exclusively by the bridge core (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub conversation_id: String,
    pub platform: String,
    pub bot_name: String,
    pub caller: String,
    pub media_format: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub resumed_count: u32,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub ai_session_id: Option<String>,
    pub active_response_id: Option<String>,
    pub history: Vec<ConversationItem>,
    pub function_calls: Vec<FunctionCallRecord>,
    #[serde(default)]
    pub metadata: Value,
}

impl CallSession {
    pub fn new(conversation_id: impl Into<String>, platform: impl Into<String>, bot_name: impl Into<String>, caller: impl Into<String>, media_format: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            platform: platform.into(),
            bot_name: bot_name.into(),
            caller: caller.into(),
            media_format: media_format.into(),
            status: SessionStatus::Initiated,
            created_at: now,
            last_activity: now,
            resumed_count: 0,
            error_count: 0,
            last_error: None,
            ai_session_id: None,
            active_response_id: None,
            history: Vec::new(),
            function_calls: Vec::new(),
            metadata: Value::Null,
        }
    }

    /// Attempts a status transition, enforcing the DAG invariant.
    pub fn transition(&mut self, next: SessionStatus) -> BridgeResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(BridgeError::InvalidSessionState(format!(
                "cannot transition session {} from {:?} to {:?}",
                self.conversation_id, self.status, next
            )));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Refreshes `last_activity` to now. Monotonic within a status run.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.last_activity
    }

    pub fn push_history(&mut self, direction: Direction, text: impl Into<String>) {
        self.history.push(ConversationItem {
            direction,
            text: text.into(),
            timestamp: Utc::now(),
            metadata: Value::Null,
        });
    }

    /// Applies a typed update record. Returns an error only if the
    /// requested status transition is invalid; other fields always apply.
    pub fn apply_update(&mut self, update: SessionUpdate) -> BridgeResult<()> {
        if let Some(status) = update.status {
            self.transition(status)?;
        }
        if let Some(format) = update.media_format {
            self.media_format = format;
        }
        if let Some(ai_session_id) = update.ai_session_id {
            self.ai_session_id = Some(ai_session_id);
        }
        if let Some(response_id) = update.active_response_id {
            self.active_response_id = response_id;
        }
        if let Some(err) = update.last_error {
            if err.is_some() {
                self.error_count += 1;
            }
            self.last_error = err;
        }
        if let Some(metadata) = update.metadata {
            self.metadata = metadata;
        }
        self.touch();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dag_permits_initiated_to_active() {
        assert!(SessionStatus::Initiated.can_transition_to(SessionStatus::Active));
    }

    #[test]
    fn dag_permits_active_paused_round_trip() {
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Paused));
        assert!(SessionStatus::Paused.can_transition_to(SessionStatus::Active));
    }

    #[test]
    fn dag_rejects_backward_move_from_terminal() {
        assert!(!SessionStatus::Ended.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Error.can_transition_to(SessionStatus::Active));
    }

    #[test]
    fn dag_rejects_initiated_to_paused() {
        assert!(!SessionStatus::Initiated.can_transition_to(SessionStatus::Paused));
    }

    #[test]
    fn any_status_can_end() {
        for status in [
            SessionStatus::Initiated,
            SessionStatus::Active,
            SessionStatus::Paused,
        ] {
            assert!(status.can_transition_to(SessionStatus::Ended));
        }
    }

    #[test]
    fn session_transition_updates_activity() {
        let mut session = CallSession::new("c1", "audiocodes", "bot", "+1555", "raw/lpcm16");
        let before = session.last_activity;
        std::thread::sleep(std::time::Duration::from_millis(2));
        session.transition(SessionStatus::Active).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.last_activity >= before);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let mut session = CallSession::new("c1", "audiocodes", "bot", "+1555", "raw/lpcm16");
        session.transition(SessionStatus::Ended).unwrap();
        let err = session.transition(SessionStatus::Active).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidSessionState(_)));
    }

    #[test]
    fn unknown_status_string_defaults_to_initiated() {
        assert_eq!(status_from_str_lenient("bogus"), SessionStatus::Initiated);
        assert_eq!(status_from_str_lenient("active"), SessionStatus::Active);
    }
}
