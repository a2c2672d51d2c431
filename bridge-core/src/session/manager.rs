//! Session manager: the public surface C10 and the AI/platform handlers use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{BridgeError, BridgeResult};

use super::model::{CallSession, SessionStatus};
use super::storage::SessionStorage;

/// Invoked whenever a session transitions status, in descending priority
/// order. A callback that panics or returns an error is caught and logged;
/// it never aborts the transition or blocks later callbacks.
pub type TransitionCallback = Arc<dyn Fn(SessionStatus, SessionStatus, &CallSession) + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub reason: Option<String>,
    pub resumable: bool,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SessionStats {
    pub active_count: usize,
    pub total_resumed: u64,
    pub total_errors: u64,
}

/// Manages call session lifecycle on top of a pluggable storage backend.
pub struct SessionManager {
    storage: Arc<dyn SessionStorage>,
    callbacks: RwLock<Vec<(i32, TransitionCallback)>>,
    stats: RwLock<SessionStats>,
}

impl SessionManager {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self {
            storage,
            callbacks: RwLock::new(Vec::new()),
            stats: RwLock::new(SessionStats::default()),
        }
    }

    /// Registers a transition callback at the given priority (higher runs first).
    pub fn on_transition(&self, priority: i32, callback: TransitionCallback) {
        let mut callbacks = self.callbacks.write();
        callbacks.push((priority, callback));
        callbacks.sort_by(|a, b| b.0.cmp(&a.0));
    }

    fn fire_callbacks(&self, old: SessionStatus, new: SessionStatus, session: &CallSession) {
        let callbacks = self.callbacks.read();
        for (_, callback) in callbacks.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(old, new, session)
            }));
            if let Err(_panic) = result {
                log::error!(
                    "[SessionManager] transition callback panicked for session {}",
                    session.conversation_id
                );
            }
        }
    }

    async fn persist(&self, session: &CallSession) -> BridgeResult<()> {
        let serialized = serde_json::to_string(session)
            .map_err(|e| BridgeError::Storage(e.to_string()))?;
        self.storage.store(&session.conversation_id, serialized).await
    }

    async fn load(&self, id: &str, touch: bool) -> BridgeResult<Option<CallSession>> {
        let Some(raw) = self.storage.retrieve(id, touch).await? else {
            return Ok(None);
        };
        let session: CallSession = serde_json::from_str(&raw)
            .map_err(|e| BridgeError::Storage(format!("corrupt session {id}: {e}")))?;
        Ok(Some(session))
    }

    pub async fn create(
        &self,
        id: &str,
        platform: &str,
        bot_name: &str,
        caller: &str,
        media_format: &str,
    ) -> BridgeResult<CallSession> {
        let session = CallSession::new(id, platform, bot_name, caller, media_format);
        self.persist(&session).await?;
        Ok(session)
    }

    pub async fn get(&self, id: &str, update_activity: bool) -> BridgeResult<Option<CallSession>> {
        let mut session = match self.load(id, update_activity).await? {
            Some(s) => s,
            None => return Ok(None),
        };
        if update_activity {
            session.touch();
            self.persist(&session).await?;
        }
        Ok(Some(session))
    }

    /// Applies a mutation closure to the session and persists the result.
    /// Returns `false` if the session does not exist.
    pub async fn mutate<F>(&self, id: &str, f: F) -> BridgeResult<bool>
    where
        F: FnOnce(&mut CallSession) -> BridgeResult<()>,
    {
        let Some(mut session) = self.load(id, false).await? else {
            return Ok(false);
        };
        let old_status = session.status;
        f(&mut session)?;
        if session.status != old_status {
            self.fire_callbacks(old_status, session.status, &session);
        }
        self.persist(&session).await?;
        Ok(true)
    }

    pub async fn update(&self, id: &str, update: super::model::SessionUpdate) -> BridgeResult<bool> {
        self.mutate(id, move |session| session.apply_update(update)).await
    }

    /// Resumes a reconnecting session. Fails (returns `None`) if the
    /// session is missing, terminal, or has been idle past `max_age`.
    pub async fn resume(&self, id: &str, max_age: Duration) -> BridgeResult<Option<CallSession>> {
        let Some(mut session) = self.load(id, false).await? else {
            return Ok(None);
        };
        if session.status.is_terminal() {
            return Ok(None);
        }
        let age = session.age().to_std().unwrap_or(Duration::MAX);
        if age > max_age {
            return Ok(None);
        }
        let old_status = session.status;
        session.transition(SessionStatus::Active)?;
        session.resumed_count += 1;
        self.fire_callbacks(old_status, session.status, &session);
        self.persist(&session).await?;
        {
            let mut stats = self.stats.write();
            stats.total_resumed += 1;
        }
        Ok(Some(session))
    }

    pub async fn end(&self, id: &str, reason: &str) -> BridgeResult<bool> {
        let result = self
            .mutate(id, |session| {
                session.last_error = None;
                session.metadata = serde_json::json!({ "end_reason": reason });
                session.transition(SessionStatus::Ended)
            })
            .await;
        match result {
            Ok(found) => Ok(found),
            Err(BridgeError::InvalidSessionState(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    pub async fn delete(&self, id: &str) -> BridgeResult<bool> {
        self.storage.delete(id).await
    }

    pub async fn list_active(&self) -> BridgeResult<Vec<String>> {
        self.storage.list_active().await
    }

    pub async fn cleanup_expired(&self, max_age: Duration) -> BridgeResult<usize> {
        self.storage.cleanup_expired(max_age).await
    }

    pub async fn validate(&self, id: &str, max_age: Duration) -> BridgeResult<ValidationResult> {
        let Some(session) = self.load(id, false).await? else {
            return Ok(ValidationResult {
                valid: false,
                reason: Some("not found".to_string()),
                resumable: false,
            });
        };
        if session.status.is_terminal() {
            return Ok(ValidationResult {
                valid: false,
                reason: Some(format!("terminal status {:?}", session.status)),
                resumable: false,
            });
        }
        let age = session.age().to_std().unwrap_or(Duration::MAX);
        let resumable = age <= max_age;
        Ok(ValidationResult {
            valid: true,
            reason: None,
            resumable,
        })
    }

    pub async fn stats(&self) -> BridgeResult<SessionStats> {
        let active_count = self.storage.list_active().await?.len();
        let mut stats = self.stats.read().clone();
        stats.active_count = active_count;
        Ok(stats)
    }
}

/// Placeholder type kept for documentation purposes; real callers key by
/// conversation id stored on the session itself.
pub type SessionIndex = HashMap<String, CallSession>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::SessionUpdate;
    use crate::session::storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> SessionManager {
        let storage = Arc::new(MemoryStorage::new(100, Duration::from_secs(60)));
        SessionManager::new(storage)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let mgr = manager();
        mgr.create("c1", "audiocodes", "bot", "+1", "raw/lpcm16").await.unwrap();
        let session = mgr.get("c1", false).await.unwrap().unwrap();
        assert_eq!(session.conversation_id, "c1");
        assert_eq!(session.status, SessionStatus::Initiated);
    }

    #[tokio::test]
    async fn resume_fails_for_missing_session() {
        let mgr = manager();
        let result = mgr.resume("missing", Duration::from_secs(60)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn resume_fails_for_terminal_session() {
        let mgr = manager();
        mgr.create("c1", "audiocodes", "bot", "+1", "raw/lpcm16").await.unwrap();
        mgr.end("c1", "test").await.unwrap();
        let result = mgr.resume("c1", Duration::from_secs(60)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn resume_succeeds_and_increments_count() {
        let mgr = manager();
        mgr.create("c1", "audiocodes", "bot", "+1", "raw/lpcm16").await.unwrap();
        let session = mgr.resume("c1", Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.resumed_count, 1);
    }

    #[tokio::test]
    async fn update_applies_typed_fields() {
        let mgr = manager();
        mgr.create("c1", "audiocodes", "bot", "+1", "raw/lpcm16").await.unwrap();
        let update = SessionUpdate {
            ai_session_id: Some("ai-1".to_string()),
            ..Default::default()
        };
        assert!(mgr.update("c1", update).await.unwrap());
        let session = mgr.get("c1", false).await.unwrap().unwrap();
        assert_eq!(session.ai_session_id.as_deref(), Some("ai-1"));
    }

    #[tokio::test]
    async fn transition_callbacks_fire_in_priority_order() {
        let mgr = manager();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let order_a = order.clone();
        mgr.on_transition(10, Arc::new(move |_, _, _| {
            order_a.lock().push("high");
        }));
        let order_b = order.clone();
        let calls_b = calls.clone();
        mgr.on_transition(1, Arc::new(move |_, _, _| {
            calls_b.fetch_add(1, Ordering::SeqCst);
            order_b.lock().push("low");
        }));

        mgr.create("c1", "audiocodes", "bot", "+1", "raw/lpcm16").await.unwrap();
        mgr.mutate("c1", |s| s.transition(SessionStatus::Active)).await.unwrap();

        assert_eq!(*order.lock(), vec!["high", "low"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn end_is_idempotent() {
        let mgr = manager();
        mgr.create("c1", "audiocodes", "bot", "+1", "raw/lpcm16").await.unwrap();
        assert!(mgr.end("c1", "done").await.unwrap());
        assert!(mgr.end("c1", "done again").await.unwrap());
    }

    #[tokio::test]
    async fn validate_reports_not_found() {
        let mgr = manager();
        let result = mgr.validate("missing", Duration::from_secs(60)).await.unwrap();
        assert!(!result.valid);
    }
}
