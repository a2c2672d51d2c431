//! Runtime configuration for the bridge core library.
//!
//! Mirrors the shape of the original Thaumic Cast `Config`: a flat,
//! `serde`-deserializable struct with a `Default` impl covering every
//! field, so a missing config file degrades to sane defaults rather than
//! a startup failure.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Storage backend selection for session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process `DashMap`-backed storage. Lost on restart.
    Memory,
    /// Redis-backed storage, shared across bridge instances.
    Redis,
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::Memory
    }
}

/// Core bridge configuration, independent of transport/CLI concerns.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// WebSocket URL of the conversational AI service. Ignored when
    /// `use_local_ai` is set.
    pub ai_service_url: String,

    /// Model identifier passed to the AI service on session creation.
    pub ai_model_id: String,

    /// Default voice identifier for the AI service's spoken responses.
    pub voice_id: String,

    /// Maximum age a call session may reach before the cleanup sweep evicts it.
    pub max_session_age_seconds: u64,

    /// Whether the AI service should run server-side voice activity detection.
    pub vad_enabled: bool,

    /// Use a local/offline AI service endpoint instead of the hosted one.
    pub use_local_ai: bool,

    /// Which backend session state is persisted to.
    pub storage_backend: StorageBackend,

    /// Redis connection URL, required when `storage_backend` is `Redis`.
    pub storage_url: Option<String>,

    /// Directory recordings and transcripts are written under.
    pub data_dir: Option<std::path::PathBuf>,

    /// Seconds of inactivity on the AI-service leg before it is considered dead.
    pub ai_service_heartbeat_timeout_seconds: u64,

    /// Interval between session-store cleanup sweeps.
    pub session_cleanup_interval_seconds: u64,

    /// Capacity of the broadcast channel backing the event router.
    pub event_channel_capacity: usize,

    /// Delay between the "goodbye" function call and forcing the call closed.
    pub hang_up_delay_seconds: f64,

    /// Minimum bytes of inbound audio required before a commit is honored.
    pub commit_min_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ai_service_url: "wss://localhost:8765/v1/realtime".to_string(),
            ai_model_id: "gpt-4o-realtime-preview".to_string(),
            voice_id: "alloy".to_string(),
            max_session_age_seconds: 3600,
            vad_enabled: true,
            use_local_ai: false,
            storage_backend: StorageBackend::Memory,
            storage_url: None,
            data_dir: None,
            ai_service_heartbeat_timeout_seconds: 30,
            session_cleanup_interval_seconds: 60,
            event_channel_capacity: 256,
            hang_up_delay_seconds: 8.0,
            commit_min_bytes: 3200,
        }
    }
}

impl Config {
    /// Duration form of [`Config::hang_up_delay_seconds`].
    pub fn hang_up_delay(&self) -> Duration {
        Duration::from_secs_f64(self.hang_up_delay_seconds)
    }

    /// Duration form of [`Config::session_cleanup_interval_seconds`].
    pub fn session_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.session_cleanup_interval_seconds)
    }

    /// Duration form of [`Config::ai_service_heartbeat_timeout_seconds`].
    pub fn ai_service_heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_service_heartbeat_timeout_seconds)
    }

    /// Duration form of [`Config::max_session_age_seconds`].
    pub fn max_session_age(&self) -> Duration {
        Duration::from_secs(self.max_session_age_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.storage_backend, StorageBackend::Memory);
        assert_eq!(cfg.commit_min_bytes, 3200);
        assert!((cfg.hang_up_delay_seconds - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn redis_backend_round_trips_through_yaml() {
        let yaml = "storage_backend: redis\nstorage_url: redis://localhost:6379\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.storage_backend, StorageBackend::Redis);
        assert_eq!(cfg.storage_url.as_deref(), Some("redis://localhost:6379"));
    }
}
