//! Platform adapters (C11): translate each telephony platform's wire
//! protocol into the bridge-core interface and drive a [`crate::bridge::BridgeCall`]
//! for the lifetime of the connection.
//!
//! Each adapter owns exactly one WebSocket connection. It waits for the
//! platform's session-start handshake, builds a [`crate::bridge::BridgeCallDeps`],
//! accepts a [`crate::bridge::BridgeCall`], then runs two concurrent read loops --
//! one for the platform socket, one for the AI-service leg -- until either
//! side closes or the call's cancellation token fires.

pub mod audiocodes;
pub mod twilio;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::Agent;
use crate::ai_leg::AiLegConnector;
use crate::session::SessionManager;

/// Shared wiring every adapter needs to accept a call. Built once by the
/// composition root and handed to each connection handler; cheap to clone
/// since every field is an `Arc`, a small value, or owned config data.
#[derive(Clone)]
pub struct AdapterDeps {
    pub session_manager: Arc<SessionManager>,
    pub ai_connector: Arc<dyn AiLegConnector>,
    /// Supplies the AI-session parameters and the call's function registry.
    /// Injected rather than hard-coded here so C11 stays ignorant of what
    /// the bot actually does.
    pub agent: Arc<dyn Agent>,
    pub data_dir: PathBuf,
    pub bot_source_rate: u32,
    pub commit_min_bytes: usize,
    pub max_session_age: Duration,
    pub initial_greeting: String,
}
