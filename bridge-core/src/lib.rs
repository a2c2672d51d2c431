//! Bridge Core - shared library for the telephony-to-conversational-AI
//! audio bridge.
//!
//! This crate provides the core functionality for bridging a telephony
//! platform leg (AudioCodes-style gateway, Twilio-style cloud telephony)
//! to a conversational AI service over a persistent bidirectional channel.
//! It is designed to be used by both the standalone `bridge-server` binary
//! and any embedding application that wants the bridge runtime without the
//! HTTP transport layer.
//!
//! # Architecture
//!
//! - [`codec`]: audio codec & resampler (C1)
//! - [`session`]: typed per-call session state & pluggable storage (C2)
//! - [`recorder`]: parallel caller/bot WAV capture and journal (C3)
//! - [`transcript`]: incremental transcript accumulation (C4)
//! - [`function_handler`]: function-call dispatch & hang-up inference (C5)
//! - [`ai_session`]: AI-service session configuration (C6)
//! - [`events`]: typed, priority-ordered event router (C7)
//! - [`audio_stream`]: inbound commit accounting & outbound stream framing (C8)
//! - [`ai_handler`] / [`ai_leg`]: AI-service leg consumption & transport (C9)
//! - [`bridge`]: per-call orchestrator (C10)
//! - [`adapters`]: platform-specific wire translation (C11)
//! - [`api`] / [`bootstrap`]: HTTP/WS transport and composition root (C12)
//! - [`error`]: centralized error taxonomy (C13)
//! - [`agent`]: the seam between the bridge runtime and a deployment's bot

#![warn(clippy::all)]

pub mod adapters;
pub mod agent;
pub mod ai_handler;
pub mod ai_leg;
pub mod ai_session;
pub mod api;
pub mod audio_stream;
pub mod bootstrap;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod function_handler;
pub mod recorder;
pub mod session;
pub mod transcript;

pub use adapters::AdapterDeps;
pub use agent::{Agent, VoiceBotAgent};
pub use ai_leg::{AiLegConnector, LiveAiLegConnector, LocalAiLegConnector};
pub use api::{create_bridge_router, BridgeAppState, WsConnectionManager};
pub use bootstrap::{bootstrap_bridge, BridgeBootstrap};
pub use bridge::{BridgeCall, BridgeCallDeps};
pub use config::Config as BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use session::{CallSession, SessionManager, SessionStatus};
