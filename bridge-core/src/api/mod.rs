//! HTTP/WebSocket API layer: the bridge's router and connection registry.

pub mod bridge_router;
pub mod response;
pub mod ws_connection;

pub use bridge_router::{create_bridge_router, BridgeAppState};
pub use ws_connection::WsConnectionManager;
