//! Call session state and storage (C2).

mod manager;
mod model;
mod storage;

pub use manager::{SessionManager, SessionStats, TransitionCallback, ValidationResult};
pub use model::{
    CallSession, ConversationItem, Direction, FunctionCallRecord, FunctionCallStatus,
    SessionStatus,
};
pub use storage::{MemoryStorage, RedisStorage, SessionStorage};
