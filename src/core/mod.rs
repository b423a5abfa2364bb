//! 核心层：错误类型、会话状态投影、会话监管、交互驱动器

pub mod error;
pub mod orchestrator;
pub mod session_supervisor;
pub mod state;

pub use error::AgentError;
pub use orchestrator::{spawn_session, Command};
pub use session_supervisor::SessionSupervisor;
pub use state::{SessionState, TurnPhase};
