//! 权限层：工具确认门（用户同意）、能力信任门（白名单）、持久化设置

pub mod confirmation;
pub mod settings;
pub mod trust;

pub use confirmation::{
    ConfirmationDecision, ConfirmationGate, ConfirmationPrompter, GateState, ScriptedPrompter,
    SessionApproval, ToolDescription,
};
pub use settings::{FileSettingsStore, InMemorySettingsStore, SettingsStore};
pub use trust::TrustGate;
