//! 记忆层：会话内对话上下文、跨 agent 共享状态

pub mod conversation;
pub mod shared_state;

pub use conversation::{Conversation, Message, Role};
pub use shared_state::{
    scoped_key, ContentType, SharedStateStore, StateEntry, StateMetadata, StateValue,
};
