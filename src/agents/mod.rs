//! Agent 配置层：强类型会话配置、原始记录转换、agent/model 存储、解析器

pub mod config;
pub mod record;
pub mod resolver;
pub mod store;

pub use config::{
    AgentSessionConfig, CapabilityFlags, ModelReference, SamplingParams, ThinkingEffort,
    DEFAULT_MAX_RECURSIONS,
};
pub use record::RawRecord;
pub use resolver::AgentResolver;
pub use store::{AgentStore, InMemoryAgentStore};
