//! Hive - 多 agent 编排核心
//!
//! 模块划分：
//! - **agent**: 会话对象与运行时构建（open_session / process_message）
//! - **agents**: Agent 会话解析（agent 名 → 强类型会话配置）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、状态投影、会话监管、交互驱动器
//! - **llm**: Model Invoker 抽象与 Mock 实现
//! - **memory**: 对话上下文与跨 agent 共享状态
//! - **permission**: 工具确认门与信任白名单
//! - **react**: 递归编排主循环
//! - **tools**: 工具注册表、执行器与内置工具

pub mod agent;
pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod permission;
pub mod react;
pub mod tools;

pub use agent::{AgentRuntime, AgentSession};
pub use core::AgentError;
pub use react::{Orchestrator, TurnOutcome};
