//! Agent 错误类型
//!
//! 与编排循环配合：Validation / NotFound 为本地错误，信任门拒绝直接折叠成工具结果（不经过本类型），
//! UserCancelled 只终止当前轮次，LlmError 终止轮次并以 Error 返回。

use thiserror::Error;

/// 编排过程中可能出现的错误（校验、查找、权限、取消、外部执行、配置）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    /// 本地立即失败，如共享状态 key 为空
    #[error("Validation error: {0}")]
    Validation(String),

    /// 未知的 agent / model / key；调用方决定回退，绝不自动替换
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Cancelled by user")]
    UserCancelled,

    /// Model Invoker 失败，终止本轮
    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    /// 持久化设置（信任白名单）或 agent 存储读写失败
    #[error("Store error: {0}")]
    StoreError(String),
}

impl AgentError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = AgentError::not_found("agent", "planner");
        assert_eq!(err.to_string(), "agent not found: planner");
    }

    #[test]
    fn test_store_error_message() {
        let err = AgentError::StoreError("disk full".into());
        assert_eq!(err.to_string(), "Store error: disk full");
    }
}
