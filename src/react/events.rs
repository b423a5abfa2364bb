//! 编排过程事件：思考、工具调用、权限拒绝、观察与结束

use serde::Serialize;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    TurnStarted { agent: String, max_rounds: u32 },
    /// 第 round 次调用模型
    Thinking { round: u32 },
    ToolCall {
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },
    /// 信任门拒绝（未执行）
    PermissionDenied { tool: String },
    /// 工具返回（预览，避免过长）
    Observation { tool: String, preview: String },
    ToolFailure { tool: String, reason: String },
    /// 一个工具往返完成
    StepUpdate { round: u32, max_rounds: u32 },
    Finished { text: String },
    Cancelled,
    RecursionExhausted { rounds: u32 },
    Error { text: String },
}
