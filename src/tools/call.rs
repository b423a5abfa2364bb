//! 工具调用请求与结果
//!
//! ToolCallRequest 由模型发出（call_id 由模型分配）；ToolCallResult 由执行器或编排器生成，
//! 状态为 Success / Failed / PermissionDenied / Cancelled，success 标志由状态派生。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 模型发出的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolCallRequest {
    pub fn new(call_id: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Success,
    Failed,
    PermissionDenied,
    Cancelled,
}

/// 一次工具调用的结果，回写到对话上下文供模型继续推理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub tool: String,
    pub payload: String,
    pub status: ToolCallStatus,
}

impl ToolCallResult {
    pub fn success(request: &ToolCallRequest, payload: impl Into<String>) -> Self {
        Self::with_status(request, payload, ToolCallStatus::Success)
    }

    pub fn failure(request: &ToolCallRequest, reason: impl Into<String>) -> Self {
        Self::with_status(request, reason, ToolCallStatus::Failed)
    }

    pub fn permission_denied(request: &ToolCallRequest) -> Self {
        Self::with_status(
            request,
            format!(
                "Permission denied: tool '{}' is not in the trust allow-list",
                request.tool
            ),
            ToolCallStatus::PermissionDenied,
        )
    }

    pub fn cancelled(request: &ToolCallRequest) -> Self {
        Self::with_status(
            request,
            "Cancelled by user before execution",
            ToolCallStatus::Cancelled,
        )
    }

    fn with_status(
        request: &ToolCallRequest,
        payload: impl Into<String>,
        status: ToolCallStatus,
    ) -> Self {
        Self {
            call_id: request.call_id.clone(),
            tool: request.tool.clone(),
            payload: payload.into(),
            status,
        }
    }

    pub fn success_flag(&self) -> bool {
        self.status == ToolCallStatus::Success
    }
}
