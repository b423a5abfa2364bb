//! External Tool Executor
//!
//! ExternalToolExecutor 是编排器看到的统一入口（本地工具、子 agent 委派、外部集成一视同仁）。
//! ToolExecutor 持有 ToolRegistry 与全局超时，超时或失败时转为 AgentError（ToolTimeout / ToolExecutionFailed）；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::time::timeout;

use crate::core::AgentError;
use crate::tools::{ToolCallRequest, ToolCallResult, ToolContext, ToolDescriptor, ToolRegistry};

#[async_trait]
pub trait ExternalToolExecutor: Send + Sync {
    /// 可提供给模型的全部工具（过滤由编排器完成）
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    async fn execute(
        &self,
        request: &ToolCallRequest,
        ctx: &ToolContext,
    ) -> Result<ToolCallResult, AgentError>;
}

/// 基于注册表的执行器：对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

#[async_trait]
impl ExternalToolExecutor for ToolExecutor {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.registry.descriptors()
    }

    async fn execute(
        &self,
        request: &ToolCallRequest,
        ctx: &ToolContext,
    ) -> Result<ToolCallResult, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&request.args);
        let result = timeout(
            self.timeout,
            self.registry.execute(&request.tool, request.args.clone(), ctx),
        )
        .await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": request.tool,
            "call_id": request.call_id,
            "owner": ctx.owner,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(ToolCallResult::success(request, content)),
            Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(e)),
            Err(_) => Err(AgentError::ToolTimeout(request.tool.clone())),
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
