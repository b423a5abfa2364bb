//! Model Invoker 抽象
//!
//! 编排器把累积的对话上下文与可用工具描述交给 ModelInvoker，得到最终回复或一组工具调用。
//! 提供方的线路格式不在本 crate 范围内，由具体实现负责；超时也由实现负责。

use async_trait::async_trait;

use crate::agents::{ModelReference, ThinkingEffort};
use crate::memory::Message;
use crate::tools::{ToolCallRequest, ToolDescriptor};

/// 一次调用的输入
#[derive(Debug, Clone, Copy)]
pub struct InvocationRequest<'a> {
    pub model: &'a ModelReference,
    pub thinking_effort: ThinkingEffort,
    pub messages: &'a [Message],
    /// 已按 agent 配置与信任门过滤
    pub tools: &'a [ToolDescriptor],
}

/// 模型回复：最终答案，或按顺序排列的工具调用
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    FinalAnswer(String),
    ToolCalls(Vec<ToolCallRequest>),
}

#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, request: InvocationRequest<'_>) -> Result<ModelResponse, String>;
}
