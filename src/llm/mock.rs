//! Mock Model Invoker（无需 API）
//!
//! MockLlmClient：第一次调用回显为 echo 工具调用，看到工具结果后给出最终回复，便于本地跑通流程。
//! ScriptedLlmClient：按脚本返回，并记录每次调用看到的工具与消息（测试用）。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{InvocationRequest, ModelInvoker, ModelResponse};
use crate::memory::{Message, Role};
use crate::tools::ToolCallRequest;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl ModelInvoker for MockLlmClient {
    async fn invoke(&self, request: InvocationRequest<'_>) -> Result<ModelResponse, String> {
        if let Some(last) = request.messages.last() {
            if last.role == Role::Tool {
                return Ok(ModelResponse::FinalAnswer(format!(
                    "Echo from Mock: {}",
                    last.content
                )));
            }
        }
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if request.tools.iter().any(|t| t.name == "echo") {
            Ok(ModelResponse::ToolCalls(vec![ToolCallRequest::new(
                format!("call_{}", uuid::Uuid::new_v4().simple()),
                "echo",
                serde_json::json!({ "text": last_user }),
            )]))
        } else {
            Ok(ModelResponse::FinalAnswer(format!("Echo from Mock: {}", last_user)))
        }
    }
}

/// 一次被记录的调用
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub model: String,
    pub tools: Vec<String>,
    pub messages: Vec<Message>,
}

/// 脚本客户端：依次返回预设回复，用完后返回 fallback
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<ModelResponse, String>>>,
    fallback: Result<ModelResponse, String>,
    invocations: Mutex<Vec<RecordedInvocation>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: Err("script exhausted".to_string()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一个回复（如：始终再次请求同一工具）
    pub fn repeating(response: ModelResponse) -> Self {
        Self::new(Vec::new()).with_fallback(Ok(response))
    }

    /// 每次都失败
    pub fn failing(error: impl Into<String>) -> Self {
        Self::new(Vec::new()).with_fallback(Err(error.into()))
    }

    pub fn with_fallback(mut self, fallback: Result<ModelResponse, String>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedLlmClient {
    async fn invoke(&self, request: InvocationRequest<'_>) -> Result<ModelResponse, String> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedInvocation {
                model: request.model.name.clone(),
                tools: request.tools.iter().map(|t| t.name.clone()).collect(),
                messages: request.messages.to_vec(),
            });
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
