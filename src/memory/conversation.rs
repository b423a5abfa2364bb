//! 对话上下文
//!
//! 一个会话的消息序列：user / assistant / system / tool。assistant 消息可携带工具调用，
//! tool 消息携带对应的 call_id。跨轮次保留，在新一轮开始时可按轮数剪枝。

use serde::{Deserialize, Serialize};

use crate::tools::{ToolCallRequest, ToolCallResult};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 仅 assistant：本轮发出的工具调用
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// 仅 tool：对应的调用 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(result: &ToolCallResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.payload.clone(),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.call_id.clone()),
        }
    }
}

/// 对话历史；超出 max_turns 时在轮次边界（user 消息）处剪掉最旧的部分
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 只保留最近 max_turns 个轮次（以 user 消息为轮次起点），不拆散工具调用与结果
    pub fn prune_turns(&mut self, max_turns: usize) {
        let starts: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.role == Role::User)
            .map(|(i, _)| i)
            .collect();
        if max_turns == 0 || starts.len() <= max_turns {
            return;
        }
        let cut = starts[starts.len() - max_turns];
        self.messages.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prune_keeps_tool_exchange_intact() {
        let mut conv = Conversation::new();
        for i in 0..3 {
            conv.push(Message::user(format!("q{i}")));
            let call = ToolCallRequest::new(format!("c{i}"), "echo", json!({"text": "x"}));
            conv.push(Message::assistant_tool_calls(vec![call.clone()]));
            conv.push(Message::tool_result(&ToolCallResult::success(&call, "x")));
            conv.push(Message::assistant(format!("a{i}")));
        }
        conv.prune_turns(2);
        assert_eq!(conv.len(), 8);
        assert_eq!(conv.messages()[0].content, "q1");
        assert_eq!(conv.messages()[2].tool_call_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_prune_noop_when_short() {
        let mut conv = Conversation::new();
        conv.push(Message::user("only"));
        conv.prune_turns(5);
        assert_eq!(conv.len(), 1);
    }
}
