//! 递归编排主循环
//!
//! Invoke 模型 -> 工具调用逐个过「信任门 -> 确认门 -> 执行」-> 结果写回对话与共享状态 -> 再次 Invoke；
//! 直到模型给出最终回复、用户取消，或本轮工具往返次数达到 max_recursions。
//! 同一批工具调用严格按模型给出的顺序串行执行（后一个可能依赖前一个写入的共享状态）。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentSession;
use crate::agents::AgentSessionConfig;
use crate::core::{AgentError, TurnPhase};
use crate::llm::{InvocationRequest, ModelInvoker, ModelResponse};
use crate::memory::{Message, SharedStateStore};
use crate::permission::{ConfirmationGate, ConfirmationPrompter, ToolDescription, TrustGate};
use crate::react::ReactEvent;
use crate::tools::{
    ExternalToolExecutor, ToolCallRequest, ToolCallResult, ToolContext, ToolDescriptor,
    DELEGATE_TOOL_NAME,
};

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;
/// 确认提示里参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 300;

/// 由工具调用计算共享状态 key
pub type ResultKeyFn = Arc<dyn Fn(&ToolCallRequest) -> String + Send + Sync>;

/// `{prefix}:{tool}:{call_id}`
pub fn prefixed_result_key(prefix: &str) -> ResultKeyFn {
    let prefix = prefix.to_string();
    Arc::new(move |req: &ToolCallRequest| format!("{}:{}:{}", prefix, req.tool, req.call_id))
}

/// 每轮的可调项
#[derive(Clone)]
pub struct TurnOptions {
    pub result_key: ResultKeyFn,
    /// 同时写一份 `owner:key`
    pub scope_results: bool,
    /// memory_injection 时注入摘要的最大条数
    pub summary_limit: usize,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            result_key: prefixed_result_key("tool"),
            scope_results: true,
            summary_limit: 20,
        }
    }
}

/// 一轮的结局
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Finished(String),
    Cancelled,
    /// 往返次数用尽；rounds 为已完成的工具往返数
    RecursionExhausted { rounds: u32 },
}

impl TurnOutcome {
    pub fn answer(&self) -> Option<&str> {
        match self {
            TurnOutcome::Finished(text) => Some(text),
            _ => None,
        }
    }
}

enum RoundOutcome {
    Completed,
    Cancelled,
}

fn send_event(tx: &Option<UnboundedSender<ReactEvent>>, ev: ReactEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(ev);
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 递归编排器；无会话状态，可被多个会话（含子 agent）共享
pub struct Orchestrator {
    invoker: Arc<dyn ModelInvoker>,
    executor: Arc<dyn ExternalToolExecutor>,
    trust: Arc<TrustGate>,
    store: Arc<SharedStateStore>,
    prompter: Arc<dyn ConfirmationPrompter>,
    options: TurnOptions,
}

impl Orchestrator {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        executor: Arc<dyn ExternalToolExecutor>,
        trust: Arc<TrustGate>,
        store: Arc<SharedStateStore>,
        prompter: Arc<dyn ConfirmationPrompter>,
    ) -> Self {
        Self {
            invoker,
            executor,
            trust,
            store,
            prompter,
            options: TurnOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TurnOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<SharedStateStore> {
        &self.store
    }

    pub fn trust(&self) -> &Arc<TrustGate> {
        &self.trust
    }

    /// 该 agent 是否启用了此工具（delegate 另需 delegation 能力）
    fn tool_offered(config: &AgentSessionConfig, tool: &str) -> bool {
        config.tool_enabled(tool) && (tool != DELEGATE_TOOL_NAME || config.capabilities.delegation)
    }

    /// 提供给模型的工具：agent 启用且在信任白名单中
    pub fn available_tools(&self, config: &AgentSessionConfig) -> Vec<ToolDescriptor> {
        self.executor
            .descriptors()
            .into_iter()
            .filter(|d| Self::tool_offered(config, &d.name) && self.trust.is_allowed(&d.name))
            .collect()
    }

    fn build_messages(&self, session: &AgentSession, config: &AgentSessionConfig) -> Vec<Message> {
        let mut system = session.system_prompt().unwrap_or_default().to_string();
        if config.capabilities.memory_injection {
            let summary = self.store.summary(self.options.summary_limit);
            if !summary.is_empty() {
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&summary);
            }
        }
        let history = session.conversation().messages();
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system.is_empty() {
            messages.push(Message::system(system));
        }
        messages.extend(history.iter().cloned());
        messages
    }

    /// 执行一轮：从用户输入到最终回复 / 取消 / 往返用尽
    pub async fn start_turn(
        &self,
        session: &mut AgentSession,
        user_input: &str,
    ) -> Result<TurnOutcome, AgentError> {
        let result = self.run_turn(session, user_input).await;
        session.supervisor().end_turn();
        result
    }

    async fn run_turn(
        &self,
        session: &mut AgentSession,
        user_input: &str,
    ) -> Result<TurnOutcome, AgentError> {
        let token = session.begin_turn();
        let events = session.events();
        let config = session.config().clone();
        let max_rounds = config.max_recursions;

        let input = session.render_input(user_input);
        session.conversation_mut().push(Message::user(input));

        let mut gate = ConfirmationGate::new(session.approval(), self.prompter.clone(), token.clone());
        let mut rounds: u32 = 0;

        tracing::info!(agent = %config.name, owner = %session.owner(), max_rounds, "turn started");
        send_event(&events, ReactEvent::TurnStarted { agent: config.name.clone(), max_rounds });

        loop {
            if token.is_cancelled() {
                return Ok(self.finish_cancelled(session, &events));
            }

            session.set_phase(TurnPhase::Invoking);
            send_event(&events, ReactEvent::Thinking { round: rounds + 1 });
            let tools = self.available_tools(&config);
            let messages = self.build_messages(session, &config);
            let request = InvocationRequest {
                model: &config.model,
                thinking_effort: config.thinking_effort,
                messages: &messages,
                tools: &tools,
            };
            let response = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(self.finish_cancelled(session, &events)),
                r = self.invoker.invoke(request) => r,
            };

            let calls = match response {
                Err(e) => {
                    tracing::warn!(agent = %config.name, error = %e, "model invocation failed");
                    session.set_phase(TurnPhase::Error);
                    send_event(&events, ReactEvent::Error { text: e.clone() });
                    return Err(AgentError::LlmError(e));
                }
                Ok(ModelResponse::FinalAnswer(text)) => {
                    return Ok(self.finish_answer(session, &events, text));
                }
                Ok(ModelResponse::ToolCalls(calls)) if calls.is_empty() => {
                    tracing::warn!(agent = %config.name, "model returned an empty tool call list, treating as final answer");
                    return Ok(self.finish_answer(session, &events, String::new()));
                }
                Ok(ModelResponse::ToolCalls(calls)) => calls,
            };

            if rounds >= max_rounds {
                tracing::warn!(agent = %config.name, rounds, "recursion limit reached, tool calls not dispatched");
                session.set_phase(TurnPhase::RecursionExhausted);
                send_event(&events, ReactEvent::RecursionExhausted { rounds });
                return Ok(TurnOutcome::RecursionExhausted { rounds });
            }

            session.set_phase(TurnPhase::ToolRequested);
            session
                .conversation_mut()
                .push(Message::assistant_tool_calls(calls.clone()));

            match self
                .dispatch_round(session, &config, &calls, &mut gate, &token, &events)
                .await
            {
                RoundOutcome::Completed => {}
                RoundOutcome::Cancelled => return Ok(self.finish_cancelled(session, &events)),
            }

            rounds += 1;
            session.set_rounds(rounds);
            tracing::info!(agent = %config.name, round = rounds, max_rounds, "tool round completed");
            send_event(&events, ReactEvent::StepUpdate { round: rounds, max_rounds });
        }
    }

    fn finish_answer(
        &self,
        session: &mut AgentSession,
        events: &Option<UnboundedSender<ReactEvent>>,
        text: String,
    ) -> TurnOutcome {
        session.conversation_mut().push(Message::assistant(text.clone()));
        session.set_phase(TurnPhase::Finished);
        tracing::info!(agent = %session.config().name, "turn finished");
        send_event(events, ReactEvent::Finished { text: text.clone() });
        TurnOutcome::Finished(text)
    }

    fn finish_cancelled(
        &self,
        session: &mut AgentSession,
        events: &Option<UnboundedSender<ReactEvent>>,
    ) -> TurnOutcome {
        session.set_phase(TurnPhase::Cancelled);
        tracing::info!(agent = %session.config().name, "turn cancelled");
        send_event(events, ReactEvent::Cancelled);
        TurnOutcome::Cancelled
    }

    /// 按顺序处理一批工具调用；取消时为剩余调用补上 Cancelled 结果，保持对话完整
    async fn dispatch_round(
        &self,
        session: &mut AgentSession,
        config: &AgentSessionConfig,
        calls: &[ToolCallRequest],
        gate: &mut ConfirmationGate,
        token: &CancellationToken,
        events: &Option<UnboundedSender<ReactEvent>>,
    ) -> RoundOutcome {
        for (idx, call) in calls.iter().enumerate() {
            if token.is_cancelled() || gate.is_cancelled() {
                Self::cancel_remaining(session, &calls[idx..]);
                return RoundOutcome::Cancelled;
            }
            send_event(events, ReactEvent::ToolCall {
                call_id: call.call_id.clone(),
                tool: call.tool.clone(),
                args: call.args.clone(),
            });

            // 信任门在确认门之前：不在白名单的工具既不执行也不打扰用户
            if !self.trust.is_allowed(&call.tool) {
                tracing::warn!(tool = %call.tool, owner = %session.owner(), "tool denied by trust gate");
                send_event(events, ReactEvent::PermissionDenied { tool: call.tool.clone() });
                session
                    .conversation_mut()
                    .push(Message::tool_result(&ToolCallResult::permission_denied(call)));
                continue;
            }
            if !Self::tool_offered(config, &call.tool) {
                tracing::warn!(tool = %call.tool, agent = %config.name, "tool not enabled for agent");
                let result = ToolCallResult::failure(
                    call,
                    format!("Tool '{}' is not enabled for agent '{}'", call.tool, config.name),
                );
                send_event(events, ReactEvent::ToolFailure {
                    tool: call.tool.clone(),
                    reason: result.payload.clone(),
                });
                session.conversation_mut().push(Message::tool_result(&result));
                continue;
            }

            let description = ToolDescription {
                tool: call.tool.clone(),
                args_preview: truncate_chars(&call.args.to_string(), ARGS_PREVIEW_CHARS),
                owner: session.owner().to_string(),
            };
            match gate.request_approval(&description).await {
                Ok(decision) if decision.is_approved() => {}
                _ => {
                    tracing::info!(tool = %call.tool, "tool call cancelled at confirmation");
                    Self::cancel_remaining(session, &calls[idx..]);
                    return RoundOutcome::Cancelled;
                }
            }

            let ctx = ToolContext {
                owner: session.owner().to_string(),
                session_id: session.id().to_string(),
                delegation_depth: session.delegation_depth(),
                cancel_token: token.clone(),
            };
            let executed = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                r = self.executor.execute(call, &ctx) => Some(r),
            };
            let result = match executed {
                None => {
                    Self::cancel_remaining(session, &calls[idx..]);
                    return RoundOutcome::Cancelled;
                }
                Some(Ok(result)) => {
                    send_event(events, ReactEvent::Observation {
                        tool: call.tool.clone(),
                        preview: truncate_chars(&result.payload, OBSERVATION_PREVIEW_CHARS),
                    });
                    result
                }
                Some(Err(e)) => {
                    tracing::warn!(tool = %call.tool, error = %e, "tool execution failed");
                    send_event(events, ReactEvent::ToolFailure {
                        tool: call.tool.clone(),
                        reason: e.to_string(),
                    });
                    ToolCallResult::failure(call, e.to_string())
                }
            };
            self.record_result(session.owner(), call, &result);
            session.conversation_mut().push(Message::tool_result(&result));
        }
        RoundOutcome::Completed
    }

    fn cancel_remaining(session: &mut AgentSession, calls: &[ToolCallRequest]) {
        for call in calls {
            session
                .conversation_mut()
                .push(Message::tool_result(&ToolCallResult::cancelled(call)));
        }
    }

    /// 已执行调用的结果写入共享状态；写失败只记日志，不中断本轮
    fn record_result(&self, owner: &str, call: &ToolCallRequest, result: &ToolCallResult) {
        let key = (self.options.result_key)(call);
        if let Err(e) = self.store.set(&key, result.payload.as_str(), owner) {
            tracing::warn!(key = %key, error = %e, "failed to record tool result");
            return;
        }
        if self.options.scope_results {
            if let Err(e) = self.store.set_scoped(owner, &key, result.payload.as_str()) {
                tracing::warn!(key = %key, error = %e, "failed to record scoped tool result");
            }
        }
        tracing::debug!(key = %key, owner = %owner, "tool result recorded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ModelReference;
    use crate::llm::ScriptedLlmClient;
    use crate::permission::{ConfirmationDecision, InMemorySettingsStore, ScriptedPrompter};
    use crate::tools::{EchoTool, ToolExecutor, ToolRegistry};
    use serde_json::json;

    fn config(max_recursions: u32) -> AgentSessionConfig {
        AgentSessionConfig {
            name: "main".into(),
            model: ModelReference::unresolved("m"),
            tools: Vec::new(),
            capabilities: Default::default(),
            thinking_effort: Default::default(),
            template: None,
            system_prompt: Some("You are main.".into()),
            max_recursions,
        }
    }

    async fn orchestrator(
        invoker: Arc<ScriptedLlmClient>,
        allowed: &[&str],
        prompter: Arc<ScriptedPrompter>,
    ) -> Orchestrator {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        let settings = Arc::new(InMemorySettingsStore::with_allowed(allowed.iter().copied()));
        let trust = Arc::new(TrustGate::load(settings).await.unwrap());
        Orchestrator::new(
            invoker,
            Arc::new(ToolExecutor::new(registry, 5)),
            trust,
            Arc::new(SharedStateStore::new()),
            prompter,
        )
    }

    fn echo_call(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "echo", json!({"text": id}))
    }

    #[tokio::test]
    async fn test_final_answer_without_tools() {
        let invoker = Arc::new(ScriptedLlmClient::new(vec![ModelResponse::FinalAnswer("done".into())]));
        let prompter = Arc::new(ScriptedPrompter::always(ConfirmationDecision::ApproveOnce));
        let orch = orchestrator(invoker.clone(), &["echo"], prompter.clone()).await;
        let mut session = AgentSession::new(config(3));

        let outcome = orch.start_turn(&mut session, "hi").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Finished("done".into()));
        assert_eq!(session.phase(), TurnPhase::Finished);
        assert!(!session.supervisor().is_turn_active());
        assert_eq!(prompter.prompt_count(), 0);

        let seen = &invoker.invocations()[0];
        assert_eq!(seen.tools, vec!["echo"]);
        assert_eq!(seen.messages[0], Message::system("You are main."));
    }

    #[tokio::test]
    async fn test_tool_result_written_to_store() {
        let invoker = Arc::new(ScriptedLlmClient::new(vec![
            ModelResponse::ToolCalls(vec![echo_call("c1")]),
            ModelResponse::FinalAnswer("ok".into()),
        ]));
        let prompter = Arc::new(ScriptedPrompter::always(ConfirmationDecision::ApproveOnce));
        let orch = orchestrator(invoker, &["echo"], prompter).await;
        let mut session = AgentSession::new(config(3));

        orch.start_turn(&mut session, "go").await.unwrap();
        let store = orch.store();
        assert_eq!(store.get("tool:echo:c1").unwrap().render(), "c1");
        assert_eq!(store.metadata("tool:echo:c1").unwrap().created_by, "main");
        assert!(store.has("main:tool:echo:c1"));
        assert_eq!(session.rounds(), 1);
    }

    #[tokio::test]
    async fn test_untrusted_tool_hidden_and_denied() {
        let invoker = Arc::new(ScriptedLlmClient::new(vec![
            ModelResponse::ToolCalls(vec![echo_call("c1")]),
            ModelResponse::FinalAnswer("ok".into()),
        ]));
        let prompter = Arc::new(ScriptedPrompter::always(ConfirmationDecision::ApproveOnce));
        let orch = orchestrator(invoker.clone(), &[], prompter.clone()).await;
        let mut session = AgentSession::new(config(3));

        orch.start_turn(&mut session, "go").await.unwrap();
        assert_eq!(prompter.prompt_count(), 0);
        assert!(invoker.invocations()[0].tools.is_empty());
        let denied = &invoker.invocations()[1].messages;
        assert!(denied.iter().any(|m| m.content.starts_with("Permission denied")));
        assert!(orch.store().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_fills_remaining_calls() {
        let invoker = Arc::new(ScriptedLlmClient::new(vec![ModelResponse::ToolCalls(vec![
            echo_call("c1"),
            echo_call("c2"),
        ])]));
        let prompter = Arc::new(ScriptedPrompter::new(vec![ConfirmationDecision::Cancel]));
        let orch = orchestrator(invoker, &["echo"], prompter).await;
        let mut session = AgentSession::new(config(3));

        let outcome = orch.start_turn(&mut session, "go").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Cancelled);
        let tool_ids: Vec<_> = session
            .conversation()
            .messages()
            .iter()
            .filter_map(|m| m.tool_call_id.clone())
            .collect();
        assert_eq!(tool_ids, vec!["c1", "c2"]);
        assert!(orch.store().is_empty());
    }

    #[tokio::test]
    async fn test_model_error_surfaces() {
        let invoker = Arc::new(ScriptedLlmClient::failing("provider down"));
        let prompter = Arc::new(ScriptedPrompter::always(ConfirmationDecision::ApproveOnce));
        let orch = orchestrator(invoker, &["echo"], prompter).await;
        let mut session = AgentSession::new(config(3));

        let err = orch.start_turn(&mut session, "go").await.unwrap_err();
        assert_eq!(err, AgentError::LlmError("provider down".into()));
        assert_eq!(session.phase(), TurnPhase::Error);
    }

    #[test]
    fn test_prefixed_result_key() {
        let key = prefixed_result_key("res");
        assert_eq!(key(&echo_call("c9")), "res:echo:c9");
    }
}
