//! 工具确认门：为一次工具调用征求用户同意
//!
//! 状态：Idle → AwaitingDecision → Idle | SessionAutoApproved | Cancelled。
//! 会话级「全部允许」保存在 SessionApproval 中（只在内存，不落盘，新会话重置）；
//! 每一轮新建一个 ConfirmationGate，Cancelled 标记不跨轮次。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;

/// 用户对一次工具调用的决定
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationDecision {
    ApproveOnce,
    ApproveSessionWide,
    Cancel,
}

impl ConfirmationDecision {
    pub fn is_approved(self) -> bool {
        !matches!(self, ConfirmationDecision::Cancel)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    Idle,
    AwaitingDecision,
    SessionAutoApproved,
    Cancelled,
}

/// 展示给用户的待确认工具调用
#[derive(Clone, Debug)]
pub struct ToolDescription {
    pub tool: String,
    pub args_preview: String,
    /// 发起调用的 agent 身份
    pub owner: String,
}

/// 征求用户决定的外部协作者（终端、Web、测试脚本）
#[async_trait]
pub trait ConfirmationPrompter: Send + Sync {
    async fn ask(&self, description: &ToolDescription) -> ConfirmationDecision;
}

/// 会话级审批状态：每个会话一份，并发会话互不共享
#[derive(Debug, Default)]
pub struct SessionApproval {
    auto_approve: AtomicBool,
}

impl SessionApproval {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_auto_approved(&self) -> bool {
        self.auto_approve.load(Ordering::SeqCst)
    }

    pub fn grant_session_wide(&self) {
        self.auto_approve.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.auto_approve.store(false, Ordering::SeqCst);
    }
}

/// 单轮确认门
pub struct ConfirmationGate {
    state: GateState,
    session: Arc<SessionApproval>,
    prompter: Arc<dyn ConfirmationPrompter>,
    cancel_token: CancellationToken,
}

impl ConfirmationGate {
    pub fn new(
        session: Arc<SessionApproval>,
        prompter: Arc<dyn ConfirmationPrompter>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            state: GateState::Idle,
            session,
            prompter,
            cancel_token,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == GateState::Cancelled
    }

    /// 请求批准。已全部允许时不再询问并返回 ApproveOnce；Cancel 表示整轮终止。
    /// 门已 Cancelled 时直接返回 UserCancelled，不再询问。
    pub async fn request_approval(
        &mut self,
        description: &ToolDescription,
    ) -> Result<ConfirmationDecision, AgentError> {
        if self.state == GateState::Cancelled {
            return Err(AgentError::UserCancelled);
        }
        if self.session.is_auto_approved() {
            self.state = GateState::SessionAutoApproved;
            return Ok(ConfirmationDecision::ApproveOnce);
        }

        self.state = GateState::AwaitingDecision;
        let prompter = self.prompter.clone();
        let token = self.cancel_token.clone();
        let decision = tokio::select! {
            biased;
            _ = token.cancelled() => ConfirmationDecision::Cancel,
            d = prompter.ask(description) => d,
        };

        match decision {
            ConfirmationDecision::ApproveOnce => self.state = GateState::Idle,
            ConfirmationDecision::ApproveSessionWide => {
                self.session.grant_session_wide();
                self.state = GateState::SessionAutoApproved;
            }
            ConfirmationDecision::Cancel => self.state = GateState::Cancelled,
        }
        tracing::info!(tool = %description.tool, owner = %description.owner, ?decision, "confirmation");
        Ok(decision)
    }
}

/// 按脚本返回决定的 Prompter；脚本用完后返回 fallback。记录被询问次数。
pub struct ScriptedPrompter {
    decisions: Mutex<VecDeque<ConfirmationDecision>>,
    fallback: ConfirmationDecision,
    prompts: AtomicUsize,
}

impl ScriptedPrompter {
    pub fn new(decisions: Vec<ConfirmationDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            fallback: ConfirmationDecision::Cancel,
            prompts: AtomicUsize::new(0),
        }
    }

    /// 始终返回同一个决定
    pub fn always(decision: ConfirmationDecision) -> Self {
        Self {
            decisions: Mutex::new(VecDeque::new()),
            fallback: decision,
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfirmationPrompter for ScriptedPrompter {
    async fn ask(&self, _description: &ToolDescription) -> ConfirmationDecision {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(tool: &str) -> ToolDescription {
        ToolDescription {
            tool: tool.to_string(),
            args_preview: "{}".to_string(),
            owner: "main".to_string(),
        }
    }

    fn gate(
        session: &Arc<SessionApproval>,
        prompter: &Arc<ScriptedPrompter>,
    ) -> ConfirmationGate {
        ConfirmationGate::new(session.clone(), prompter.clone(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_approve_once_returns_to_idle() {
        let session = Arc::new(SessionApproval::new());
        let prompter = Arc::new(ScriptedPrompter::new(vec![
            ConfirmationDecision::ApproveOnce,
            ConfirmationDecision::ApproveOnce,
        ]));
        let mut g = gate(&session, &prompter);

        let d = g.request_approval(&desc("shell")).await.unwrap();
        assert_eq!(d, ConfirmationDecision::ApproveOnce);
        assert_eq!(g.state(), GateState::Idle);
        assert!(!session.is_auto_approved());

        g.request_approval(&desc("shell")).await.unwrap();
        assert_eq!(prompter.prompt_count(), 2);
    }

    #[tokio::test]
    async fn test_session_wide_stops_prompting() {
        let session = Arc::new(SessionApproval::new());
        let prompter = Arc::new(ScriptedPrompter::new(vec![
            ConfirmationDecision::ApproveSessionWide,
        ]));
        let mut g = gate(&session, &prompter);

        assert_eq!(
            g.request_approval(&desc("shell")).await.unwrap(),
            ConfirmationDecision::ApproveSessionWide
        );
        assert_eq!(
            g.request_approval(&desc("state_set")).await.unwrap(),
            ConfirmationDecision::ApproveOnce
        );
        assert_eq!(
            g.request_approval(&desc("echo")).await.unwrap(),
            ConfirmationDecision::ApproveOnce
        );
        assert_eq!(prompter.prompt_count(), 1);
        assert_eq!(g.state(), GateState::SessionAutoApproved);

        // 同一会话的下一轮：新门，不再询问
        let mut next_turn = gate(&session, &prompter);
        next_turn.request_approval(&desc("shell")).await.unwrap();
        assert_eq!(prompter.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_closes_gate_for_turn() {
        let session = Arc::new(SessionApproval::new());
        let prompter = Arc::new(ScriptedPrompter::always(ConfirmationDecision::Cancel));
        let mut g = gate(&session, &prompter);

        assert_eq!(
            g.request_approval(&desc("shell")).await.unwrap(),
            ConfirmationDecision::Cancel
        );
        assert!(g.is_cancelled());
        let err = g.request_approval(&desc("shell")).await.unwrap_err();
        assert_eq!(err, AgentError::UserCancelled);
        assert_eq!(prompter.prompt_count(), 1);

        // Cancelled 不跨轮次
        let next_turn = gate(&session, &prompter);
        assert_eq!(next_turn.state(), GateState::Idle);
    }

    #[tokio::test]
    async fn test_cancellation_token_resolves_to_cancel() {
        struct NeverAnswers;
        #[async_trait]
        impl ConfirmationPrompter for NeverAnswers {
            async fn ask(&self, _d: &ToolDescription) -> ConfirmationDecision {
                std::future::pending().await
            }
        }

        let token = CancellationToken::new();
        let mut g = ConfirmationGate::new(
            Arc::new(SessionApproval::new()),
            Arc::new(NeverAnswers),
            token.clone(),
        );
        token.cancel();
        let d = g.request_approval(&desc("shell")).await.unwrap();
        assert_eq!(d, ConfirmationDecision::Cancel);
        assert!(g.is_cancelled());
    }

    #[test]
    fn test_new_session_starts_without_auto_approve() {
        let a = SessionApproval::new();
        a.grant_session_wide();
        let b = SessionApproval::new();
        assert!(a.is_auto_approved());
        assert!(!b.is_auto_approved());
        a.reset();
        assert!(!a.is_auto_approved());
    }
}
