//! 交互驱动器：主控循环
//!
//! 建立 cmd / state 两个通道，在后台任务中消费用户命令（Submit / Cancel / Reconfigure / Clear / Quit），
//! 驱动一轮轮编排并通过 watch 发布 SessionState。轮次进行中仍持续接收命令，Cancel 立即打断当前轮。

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::agent::{AgentRuntime, AgentSession};
use crate::core::SessionState;

/// 从前端发往驱动器的命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 提交用户输入，开始一轮
    Submit(String),
    /// 取消当前轮
    Cancel,
    /// 轮次之间切换到另一个 agent（保留对话与审批状态）
    Reconfigure(String),
    /// 清空对话
    Clear,
    Quit,
}

fn publish(state_tx: &watch::Sender<SessionState>, session: &AgentSession, error: Option<String>) {
    let mut state = session.snapshot();
    state.error_message = error;
    let _ = state_tx.send(state);
}

/// 在后台任务中驱动会话；任务结束时返回会话本身
pub fn spawn_session(
    runtime: Arc<AgentRuntime>,
    mut session: AgentSession,
) -> (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<SessionState>,
    JoinHandle<AgentSession>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(session.snapshot());

    let handle = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Submit(input) => {
                    let supervisor = session.supervisor().clone();
                    let mut locked = session.snapshot();
                    locked.input_locked = true;
                    let _ = state_tx.send(locked);

                    let mut quit = false;
                    let mut closed = false;
                    let result = {
                        let turn = runtime.process_message(&mut session, &input);
                        tokio::pin!(turn);
                        loop {
                            // 先推进本轮，保证 Cancel 作用在本轮令牌上
                            tokio::select! {
                                biased;
                                res = &mut turn => break res,
                                cmd = cmd_rx.recv(), if !closed => match cmd {
                                    Some(Command::Cancel) => supervisor.cancel_turn(),
                                    Some(Command::Quit) => {
                                        quit = true;
                                        supervisor.cancel_turn();
                                    }
                                    None => {
                                        closed = true;
                                        supervisor.cancel_turn();
                                    }
                                    Some(other) => {
                                        tracing::warn!(command = ?other, "turn in progress, command ignored");
                                    }
                                },
                            }
                        }
                    };
                    publish(&state_tx, &session, result.err().map(|e| e.to_string()));
                    if quit || closed {
                        break;
                    }
                }
                Command::Cancel => {
                    tracing::debug!("cancel with no turn in progress");
                }
                Command::Reconfigure(agent) => {
                    let error = runtime
                        .reconfigure(&mut session, &agent)
                        .await
                        .err()
                        .map(|e| e.to_string());
                    publish(&state_tx, &session, error);
                }
                Command::Clear => {
                    session.clear();
                    publish(&state_tx, &session, None);
                }
                Command::Quit => break,
            }
        }
        session.supervisor().cancel();
        session
    });

    (cmd_tx, state_rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::agents::InMemoryAgentStore;
    use crate::config::AppConfig;
    use crate::core::TurnPhase;
    use crate::llm::{ModelResponse, ScriptedLlmClient};
    use crate::permission::{
        ConfirmationDecision, ConfirmationPrompter, InMemorySettingsStore, ToolDescription,
    };
    use crate::tools::ToolCallRequest;

    /// 永远不回答的 Prompter（等待 Cancel）
    struct PendingPrompter;

    #[async_trait]
    impl ConfirmationPrompter for PendingPrompter {
        async fn ask(&self, _description: &ToolDescription) -> ConfirmationDecision {
            std::future::pending().await
        }
    }

    async fn runtime(
        responses: Vec<ModelResponse>,
        prompter: Arc<dyn ConfirmationPrompter>,
    ) -> Arc<AgentRuntime> {
        let agents = InMemoryAgentStore::new()
            .with_agent("default", json!({"model": "m", "max_recursions": 3}))
            .with_agent("coder", json!({"model": "m"}));
        let settings = InMemorySettingsStore::with_allowed(["echo"]);
        Arc::new(
            AgentRuntime::build(
                AppConfig::default(),
                Arc::new(agents),
                Arc::new(settings),
                Arc::new(ScriptedLlmClient::new(responses)),
                prompter,
            )
            .await
            .unwrap(),
        )
    }

    async fn wait_for(rx: &mut watch::Receiver<SessionState>, phase: TurnPhase) -> SessionState {
        loop {
            {
                let state = rx.borrow_and_update();
                if state.phase == phase && !state.input_locked {
                    return state.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_submit_reconfigure_clear() {
        let rt = runtime(
            vec![ModelResponse::FinalAnswer("hello back".into())],
            Arc::new(PendingPrompter),
        )
        .await;
        let session = rt.open_session(None).await.unwrap();
        let (tx, mut rx, handle) = spawn_session(rt, session);

        tx.send(Command::Submit("hello".into())).unwrap();
        let state = wait_for(&mut rx, TurnPhase::Finished).await;
        assert_eq!(state.last_answer.as_deref(), Some("hello back"));
        assert_eq!(state.history.len(), 2);

        tx.send(Command::Reconfigure("coder".into())).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().agent, "coder");

        tx.send(Command::Reconfigure("ghost".into())).unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().error_message.as_deref().unwrap().contains("ghost"));

        tx.send(Command::Clear).unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().history.is_empty());

        tx.send(Command::Quit).unwrap();
        let session = handle.await.unwrap();
        assert!(session.supervisor().is_closed());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_confirmation() {
        let rt = runtime(
            vec![ModelResponse::ToolCalls(vec![ToolCallRequest::new(
                "c1",
                "echo",
                json!({"text": "x"}),
            )])],
            Arc::new(PendingPrompter),
        )
        .await;
        let session = rt.open_session(None).await.unwrap();
        let (tx, mut rx, handle) = spawn_session(rt.clone(), session);

        tx.send(Command::Submit("go".into())).unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().input_locked);

        tx.send(Command::Cancel).unwrap();
        let state = wait_for(&mut rx, TurnPhase::Cancelled).await;
        assert!(state.error_message.is_none());
        assert!(rt.store().is_empty());

        drop(tx);
        let session = handle.await.unwrap();
        assert_eq!(session.phase(), TurnPhase::Cancelled);
    }
}
