//! 会话状态：轮次阶段与对外投影
//!
//! 交互驱动器通过 watch 通道发布 SessionState，前端只渲染这份轻量快照。

use serde::Serialize;

use crate::memory::Message;

/// 一轮编排所处的阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    /// 没有进行中的轮次
    #[default]
    Idle,
    Start,
    Invoking,
    ToolRequested,
    Finished,
    Cancelled,
    RecursionExhausted,
    Error,
}

impl TurnPhase {
    /// 已到达终止阶段（下一轮可以开始）
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnPhase::Idle
                | TurnPhase::Finished
                | TurnPhase::Cancelled
                | TurnPhase::RecursionExhausted
                | TurnPhase::Error
        )
    }
}

/// 会话投影快照
#[derive(Clone, Debug, Default, Serialize)]
pub struct SessionState {
    pub agent: String,
    pub phase: TurnPhase,
    pub rounds: u32,
    pub history: Vec<Message>,
    pub last_answer: Option<String>,
    pub error_message: Option<String>,
    pub input_locked: bool,
}
