//! 会话监管：取消令牌
//!
//! 根令牌代表整个会话（关闭时取消）；每轮 start_turn 领取一个子令牌，Cancel 只打断当前这一轮，
//! 之后的轮次重新领取未取消的令牌。子 agent 的会话以父轮令牌为父，父轮取消会级联到子 agent。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct SessionSupervisor {
    root: CancellationToken,
    turn: Arc<Mutex<CancellationToken>>,
    turn_active: Arc<AtomicBool>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::from_root(CancellationToken::new())
    }

    /// 以外部令牌为父（委派的子会话）
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self::from_root(parent.child_token())
    }

    fn from_root(root: CancellationToken) -> Self {
        let turn = root.child_token();
        Self {
            root,
            turn: Arc::new(Mutex::new(turn)),
            turn_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 开始新一轮：替换并返回本轮令牌
    pub fn begin_turn(&self) -> CancellationToken {
        let token = self.root.child_token();
        *self.turn.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        self.turn_active.store(true, Ordering::SeqCst);
        token
    }

    /// 本轮结束（无论结果如何）
    pub fn end_turn(&self) {
        self.turn_active.store(false, Ordering::SeqCst);
    }

    pub fn is_turn_active(&self) -> bool {
        self.turn_active.load(Ordering::SeqCst)
    }

    /// Ctrl+C：有轮次在跑则只取消本轮并返回 true；空闲时关闭整个会话并返回 false
    pub fn interrupt(&self) -> bool {
        if self.is_turn_active() {
            self.cancel_turn();
            true
        } else {
            self.cancel();
            false
        }
    }

    /// 取消当前轮（用户 Cancel / Ctrl+C）
    pub fn cancel_turn(&self) {
        self.turn.lock().unwrap_or_else(|e| e.into_inner()).cancel();
    }

    /// 关闭整个会话；之后领取的令牌都已取消
    pub fn cancel(&self) {
        self.root.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.root.is_cancelled()
    }

    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_turn_only_affects_current_turn() {
        let sup = SessionSupervisor::new();
        let first = sup.begin_turn();
        sup.cancel_turn();
        assert!(first.is_cancelled());

        let second = sup.begin_turn();
        assert!(!second.is_cancelled());
        assert!(!sup.is_closed());
    }

    #[test]
    fn test_close_and_parent_cascade() {
        let parent = CancellationToken::new();
        let child = SessionSupervisor::with_parent(&parent);
        let turn = child.begin_turn();
        parent.cancel();
        assert!(turn.is_cancelled());
        assert!(child.is_closed());
        assert!(child.begin_turn().is_cancelled());
    }

    #[test]
    fn test_interrupt_cancels_turn_then_closes_when_idle() {
        let sup = SessionSupervisor::new();
        let turn = sup.begin_turn();
        assert!(sup.is_turn_active());
        assert!(sup.interrupt());
        assert!(turn.is_cancelled());
        assert!(!sup.is_closed());

        sup.end_turn();
        assert!(!sup.interrupt());
        assert!(sup.is_closed());
    }

    #[test]
    fn test_clones_share_current_turn() {
        let sup = SessionSupervisor::new();
        let handle = sup.clone();
        let turn = sup.begin_turn();
        handle.cancel_turn();
        assert!(turn.is_cancelled());
    }
}
