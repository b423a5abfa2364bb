//! 编排层：递归编排主循环与过程事件

pub mod events;
pub mod loop_;

pub use events::ReactEvent;
pub use loop_::{prefixed_result_key, Orchestrator, ResultKeyFn, TurnOptions, TurnOutcome};
