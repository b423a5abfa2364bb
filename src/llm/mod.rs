//! LLM 层：Model Invoker 抽象与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::{MockLlmClient, RecordedInvocation, ScriptedLlmClient};
pub use traits::{InvocationRequest, ModelInvoker, ModelResponse};
