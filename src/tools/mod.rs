//! 工具层：调用请求/结果、注册表、执行器与内置工具

pub mod call;
pub mod delegate;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod shared_state;
pub mod shell;

pub use call::{ToolCallRequest, ToolCallResult, ToolCallStatus};
pub use delegate::{DelegateTool, DELEGATE_TOOL_NAME};
pub use echo::EchoTool;
pub use executor::{ExternalToolExecutor, ToolExecutor};
pub use registry::{Tool, ToolContext, ToolDescriptor, ToolRegistry};
pub use shared_state::{StateGetTool, StateListTool, StateSetTool};
pub use shell::ShellTool;
