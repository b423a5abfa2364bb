//! 会话配置类型：AgentSessionConfig / ModelReference
//!
//! 固定形状的强类型配置；所有未定型的值只在 record 模块中转换一次，不会越过这里。

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_RECURSIONS: u32 = 10;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TOP_P: f64 = 1.0;

/// 采样参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub top_p: f64,
    pub seed: Option<i64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            seed: None,
        }
    }
}

/// 模型引用：按名查找，或内联在 agent 记录里。
/// resolved = false 表示二次查找失败，只保留了名字，用于报告「本来想用哪个模型」。
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReference {
    pub name: String,
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub credential: Option<String>,
    pub model_id: Option<String>,
    pub sampling: SamplingParams,
    pub resolved: bool,
}

impl ModelReference {
    /// 只有名字的部分引用
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: None,
            endpoint: None,
            credential: None,
            model_id: None,
            sampling: SamplingParams::default(),
            resolved: false,
        }
    }

    /// 发给提供方的模型标识；未配置 model_id 时退回名字
    pub fn effective_model_id(&self) -> &str {
        self.model_id.as_deref().unwrap_or(&self.name)
    }
}

// 凭据不进日志
impl fmt::Debug for ModelReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelReference")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("model_id", &self.model_id)
            .field("sampling", &self.sampling)
            .field("resolved", &self.resolved)
            .finish()
    }
}

/// 能力开关
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFlags {
    /// 可委派子 agent（提供 delegate 工具）
    pub delegation: bool,
    /// 调用模型前注入共享状态摘要
    pub memory_injection: bool,
    /// 前端以 Markdown 渲染回复（核心只透传）
    pub markdown: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingEffort {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl ThinkingEffort {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "" => Some(Self::Off),
            "low" => Some(Self::Low),
            "medium" | "mid" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// 一个会话的完整配置；会话期间不可变，只能在轮次之间显式重配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentSessionConfig {
    pub name: String,
    pub model: ModelReference,
    /// 有序、去重；为空表示可使用全部已注册工具
    pub tools: Vec<String>,
    pub capabilities: CapabilityFlags,
    pub thinking_effort: ThinkingEffort,
    pub template: Option<String>,
    pub system_prompt: Option<String>,
    pub max_recursions: u32,
}

impl AgentSessionConfig {
    pub fn tool_enabled(&self, tool: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == tool)
    }
}
