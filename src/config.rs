//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__APP__DEFAULT_AGENT=coder`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub orchestrator: OrchestratorSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 未指定 agent 时使用
    pub default_agent: String,
    /// agent 与模型记录（[agents.*] / [models.*]）
    pub agents_file: PathBuf,
    /// 信任白名单所在的设置文件（[trust]）
    pub settings_file: PathBuf,
    /// system prompt / template 引用的查找目录
    pub prompts_dir: PathBuf,
    /// 主 agent 的身份；未设置时用 agent 名
    pub owner: Option<String>,
    /// 对话历史保留轮数
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            default_agent: "default".to_string(),
            agents_file: PathBuf::from("config/agents.toml"),
            settings_file: PathBuf::from("config/settings.toml"),
            prompts_dir: PathBuf::from("config/prompts"),
            owner: None,
            max_context_turns: 20,
        }
    }
}

/// [orchestrator] 段：结果写入共享状态的方式、委派深度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 工具结果 key：`{prefix}:{tool}:{call_id}`
    pub result_key_prefix: String,
    /// 是否再写一份 `owner:key`
    pub scope_results: bool,
    pub max_delegation_depth: u32,
    /// memory_injection 时摘要的最大条数
    pub summary_limit: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            result_key_prefix: "tool".to_string(),
            scope_results: true,
            max_delegation_depth: 3,
            summary_limit: 20,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub shell: ShellSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            shell: ShellSection::default(),
        }
    }
}

/// [tools.shell] 段：允许执行的命令名（仅首词）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allowed_commands: Vec<String>,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allowed_commands: ["ls", "cat", "head", "tail", "wc", "grep", "find", "echo"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
