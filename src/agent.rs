//! Agent 运行时
//!
//! AgentSession：一个会话的身份、配置、审批状态、取消监管与对话上下文。
//! AgentRuntime：由 AppConfig 一次性构建共享状态、信任门、解析器、工具注册表与编排器，
//! 供 CLI / 交互驱动器 / 测试复用；open_session 打开会话，process_message 跑一轮。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentResolver, AgentSessionConfig, AgentStore, InMemoryAgentStore};
use crate::config::AppConfig;
use crate::core::{AgentError, SessionState, SessionSupervisor, TurnPhase};
use crate::llm::ModelInvoker;
use crate::memory::{Conversation, SharedStateStore};
use crate::permission::{
    ConfirmationPrompter, FileSettingsStore, SessionApproval, SettingsStore, TrustGate,
};
use crate::react::{prefixed_result_key, Orchestrator, ReactEvent, TurnOptions, TurnOutcome};
use crate::tools::{
    DelegateTool, EchoTool, ShellTool, StateGetTool, StateListTool, StateSetTool, ToolExecutor,
    ToolRegistry,
};

/// 解析 prompt 引用：在 dir 下找到同名文件（原名 / .md / .txt）则读取，否则把引用本身当作正文
pub fn resolve_prompt(dir: &Path, reference: &str) -> String {
    let reference = reference.trim();
    let looks_like_name = !reference.is_empty()
        && !reference.contains(char::is_whitespace)
        && !reference.contains("..");
    if looks_like_name {
        let candidates = [
            dir.join(reference),
            dir.join(format!("{reference}.md")),
            dir.join(format!("{reference}.txt")),
        ];
        if let Some(text) = candidates
            .iter()
            .find_map(|p| std::fs::read_to_string(p).ok())
        {
            return text;
        }
    }
    reference.to_string()
}

/// 单个会话
pub struct AgentSession {
    id: String,
    owner: String,
    config: AgentSessionConfig,
    system_prompt: Option<String>,
    template: Option<String>,
    approval: Arc<SessionApproval>,
    supervisor: SessionSupervisor,
    conversation: Conversation,
    delegation_depth: u32,
    max_context_turns: Option<usize>,
    phase: TurnPhase,
    rounds: u32,
    events: Option<UnboundedSender<ReactEvent>>,
}

impl AgentSession {
    /// 身份默认为 agent 名；system prompt / template 按字面使用
    pub fn new(config: AgentSessionConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: config.name.clone(),
            system_prompt: config.system_prompt.clone(),
            template: config.template.clone(),
            config,
            approval: Arc::new(SessionApproval::new()),
            supervisor: SessionSupervisor::new(),
            conversation: Conversation::new(),
            delegation_depth: 0,
            max_context_turns: None,
            phase: TurnPhase::Idle,
            rounds: 0,
            events: None,
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// 在 dir 下解析 system prompt 与 template 引用
    pub fn with_prompts_dir(mut self, dir: &Path) -> Self {
        self.load_prompts(dir);
        self
    }

    pub fn with_supervisor(mut self, supervisor: SessionSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn with_delegation_depth(mut self, depth: u32) -> Self {
        self.delegation_depth = depth;
        self
    }

    pub fn with_max_context_turns(mut self, turns: usize) -> Self {
        self.max_context_turns = (turns > 0).then_some(turns);
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn load_prompts(&mut self, dir: &Path) {
        self.system_prompt = self
            .config
            .system_prompt
            .as_deref()
            .map(|r| resolve_prompt(dir, r));
        self.template = self.config.template.as_deref().map(|r| resolve_prompt(dir, r));
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn config(&self) -> &AgentSessionConfig {
        &self.config
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn approval(&self) -> Arc<SessionApproval> {
        self.approval.clone()
    }

    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub fn delegation_depth(&self) -> u32 {
        self.delegation_depth
    }

    pub fn events(&self) -> Option<UnboundedSender<ReactEvent>> {
        self.events.clone()
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: TurnPhase) {
        self.phase = phase;
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn set_rounds(&mut self, rounds: u32) {
        self.rounds = rounds;
    }

    /// 开始新一轮：剪枝历史、重置计数，领取本轮取消令牌
    pub fn begin_turn(&mut self) -> CancellationToken {
        if let Some(max) = self.max_context_turns {
            self.conversation.prune_turns(max);
        }
        self.phase = TurnPhase::Start;
        self.rounds = 0;
        self.supervisor.begin_turn()
    }

    /// 模板含 `{input}` 时套用，否则原样返回
    pub fn render_input(&self, input: &str) -> String {
        match self.template.as_deref() {
            Some(t) if t.contains("{input}") => t.replace("{input}", input),
            _ => input.to_string(),
        }
    }

    /// 轮次之间替换配置；保留身份、审批状态与对话历史
    pub fn reconfigure(
        &mut self,
        config: AgentSessionConfig,
        prompts_dir: Option<&Path>,
    ) -> Result<(), AgentError> {
        if !self.phase.is_terminal() {
            return Err(AgentError::Validation(
                "cannot reconfigure a session while a turn is running".into(),
            ));
        }
        tracing::info!(from = %self.config.name, to = %config.name, "session reconfigured");
        self.system_prompt = config.system_prompt.clone();
        self.template = config.template.clone();
        self.config = config;
        if let Some(dir) = prompts_dir {
            self.load_prompts(dir);
        }
        Ok(())
    }

    /// 清空对话（审批状态保留）
    pub fn clear(&mut self) {
        self.conversation.clear();
        self.phase = TurnPhase::Idle;
        self.rounds = 0;
    }

    pub fn snapshot(&self) -> SessionState {
        let last_answer = match self.phase {
            TurnPhase::Finished => self
                .conversation
                .messages()
                .last()
                .map(|m| m.content.clone()),
            _ => None,
        };
        SessionState {
            agent: self.config.name.clone(),
            phase: self.phase,
            rounds: self.rounds,
            history: self.conversation.messages().to_vec(),
            last_answer,
            error_message: None,
            input_locked: !self.phase.is_terminal(),
        }
    }
}

/// 打开会话时使用的默认值（主会话与子 agent 共用）
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub prompts_dir: PathBuf,
    pub max_context_turns: usize,
}

impl SessionDefaults {
    pub fn open(&self, config: AgentSessionConfig) -> AgentSession {
        AgentSession::new(config)
            .with_prompts_dir(&self.prompts_dir)
            .with_max_context_turns(self.max_context_turns)
    }
}

/// 预构建的运行时组件，可多会话共享
pub struct AgentRuntime {
    orchestrator: Arc<Orchestrator>,
    resolver: Arc<AgentResolver>,
    defaults: SessionDefaults,
    config: AppConfig,
}

impl AgentRuntime {
    /// 从配置文件构建：agents_file 不存在时使用空的 agent 存储
    pub async fn from_config(
        config: AppConfig,
        invoker: Arc<dyn ModelInvoker>,
        prompter: Arc<dyn ConfirmationPrompter>,
    ) -> Result<Self, AgentError> {
        let agents = if config.app.agents_file.exists() {
            InMemoryAgentStore::from_toml_file(&config.app.agents_file).await?
        } else {
            tracing::warn!(path = %config.app.agents_file.display(), "agents file not found, no agents configured");
            InMemoryAgentStore::new()
        };
        let settings = FileSettingsStore::new(&config.app.settings_file);
        Self::build(config, Arc::new(agents), Arc::new(settings), invoker, prompter).await
    }

    pub async fn build(
        config: AppConfig,
        agents: Arc<dyn AgentStore>,
        settings: Arc<dyn SettingsStore>,
        invoker: Arc<dyn ModelInvoker>,
        prompter: Arc<dyn ConfirmationPrompter>,
    ) -> Result<Self, AgentError> {
        let trust = Arc::new(TrustGate::load(settings).await?);
        let store = Arc::new(SharedStateStore::new());
        let resolver = Arc::new(AgentResolver::new(agents));
        let defaults = SessionDefaults {
            prompts_dir: config.app.prompts_dir.clone(),
            max_context_turns: config.app.max_context_turns,
        };
        let options = TurnOptions {
            result_key: prefixed_result_key(&config.orchestrator.result_key_prefix),
            scope_results: config.orchestrator.scope_results,
            summary_limit: config.orchestrator.summary_limit,
        };

        let orchestrator = Arc::new_cyclic(|weak: &Weak<Orchestrator>| {
            let mut registry = ToolRegistry::new();
            registry.register(EchoTool);
            registry.register(ShellTool::new(
                &config.tools.shell.allowed_commands,
                config.tools.tool_timeout_secs,
            ));
            registry.register(StateGetTool::new(store.clone()));
            registry.register(StateSetTool::new(store.clone()));
            registry.register(StateListTool::new(store.clone()));
            registry.register(DelegateTool::new(
                weak.clone(),
                resolver.clone(),
                defaults.clone(),
                config.orchestrator.max_delegation_depth,
            ));
            let executor = ToolExecutor::new(registry, config.tools.tool_timeout_secs);
            tracing::info!(tools = ?executor.tool_names(), trusted = ?trust.allowed_names(), "runtime built");
            Orchestrator::new(invoker, Arc::new(executor), trust, store, prompter)
                .with_options(options)
        });

        Ok(Self {
            orchestrator,
            resolver,
            defaults,
            config,
        })
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn resolver(&self) -> &Arc<AgentResolver> {
        &self.resolver
    }

    pub fn store(&self) -> &Arc<SharedStateStore> {
        self.orchestrator.store()
    }

    pub fn trust(&self) -> &Arc<TrustGate> {
        self.orchestrator.trust()
    }

    pub fn defaults(&self) -> &SessionDefaults {
        &self.defaults
    }

    /// 打开会话；agent 为 None 时使用 default_agent
    pub async fn open_session(&self, agent: Option<&str>) -> Result<AgentSession, AgentError> {
        let name = agent.unwrap_or(&self.config.app.default_agent);
        let config = self.resolver.resolve(name).await?;
        let mut session = self.defaults.open(config);
        if let Some(owner) = &self.config.app.owner {
            session = session.with_owner(owner.clone());
        }
        Ok(session)
    }

    /// 在已有会话上跑一轮
    pub async fn process_message(
        &self,
        session: &mut AgentSession,
        input: &str,
    ) -> Result<TurnOutcome, AgentError> {
        self.orchestrator.start_turn(session, input).await
    }

    /// 轮次之间切换 agent
    pub async fn reconfigure(&self, session: &mut AgentSession, agent: &str) -> Result<(), AgentError> {
        let config = self.resolver.resolve(agent).await?;
        session.reconfigure(config, Some(&self.defaults.prompts_dir))
    }
}

/// 同名子 agent 的并发计数（同名并发时身份会混同，只告警）
#[derive(Debug, Default)]
pub(crate) struct ActiveAgents {
    counts: std::sync::Mutex<HashMap<String, usize>>,
}

impl ActiveAgents {
    /// 登记并返回当前同名数量（含自己）
    pub(crate) fn enter(&self, name: &str) -> usize {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        let n = counts.entry(name.to_string()).or_insert(0);
        *n += 1;
        *n
    }

    pub(crate) fn leave(&self, name: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(n) = counts.get_mut(name) {
            *n -= 1;
            if *n == 0 {
                counts.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ModelReference;

    fn config(name: &str) -> AgentSessionConfig {
        AgentSessionConfig {
            name: name.into(),
            model: ModelReference::unresolved("m"),
            tools: Vec::new(),
            capabilities: Default::default(),
            thinking_effort: Default::default(),
            template: Some("Task: {input}".into()),
            system_prompt: Some("planner".into()),
            max_recursions: 5,
        }
    }

    #[test]
    fn test_resolve_prompt_from_dir_or_literal() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("planner.md"), "You plan.").unwrap();
        assert_eq!(resolve_prompt(dir.path(), "planner"), "You plan.");
        assert_eq!(resolve_prompt(dir.path(), "Be brief."), "Be brief.");
        assert_eq!(resolve_prompt(dir.path(), "missing"), "missing");
    }

    #[test]
    fn test_session_template_and_reconfigure_keeps_approval() {
        let mut session = AgentSession::new(config("main"));
        assert_eq!(session.owner(), "main");
        assert_eq!(session.render_input("x"), "Task: x");

        session.approval().grant_session_wide();
        session.conversation_mut().push(crate::memory::Message::user("hi"));
        let mut other = config("coder");
        other.template = None;
        session.reconfigure(other, None).unwrap();

        assert_eq!(session.config().name, "coder");
        assert_eq!(session.owner(), "main");
        assert!(session.approval().is_auto_approved());
        assert_eq!(session.conversation().len(), 1);
        assert_eq!(session.render_input("x"), "x");
    }

    #[test]
    fn test_reconfigure_rejected_mid_turn() {
        let mut session = AgentSession::new(config("main"));
        session.begin_turn();
        session.set_phase(TurnPhase::Invoking);
        assert!(session.reconfigure(config("coder"), None).is_err());
    }

    #[test]
    fn test_active_agents_counting() {
        let active = ActiveAgents::default();
        assert_eq!(active.enter("coder"), 1);
        assert_eq!(active.enter("coder"), 2);
        active.leave("coder");
        active.leave("coder");
        assert_eq!(active.enter("coder"), 1);
    }
}
