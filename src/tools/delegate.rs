//! delegate 工具：把子任务交给另一个 agent
//!
//! 子 agent 以自己的名字为身份，在独立会话中跑一轮，共享同一个 SharedStateStore、信任门与确认 Prompter。
//! 子会话的取消令牌挂在父轮令牌下；委派深度超过上限时拒绝。
//! 编排器持有注册表，注册表又持有本工具，因此这里只保留 Weak 引用。

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::{ActiveAgents, SessionDefaults};
use crate::agents::AgentResolver;
use crate::core::SessionSupervisor;
use crate::react::{Orchestrator, TurnOutcome};
use crate::tools::{Tool, ToolContext};

pub const DELEGATE_TOOL_NAME: &str = "delegate";

pub struct DelegateTool {
    orchestrator: Weak<Orchestrator>,
    resolver: Arc<AgentResolver>,
    defaults: SessionDefaults,
    max_depth: u32,
    active: ActiveAgents,
}

impl DelegateTool {
    pub fn new(
        orchestrator: Weak<Orchestrator>,
        resolver: Arc<AgentResolver>,
        defaults: SessionDefaults,
        max_depth: u32,
    ) -> Self {
        Self {
            orchestrator,
            resolver,
            defaults,
            max_depth,
            active: ActiveAgents::default(),
        }
    }
}

struct ActiveGuard<'a> {
    active: &'a ActiveAgents,
    name: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.leave(&self.name);
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        DELEGATE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Delegate a task to another agent and return its final answer. Args: {\"agent\": \"name\", \"task\": \"what to do\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent": { "type": "string", "description": "Configured agent name" },
                "task": { "type": "string", "description": "Instruction for the sub-agent" }
            },
            "required": ["agent", "task"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let agent = args
            .get("agent")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Missing required argument 'agent'".to_string())?;
        let task = args
            .get("task")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Missing required argument 'task'".to_string())?;

        if ctx.delegation_depth >= self.max_depth {
            return Err(format!(
                "Delegation depth limit ({}) reached; '{}' cannot delegate further",
                self.max_depth, ctx.owner
            ));
        }
        let orchestrator = self
            .orchestrator
            .upgrade()
            .ok_or_else(|| "Orchestrator is shutting down".to_string())?;
        let config = self.resolver.resolve(agent).await.map_err(|e| e.to_string())?;

        let concurrent = self.active.enter(agent);
        let _guard = ActiveGuard {
            active: &self.active,
            name: agent.to_string(),
        };
        if concurrent > 1 {
            tracing::warn!(agent = %agent, concurrent, "same-named sub-agents running concurrently share one owner identity");
        }

        let depth = ctx.delegation_depth + 1;
        let mut session = self
            .defaults
            .open(config)
            .with_supervisor(SessionSupervisor::with_parent(&ctx.cancel_token))
            .with_delegation_depth(depth);
        tracing::info!(parent = %ctx.owner, agent = %agent, depth, "delegating");

        match orchestrator
            .start_turn(&mut session, task)
            .await
            .map_err(|e| e.to_string())?
        {
            TurnOutcome::Finished(answer) => Ok(answer),
            TurnOutcome::Cancelled => Err(format!("Sub-agent '{agent}' was cancelled")),
            TurnOutcome::RecursionExhausted { rounds } => Err(format!(
                "Sub-agent '{agent}' stopped after {rounds} tool rounds without an answer"
            )),
        }
    }
}
