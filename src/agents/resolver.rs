//! Agent 会话解析器：agent 名 → AgentSessionConfig
//!
//! 找不到 agent 时返回 NotFound，绝不悄悄换成默认身份。
//! model 字段为字符串时再查一次 model 存储；查不到则返回只带名字的部分引用。

use std::sync::Arc;

use serde_json::Value;

use crate::agents::config::{AgentSessionConfig, ModelReference};
use crate::agents::record::{model_from_record, session_config_from_record, RawRecord};
use crate::agents::AgentStore;
use crate::core::AgentError;

pub struct AgentResolver {
    store: Arc<dyn AgentStore>,
}

impl AgentResolver {
    pub fn new(store: Arc<dyn AgentStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, agent_name: &str) -> Result<AgentSessionConfig, AgentError> {
        let record = self
            .store
            .agent(agent_name)
            .await?
            .ok_or_else(|| AgentError::not_found("agent", agent_name))?;
        let model = self.resolve_model(agent_name, &record).await?;
        let config = session_config_from_record(agent_name, &record, model);
        tracing::info!(
            agent = %config.name,
            model = %config.model.name,
            model_resolved = config.model.resolved,
            max_recursions = config.max_recursions,
            tools = config.tools.len(),
            "agent resolved"
        );
        Ok(config)
    }

    pub async fn agent_names(&self) -> Result<Vec<String>, AgentError> {
        self.store.agent_names().await
    }

    async fn resolve_model(
        &self,
        agent_name: &str,
        record: &RawRecord,
    ) -> Result<ModelReference, AgentError> {
        match record.get("model") {
            Some(Value::String(alias)) if !alias.trim().is_empty() => {
                let alias = alias.trim();
                match self.store.model(alias).await {
                    Ok(Some(model)) => Ok(model_from_record(alias, &model)),
                    Ok(None) => {
                        tracing::warn!(agent = %agent_name, model = %alias, "model not found, keeping name only");
                        Ok(ModelReference::unresolved(alias))
                    }
                    Err(e) => {
                        tracing::warn!(agent = %agent_name, model = %alias, error = %e, "model lookup failed, keeping name only");
                        Ok(ModelReference::unresolved(alias))
                    }
                }
            }
            Some(Value::Object(inline)) => {
                let name = inline
                    .get("name")
                    .or_else(|| inline.get("model_id"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(agent_name);
                Ok(model_from_record(name, inline))
            }
            _ => Err(AgentError::ConfigError(format!(
                "agent '{agent_name}' has no model reference"
            ))),
        }
    }
}
