//! 持久化 agent / model 存储（从核心视角只读）
//!
//! 记录以未定型的 JSON 对象形式返回，由 resolver 统一转换。
//! TOML 文件格式：`[agents.<name>]` 与 `[models.<name>]` 两组表。

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::agents::record::RawRecord;
use crate::core::AgentError;

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn agent(&self, name: &str) -> Result<Option<RawRecord>, AgentError>;

    async fn model(&self, name: &str) -> Result<Option<RawRecord>, AgentError>;

    async fn agent_names(&self) -> Result<Vec<String>, AgentError>;
}

/// 内存实现：启动时从文件加载一次，或在测试中直接构建
#[derive(Debug, Default, Clone)]
pub struct InMemoryAgentStore {
    agents: HashMap<String, RawRecord>,
    models: HashMap<String, RawRecord>,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入 agent 记录；非对象值被忽略
    pub fn with_agent(mut self, name: impl Into<String>, record: Value) -> Self {
        if let Value::Object(map) = record {
            self.agents.insert(name.into(), map);
        }
        self
    }

    pub fn with_model(mut self, name: impl Into<String>, record: Value) -> Self {
        if let Value::Object(map) = record {
            self.models.insert(name.into(), map);
        }
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, AgentError> {
        let table: toml::Table =
            toml::from_str(text).map_err(|e| AgentError::StoreError(e.to_string()))?;
        Ok(Self {
            agents: section(&table, "agents")?,
            models: section(&table, "models")?,
        })
    }

    pub async fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::StoreError(format!("{}: {}", path.display(), e)))?;
        let store = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            agents = store.agents.len(),
            models = store.models.len(),
            "agent store loaded"
        );
        Ok(store)
    }
}

/// 将 `[agents]` / `[models]` 表转成未定型 JSON 记录
fn section(table: &toml::Table, key: &str) -> Result<HashMap<String, RawRecord>, AgentError> {
    let mut out = HashMap::new();
    let Some(toml::Value::Table(entries)) = table.get(key) else {
        return Ok(out);
    };
    for (name, value) in entries {
        let json =
            serde_json::to_value(value).map_err(|e| AgentError::StoreError(e.to_string()))?;
        match json {
            Value::Object(map) => {
                out.insert(name.clone(), map);
            }
            _ => tracing::warn!(section = %key, name = %name, "skipping non-table record"),
        }
    }
    Ok(out)
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn agent(&self, name: &str) -> Result<Option<RawRecord>, AgentError> {
        Ok(self.agents.get(name).cloned())
    }

    async fn model(&self, name: &str) -> Result<Option<RawRecord>, AgentError> {
        Ok(self.models.get(name).cloned())
    }

    async fn agent_names(&self) -> Result<Vec<String>, AgentError> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[agents.default]
model = "fast"
tools = ["echo", "state_get"]
max_recursions = 5

[agents.researcher]
model = { provider = "openai", model_id = "gpt-4o", temperature = 0.3 }

[models.fast]
provider = "deepseek"
model_id = "deepseek-chat"
temperature = 1
"#;

    #[tokio::test]
    async fn test_from_toml_str() {
        let store = InMemoryAgentStore::from_toml_str(SAMPLE).unwrap();
        assert_eq!(
            store.agent_names().await.unwrap(),
            vec!["default".to_string(), "researcher".to_string()]
        );
        let agent = store.agent("default").await.unwrap().unwrap();
        assert_eq!(agent["max_recursions"], serde_json::json!(5));
        let model = store.model("fast").await.unwrap().unwrap();
        assert_eq!(model["model_id"], serde_json::json!("deepseek-chat"));
        assert!(store.agent("missing").await.unwrap().is_none());
    }

    #[test]
    fn test_invalid_toml_is_store_error() {
        let err = InMemoryAgentStore::from_toml_str("[agents.x\nmodel=").unwrap_err();
        assert!(matches!(err, AgentError::StoreError(_)));
    }
}
