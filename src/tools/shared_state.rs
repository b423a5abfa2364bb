//! 共享状态工具：state_get / state_set / state_list
//!
//! 让模型直接读写 SharedStateStore；写入者身份取自 ToolContext.owner，而不是模型给出的参数。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::memory::{scoped_key, SharedStateStore, StateValue};
use crate::tools::{Tool, ToolContext};

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required argument '{field}'"))
}

fn wants_scope(args: &Value) -> bool {
    args.get("scoped").and_then(|v| v.as_bool()).unwrap_or(false)
}

/// 读取一个 key
pub struct StateGetTool {
    store: Arc<SharedStateStore>,
}

impl StateGetTool {
    pub fn new(store: Arc<SharedStateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for StateGetTool {
    fn name(&self) -> &str {
        "state_get"
    }

    fn description(&self) -> &str {
        "Read a value from the shared state. Args: {\"key\": \"name\", \"scoped\": false}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "scoped": { "type": "boolean", "description": "Read from your own owner-prefixed namespace" }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let key = required_str(&args, "key")?;
        let full_key = if wants_scope(&args) {
            scoped_key(&ctx.owner, key)
        } else {
            key.to_string()
        };
        self.store
            .get(&full_key)
            .map(|v| v.render())
            .ok_or_else(|| format!("No shared state entry for key '{full_key}'"))
    }
}

/// 写入一个 key
pub struct StateSetTool {
    store: Arc<SharedStateStore>,
}

impl StateSetTool {
    pub fn new(store: Arc<SharedStateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for StateSetTool {
    fn name(&self) -> &str {
        "state_set"
    }

    fn description(&self) -> &str {
        "Write a value (string or JSON) to the shared state. Args: {\"key\": \"name\", \"value\": ..., \"scoped\": false}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": { "type": "string" },
                "value": { "description": "Text or any JSON value" },
                "scoped": { "type": "boolean" }
            },
            "required": ["key", "value"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<String, String> {
        let key = required_str(&args, "key")?;
        let value = args
            .get("value")
            .cloned()
            .ok_or_else(|| "Missing required argument 'value'".to_string())?;
        let value = StateValue::from(value);
        let meta = if wants_scope(&args) {
            self.store.set_scoped(&ctx.owner, key, value)
        } else {
            self.store.set(key, value, &ctx.owner)
        }
        .map_err(|e| e.to_string())?;
        Ok(format!(
            "Stored '{}' ({}, {} bytes, version {})",
            key, meta.content_type, meta.size, meta.version
        ))
    }
}

/// 列出 key 与来源
pub struct StateListTool {
    store: Arc<SharedStateStore>,
}

impl StateListTool {
    pub fn new(store: Arc<SharedStateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for StateListTool {
    fn name(&self) -> &str {
        "state_list"
    }

    fn description(&self) -> &str {
        "List shared state keys with provenance. Args: {\"owner\": \"optional agent name\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "owner": { "type": "string", "description": "Only keys created by this agent" }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<String, String> {
        let listing = self.store.list();
        let filter = args.get("owner").and_then(|v| v.as_str());
        let rows: Vec<Value> = listing
            .iter()
            .filter(|(_, m)| filter.map_or(true, |o| m.created_by == o))
            .map(|(k, m)| {
                serde_json::json!({
                    "key": k,
                    "created_by": m.created_by,
                    "updated_by": m.updated_by,
                    "content_type": m.content_type.to_string(),
                    "size": m.size,
                })
            })
            .collect();
        serde_json::to_string(&rows).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_then_get_uses_context_owner() {
        let store = Arc::new(SharedStateStore::new());
        let ctx = ToolContext::new("researcher");
        StateSetTool::new(store.clone())
            .execute(json!({"key": "notes", "value": {"n": 1}, "owner": "spoofed"}), &ctx)
            .await
            .unwrap();
        assert_eq!(store.metadata("notes").unwrap().created_by, "researcher");

        let got = StateGetTool::new(store.clone())
            .execute(json!({"key": "notes"}), &ctx)
            .await
            .unwrap();
        assert!(got.contains("\"n\""));

        let listed = StateListTool::new(store)
            .execute(json!({"owner": "nobody"}), &ctx)
            .await
            .unwrap();
        assert_eq!(listed, "[]");
    }

    #[tokio::test]
    async fn test_scoped_round_and_missing_key() {
        let store = Arc::new(SharedStateStore::new());
        let ctx = ToolContext::new("coder");
        StateSetTool::new(store.clone())
            .execute(json!({"key": "draft", "value": "v1", "scoped": true}), &ctx)
            .await
            .unwrap();
        assert!(store.has("coder:draft"));

        let get = StateGetTool::new(store);
        assert_eq!(
            get.execute(json!({"key": "draft", "scoped": true}), &ctx).await.unwrap(),
            "v1"
        );
        assert!(get.execute(json!({"key": "draft"}), &ctx).await.is_err());
        assert!(get.execute(json!({}), &ctx).await.unwrap_err().contains("'key'"));
    }
}
