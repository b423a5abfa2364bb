//! 共享状态存储：带来源元数据的并发安全键值内存
//!
//! 主 agent、工具与子 agent 通过同一个 SharedStateStore 交换中间产物。
//! 整个存储由一把读写锁保护：读可并发，写与读互斥；一次写入原子替换 value + metadata。
//! 锁只在内存读写期间持有，内容类型/大小推断在加锁前完成。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::AgentError;

/// 内容类型（每次写入重新计算）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Structured,
    FileReference,
    Binary,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentType::Text => "text",
            ContentType::Structured => "structured",
            ContentType::FileReference => "file-reference",
            ContentType::Binary => "binary",
        };
        f.write_str(s)
    }
}

/// 存储的值：文本、结构化数据、文件引用或二进制
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StateValue {
    Text(String),
    Structured(Value),
    FileRef(PathBuf),
    Binary(Vec<u8>),
}

impl StateValue {
    /// 推断内容类型：形如 JSON 对象/数组且能解析的字符串视为 structured
    pub fn content_type(&self) -> ContentType {
        match self {
            StateValue::Text(s) if looks_structured(s) => ContentType::Structured,
            StateValue::Text(_) => ContentType::Text,
            StateValue::Structured(_) => ContentType::Structured,
            StateValue::FileRef(_) => ContentType::FileReference,
            StateValue::Binary(_) => ContentType::Binary,
        }
    }

    /// 近似字节大小；结构化值序列化失败时记为 0
    pub fn approximate_size(&self) -> usize {
        match self {
            StateValue::Text(s) => s.len(),
            StateValue::Structured(v) => serde_json::to_vec(v).map(|b| b.len()).unwrap_or(0),
            StateValue::FileRef(p) => p.as_os_str().len(),
            StateValue::Binary(b) => b.len(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StateValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 渲染为可放入对话上下文的字符串（二进制只给出长度）
    pub fn render(&self) -> String {
        match self {
            StateValue::Text(s) => s.clone(),
            StateValue::Structured(v) => v.to_string(),
            StateValue::FileRef(p) => format!("file://{}", p.display()),
            StateValue::Binary(b) => format!("<{} bytes of binary data>", b.len()),
        }
    }
}

fn looks_structured(s: &str) -> bool {
    let t = s.trim_start();
    (t.starts_with('{') || t.starts_with('[')) && serde_json::from_str::<Value>(t).is_ok()
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::Text(s)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::Text(s.to_string())
    }
}

impl From<Value> for StateValue {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => StateValue::Text(s),
            other => StateValue::Structured(other),
        }
    }
}

impl From<Vec<u8>> for StateValue {
    fn from(b: Vec<u8>) -> Self {
        StateValue::Binary(b)
    }
}

impl From<PathBuf> for StateValue {
    fn from(p: PathBuf) -> Self {
        StateValue::FileRef(p)
    }
}

/// 来源元数据：created_by / created_at 首次写入后固定，其余字段每次写入刷新
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
    pub content_type: ContentType,
    pub size: usize,
    /// 每次写入 +1，从 1 开始
    pub version: u64,
}

/// 单条记录（value + metadata 的拷贝）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub value: StateValue,
    pub metadata: StateMetadata,
}

/// 组合带 owner 前缀的 key：`owner:key`
pub fn scoped_key(owner: &str, key: &str) -> String {
    format!("{owner}:{key}")
}

/// 共享状态存储；多个会话通过 Arc 共享同一个实例
#[derive(Debug, Default)]
pub struct SharedStateStore {
    entries: RwLock<HashMap<String, StateEntry>>,
}

impl SharedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入；key 为空时返回 Validation。已存在的 key 保留 created_by / created_at。
    pub fn set(
        &self,
        key: &str,
        value: impl Into<StateValue>,
        owner: &str,
    ) -> Result<StateMetadata, AgentError> {
        if key.is_empty() {
            return Err(AgentError::Validation("shared state key must not be empty".into()));
        }
        let value = value.into();
        let content_type = value.content_type();
        let size = value.approximate_size();
        let now = Utc::now();

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let metadata = match entries.get(key) {
            Some(prev) => {
                let prev = &prev.metadata;
                // 时钟精度不足时也要保证 updated_at 严格递增
                let updated_at = if now > prev.updated_at {
                    now
                } else {
                    prev.updated_at + Duration::microseconds(1)
                };
                StateMetadata {
                    created_by: prev.created_by.clone(),
                    created_at: prev.created_at,
                    updated_by: owner.to_string(),
                    updated_at,
                    content_type,
                    size,
                    version: prev.version + 1,
                }
            }
            None => StateMetadata {
                created_by: owner.to_string(),
                created_at: now,
                updated_by: owner.to_string(),
                updated_at: now,
                content_type,
                size,
                version: 1,
            },
        };
        entries.insert(
            key.to_string(),
            StateEntry {
                value,
                metadata: metadata.clone(),
            },
        );
        drop(entries);

        tracing::debug!(key = %key, owner = %owner, version = metadata.version, "shared state set");
        Ok(metadata)
    }

    pub fn get(&self, key: &str) -> Option<StateValue> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|e| e.value.clone())
    }

    pub fn get_entry(&self, key: &str) -> Option<StateEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    pub fn metadata(&self, key: &str) -> Option<StateMetadata> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|e| e.metadata.clone())
    }

    pub fn has(&self, key: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(key)
    }

    /// 删除；返回 key 之前是否存在
    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key).is_some()
    }

    /// 所有 key 的元数据快照（按 key 排序）
    pub fn list(&self) -> BTreeMap<String, StateMetadata> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .map(|(k, e)| (k.clone(), e.metadata.clone()))
            .collect()
    }

    pub fn set_scoped(
        &self,
        owner: &str,
        key: &str,
        value: impl Into<StateValue>,
    ) -> Result<StateMetadata, AgentError> {
        if key.is_empty() {
            return Err(AgentError::Validation("shared state key must not be empty".into()));
        }
        self.set(&scoped_key(owner, key), value, owner)
    }

    pub fn get_scoped(&self, owner: &str, key: &str) -> Option<StateValue> {
        self.get(&scoped_key(owner, key))
    }

    /// 按 created_by 过滤（与 key 命名无关）
    pub fn get_agent_scope(&self, owner: &str) -> HashMap<String, StateValue> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|(_, e)| e.metadata.created_by == owner)
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect()
    }

    pub fn get_agent_keys(&self, owner: &str) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.metadata.created_by == owner)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// 构建注入 system prompt 的摘要（最多 limit 条，按 key 排序）
    pub fn summary(&self, limit: usize) -> String {
        let listing = self.list();
        if listing.is_empty() {
            return String::new();
        }
        let mut s = String::from("## Shared State\n");
        for (key, meta) in listing.iter().take(limit) {
            s.push_str(&format!(
                "- {} ({}, {} bytes, by {})\n",
                key, meta.content_type, meta.size, meta.created_by
            ));
        }
        if listing.len() > limit {
            s.push_str(&format!("- ... and {} more\n", listing.len() - limit));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_then_get_records_owner() {
        let store = SharedStateStore::new();
        store.set("result", "42", "agentA").unwrap();

        assert_eq!(store.get("result"), Some(StateValue::Text("42".into())));
        let meta = store.metadata("result").unwrap();
        assert_eq!(meta.created_by, "agentA");
        assert_eq!(meta.content_type, ContentType::Text);
        assert_eq!(meta.size, 2);
        assert_eq!(meta.version, 1);
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = SharedStateStore::new();
        let err = store.set("", "x", "agentA").unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert!(matches!(store.set_scoped("agentA", "", "x"), Err(AgentError::Validation(_))));
        assert!(store.is_empty());

        store.set(" ", "blank", "agentA").unwrap();
        assert_eq!(store.get(" ").unwrap().render(), "blank");
    }

    #[test]
    fn test_overwrite_preserves_creation_and_advances_update() {
        let store = SharedStateStore::new();
        let first = store.set("plan", "draft", "agentA").unwrap();
        let mut last = first.updated_at;
        for i in 0..5 {
            let meta = store.set("plan", format!("rev {i}"), "agentB").unwrap();
            assert_eq!(meta.created_by, "agentA");
            assert_eq!(meta.created_at, first.created_at);
            assert_eq!(meta.updated_by, "agentB");
            assert!(meta.updated_at > last);
            last = meta.updated_at;
        }
        assert_eq!(store.metadata("plan").unwrap().version, 6);
    }

    #[test]
    fn test_delete_reports_existence() {
        let store = SharedStateStore::new();
        store.set("k", "v", "a").unwrap();
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert_eq!(store.get("k"), None);
        assert!(!store.has("k"));
    }

    #[test]
    fn test_content_type_inference() {
        let store = SharedStateStore::new();
        store.set("json_text", r#"{"a": 1}"#, "a").unwrap();
        store.set("broken", "{not json", "a").unwrap();
        store.set("list", serde_json::json!([1, 2, 3]), "a").unwrap();
        store.set("bytes", vec![0u8, 1, 2], "a").unwrap();
        store.set("file", PathBuf::from("/tmp/report.md"), "a").unwrap();

        let list = store.list();
        assert_eq!(list["json_text"].content_type, ContentType::Structured);
        assert_eq!(list["broken"].content_type, ContentType::Text);
        assert_eq!(list["list"].content_type, ContentType::Structured);
        assert_eq!(list["bytes"].content_type, ContentType::Binary);
        assert_eq!(list["bytes"].size, 3);
        assert_eq!(list["file"].content_type, ContentType::FileReference);
    }

    #[test]
    fn test_content_type_recomputed_on_overwrite() {
        let store = SharedStateStore::new();
        store.set("k", "plain", "a").unwrap();
        store.set("k", "[1,2]", "a").unwrap();
        assert_eq!(store.metadata("k").unwrap().content_type, ContentType::Structured);
    }

    #[test]
    fn test_agent_scope_filters_by_creator_not_key() {
        let store = SharedStateStore::new();
        store.set_scoped("agentA", "notes", "a1").unwrap();
        store.set("shared", "a2", "agentA").unwrap();
        store.set("agentA:forged", "b1", "agentB").unwrap();

        assert_eq!(store.get_scoped("agentA", "notes"), Some("a1".into()));
        assert_eq!(store.get_agent_keys("agentA"), vec!["agentA:notes", "shared"]);
        let scope = store.get_agent_scope("agentB");
        assert_eq!(scope.len(), 1);
        assert!(scope.contains_key("agentA:forged"));
    }

    #[test]
    fn test_list_returns_copies() {
        let store = SharedStateStore::new();
        store.set("k", "v", "a").unwrap();
        let mut snapshot = store.list();
        snapshot.get_mut("k").unwrap().created_by = "mallory".into();
        assert_eq!(store.metadata("k").unwrap().created_by, "a");
    }

    #[test]
    fn test_summary_truncates() {
        let store = SharedStateStore::new();
        for i in 0..4 {
            store.set(&format!("k{i}"), "v", "a").unwrap();
        }
        let s = store.summary(2);
        assert!(s.contains("k0"));
        assert!(s.contains("k1"));
        assert!(!s.contains("k3"));
        assert!(s.contains("and 2 more"));
        assert_eq!(SharedStateStore::new().summary(10), "");
    }

    #[tokio::test]
    async fn test_concurrent_writers_share_one_store() {
        let store = Arc::new(SharedStateStore::new());
        let mut handles = Vec::new();
        for agent in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    store
                        .set(&format!("agent{agent}:{i}"), format!("{i}"), &format!("agent{agent}"))
                        .unwrap();
                    store.set("counter", format!("{agent}-{i}"), &format!("agent{agent}")).unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.len(), 8 * 50 + 1);
        assert_eq!(store.metadata("counter").unwrap().version, 8 * 50);
        let own = store
            .get_agent_keys("agent3")
            .into_iter()
            .filter(|k| k.starts_with("agent3:"))
            .count();
        assert_eq!(own, 50);
    }
}
