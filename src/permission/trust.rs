//! 能力信任门：哪些工具 / 外部集成当前允许执行
//!
//! 启动时从 SettingsStore 加载一次，所有会话共享同一个实例。没有条目等同于 Block。
//! 在任何派发到 External Tool Executor 之前查询；变更先写回存储（不持有条目锁），成功后才生效。

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;

use crate::core::AgentError;
use crate::permission::SettingsStore;

pub struct TrustGate {
    entries: RwLock<BTreeMap<String, bool>>,
    settings: Arc<dyn SettingsStore>,
    /// 串行化写回，保证落盘顺序与内存变更顺序一致
    persist_lock: Mutex<()>,
}

impl TrustGate {
    /// 从持久化设置加载白名单
    pub async fn load(settings: Arc<dyn SettingsStore>) -> Result<Self, AgentError> {
        let entries = settings.load_trust().await?;
        tracing::info!(
            allowed = entries.values().filter(|v| **v).count(),
            total = entries.len(),
            "trust allow-list loaded"
        );
        Ok(Self {
            entries: RwLock::new(entries),
            settings,
            persist_lock: Mutex::new(()),
        })
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(name).copied().unwrap_or(false)
    }

    /// 允许；已允许时不写回
    pub async fn allow(&self, name: &str) -> Result<(), AgentError> {
        self.update(name, Some(true)).await.map(|_| ())
    }

    pub async fn block(&self, name: &str) -> Result<(), AgentError> {
        self.update(name, Some(false)).await.map(|_| ())
    }

    /// 集成被移除时调用：连同允许标记一起删除，返回之前是否有条目
    pub async fn remove(&self, name: &str) -> Result<bool, AgentError> {
        self.update(name, None).await
    }

    /// 当前允许的名称（排序）
    pub fn allowed_names(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|(_, allowed)| **allowed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn entries(&self) -> BTreeMap<String, bool> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn update(&self, name: &str, allowed: Option<bool>) -> Result<bool, AgentError> {
        if name.trim().is_empty() {
            return Err(AgentError::Validation("trust entry name must not be empty".into()));
        }
        let _persist = self.persist_lock.lock().await;
        // 只有 update 会改 entries，且持有 persist_lock，写回期间快照不会过期
        let (existed, proposed) = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            let previous = entries.get(name).copied();
            if previous == allowed {
                return Ok(previous.is_some());
            }
            let mut proposed = entries.clone();
            match allowed {
                Some(v) => {
                    proposed.insert(name.to_string(), v);
                }
                None => {
                    proposed.remove(name);
                }
            }
            (previous.is_some(), proposed)
        };
        if let Err(e) = self.settings.save_trust(&proposed).await {
            tracing::warn!(name = %name, ?allowed, error = %e, "trust entry not persisted, change discarded");
            return Err(e);
        }
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = proposed;
        tracing::info!(name = %name, ?allowed, "trust entry updated");
        Ok(existed)
    }
}
