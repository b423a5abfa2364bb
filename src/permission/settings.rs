//! 持久化设置存储：信任白名单的来源
//!
//! 启动时读取一次，Allow / Block / Remove 时写回。文件实现使用 TOML 的 `[trust]` 表，
//! 写入时保留文件中的其它表。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::AgentError;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_trust(&self) -> Result<BTreeMap<String, bool>, AgentError>;

    async fn save_trust(&self, entries: &BTreeMap<String, bool>) -> Result<(), AgentError>;
}

/// 内存实现（测试或无持久化场景）；记录保存次数
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    trust: Mutex<BTreeMap<String, bool>>,
    saves: Mutex<usize>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_allowed<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let trust = names.into_iter().map(|n| (n.into(), true)).collect();
        Self {
            trust: Mutex::new(trust),
            saves: Mutex::new(0),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        self.trust.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn load_trust(&self) -> Result<BTreeMap<String, bool>, AgentError> {
        Ok(self.snapshot())
    }

    async fn save_trust(&self, entries: &BTreeMap<String, bool>) -> Result<(), AgentError> {
        *self.trust.lock().unwrap_or_else(|e| e.into_inner()) = entries.clone();
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

/// TOML 文件实现：`[trust]` 表中 `name = true/false`
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn read_table(&self) -> Result<toml::Table, AgentError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => toml::from_str(&text)
                .map_err(|e| AgentError::StoreError(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
            Err(e) => Err(AgentError::StoreError(format!("{}: {}", self.path.display(), e))),
        }
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn load_trust(&self) -> Result<BTreeMap<String, bool>, AgentError> {
        let table = self.read_table().await?;
        let Some(toml::Value::Table(trust)) = table.get("trust") else {
            return Ok(BTreeMap::new());
        };
        let mut entries = BTreeMap::new();
        for (name, value) in trust {
            match value.as_bool() {
                Some(allowed) => {
                    entries.insert(name.clone(), allowed);
                }
                None => tracing::warn!(name = %name, "ignoring non-boolean trust entry"),
            }
        }
        Ok(entries)
    }

    async fn save_trust(&self, entries: &BTreeMap<String, bool>) -> Result<(), AgentError> {
        let mut table = self.read_table().await?;
        let trust: toml::Table = entries
            .iter()
            .map(|(k, v)| (k.clone(), toml::Value::Boolean(*v)))
            .collect();
        table.insert("trust".to_string(), toml::Value::Table(trust));
        let text = toml::to_string_pretty(&table)
            .map_err(|e| AgentError::StoreError(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AgentError::StoreError(e.to_string()))?;
            }
        }
        tokio::fs::write(&self.path, text)
            .await
            .map_err(|e| AgentError::StoreError(format!("{}: {}", self.path.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_allow_list() {
        let dir = TempDir::new().unwrap();
        let store = FileSettingsStore::new(dir.path().join("settings.toml"));
        assert!(store.load_trust().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_preserves_other_tables() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "[ui]\ntheme = \"dark\"\n\n[trust]\nshell = false\n").unwrap();

        let store = FileSettingsStore::new(&path);
        let mut entries = store.load_trust().await.unwrap();
        assert_eq!(entries.get("shell"), Some(&false));

        entries.insert("echo".to_string(), true);
        store.save_trust(&entries).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("theme"));
        let reloaded = store.load_trust().await.unwrap();
        assert_eq!(reloaded.get("echo"), Some(&true));
        assert_eq!(reloaded.get("shell"), Some(&false));
    }
}
