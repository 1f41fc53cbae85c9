// ========================================
// 永続キー・バリューストア
// ========================================
//
// persistent データソースの読み書き先。ホスト側で差し替えられるようトレイトで受ける。

use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;

pub trait KeyValueStore: Send + Sync {
    /// 未保存のキーは Ok(None)
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;
}

/// プロセス内メモリに保持するストア
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 初期値付きで作成
    pub fn with_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            values: Mutex::new(values.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// キーごとに `<base>/<key>.json` へ保存するストア
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", sanitize_key(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        fs::create_dir_all(&self.base_path)?;
        let text = serde_json::to_string_pretty(value)?;
        fs::write(self.path_for(key), text)?;
        Ok(())
    }
}

/// ファイル名に使えない文字を `_` に置き換える
fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    // ".." などでディレクトリを抜けないように
    if sanitized.trim_matches('.').is_empty() {
        format!("_{}", sanitized)
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::with_values([("theme", json!("dark"))]);
        assert_eq!(store.get("theme").unwrap(), Some(json!("dark")));
        assert_eq!(store.get("missing").unwrap(), None);

        store.set("count", &json!(2)).unwrap();
        store.set("theme", &json!("light")).unwrap();
        assert_eq!(store.get("count").unwrap(), Some(json!(2)));
        assert_eq!(store.get("theme").unwrap(), Some(json!("light")));
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("kv"));

        assert_eq!(store.get("app/todos").unwrap(), None);
        store.set("app/todos", &json!([{ "id": 1 }])).unwrap();

        let reopened = FileStore::new(dir.path().join("kv"));
        assert_eq!(reopened.get("app/todos").unwrap(), Some(json!([{ "id": 1 }])));
        assert!(dir.path().join("kv").join("app_todos.json").exists());

        reopened.set("app/todos", &json!([])).unwrap();
        assert_eq!(store.get("app/todos").unwrap(), Some(json!([])));
    }

    #[test]
    fn test_file_store_reports_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(store.get("broken"), Err(StoreError::Serialize(_))));
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("user-prefs_v1"), "user-prefs_v1");
        assert_eq!(sanitize_key("a b/c"), "a_b_c");
        assert_eq!(sanitize_key(".."), "_..");
    }
}
