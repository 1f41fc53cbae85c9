// ========================================
// データソース管理
// ========================================
//
// 全データソースの状態を唯一所有し、変更はすべて set / fetch 経由で行う。
// 描画側は snapshot() で一貫したルートコンテキストを受け取るだけ。

use regex::Regex;
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::engine::binding::{lookup_path, set_path};
use crate::engine::context::Context;
use crate::engine::evaluator::evaluate_value;
use crate::engine::fetch::{Fetcher, HttpFetcher};
use crate::engine::store::{KeyValueStore, MemoryStore};
use crate::error::{FetchError, SourceError};
use crate::parser::ast::{DataSourceConfig, DataSourceKind};

/// ルートコンテキスト上で読み込み状態を公開する予約名
pub const STATUS_KEY: &str = "$status";

lazy_static::lazy_static! {
    // {{name}} / {{name.path}} 形式のURLプレースホルダー
    static ref PLACEHOLDER: Regex =
        Regex::new(r"\{\{\s*([A-Za-z_$][A-Za-z0-9_$]*)((?:\.[A-Za-z0-9_$]+)*)\s*\}\}").unwrap();
}

/// データソース1つ分の現在状態
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceState {
    pub value: Option<Value>,
    pub loading: bool,
    pub error: Option<FetchError>,
}

struct SourceEntry {
    id: String,
    config: DataSourceConfig,
    state: SourceState,
    /// remote のみ: 依存するデータソース名
    dependencies: Vec<String>,
    /// remote のみ: 最後に発行した取得の世代
    generation: u64,
}

type Listener = Box<dyn Fn(&str) + Send + Sync>;

struct Inner {
    entries: Mutex<Vec<SourceEntry>>,
    store: Arc<dyn KeyValueStore>,
    fetcher: Arc<dyn Fetcher>,
    runtime: Option<Handle>,
    listeners: Mutex<Vec<Listener>>,
    version: AtomicU64,
}

/// データソース群へのハンドル（clone しても同じ状態を共有）
#[derive(Clone)]
pub struct DataSourceManager {
    inner: Arc<Inner>,
}

// ========================================
// ビルダー
// ========================================

#[derive(Default)]
pub struct DataSourceManagerBuilder {
    store: Option<Arc<dyn KeyValueStore>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    runtime: Option<Handle>,
}

impl DataSourceManagerBuilder {
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// 取得タスクを起動するランタイム（未指定なら呼び出し元のランタイム）
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self, sources: &[(String, DataSourceConfig)]) -> DataSourceManager {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let fetcher = self.fetcher.unwrap_or_else(|| Arc::new(HttpFetcher::new()));
        let runtime = self.runtime.or_else(|| Handle::try_current().ok());

        let mut entries: Vec<SourceEntry> = sources
            .iter()
            .map(|(id, config)| {
                let value = match config.kind {
                    DataSourceKind::Persistent => load_persistent(store.as_ref(), id, config),
                    _ => config.default_value.clone(),
                };
                let dependencies = if config.kind == DataSourceKind::Remote {
                    remote_dependencies(config)
                } else {
                    Vec::new()
                };
                SourceEntry {
                    id: id.clone(),
                    config: config.clone(),
                    state: SourceState {
                        value,
                        ..SourceState::default()
                    },
                    dependencies,
                    generation: 0,
                }
            })
            .collect();

        // computed は非computedの値（と先行する computed）から一度だけ評価する
        let mut scope = Map::new();
        for entry in entries.iter().filter(|e| e.config.kind != DataSourceKind::Computed) {
            if let Some(value) = &entry.state.value {
                scope.insert(entry.id.clone(), value.clone());
            }
        }
        for entry in entries.iter_mut().filter(|e| e.config.kind == DataSourceKind::Computed) {
            if let Some(expression) = &entry.config.expression {
                match evaluate_value(expression, &Context::new(scope.clone())) {
                    Ok(Some(value)) => entry.state.value = Some(value),
                    Ok(None) => {}
                    Err(e) => log::warn!(
                        "Failed to compute data source '{}' from `{}`: {}",
                        entry.id,
                        expression,
                        e
                    ),
                }
            }
            if let Some(value) = &entry.state.value {
                scope.insert(entry.id.clone(), value.clone());
            }
        }

        log::debug!("Built {} data source(s)", entries.len());
        DataSourceManager {
            inner: Arc::new(Inner {
                entries: Mutex::new(entries),
                store,
                fetcher,
                runtime,
                listeners: Mutex::new(Vec::new()),
                version: AtomicU64::new(0),
            }),
        }
    }
}

fn load_persistent(store: &dyn KeyValueStore, id: &str, config: &DataSourceConfig) -> Option<Value> {
    let key = config.key.as_deref().unwrap_or(id);
    match store.get(key) {
        Ok(Some(value)) => Some(value),
        Ok(None) => config.default_value.clone(),
        Err(e) => {
            log::warn!("Failed to read persistent source '{}' (key '{}'): {}", id, key, e);
            config.default_value.clone()
        }
    }
}

fn remote_dependencies(config: &DataSourceConfig) -> Vec<String> {
    let mut dependencies = config.dependencies.clone();
    if let Some(url) = &config.url {
        for root in placeholder_roots(url) {
            if !dependencies.contains(&root) {
                dependencies.push(root);
            }
        }
    }
    dependencies
}

/// URL中のプレースホルダーが参照するルート名
pub fn placeholder_roots(url: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(url)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// プレースホルダーをコンテキストの値で置き換える（undefined / null は空文字）
pub fn interpolate_url(url: &str, context: &Context) -> String {
    PLACEHOLDER
        .replace_all(url, |caps: &regex::Captures| {
            let path = caps[2].trim_start_matches('.');
            let value = context
                .get(&caps[1])
                .and_then(|root| lookup_path(root, path));
            match value {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

fn apply_fetch_transform(raw: Value, transform: Option<&str>) -> Result<Value, FetchError> {
    let Some(expression) = transform else {
        return Ok(raw);
    };
    let scope = Context::empty().with("data", raw);
    match evaluate_value(expression, &scope) {
        Ok(value) => Ok(value.unwrap_or(Value::Null)),
        Err(e) => Err(FetchError::Transform(e.to_string())),
    }
}

// ========================================
// マネージャー本体
// ========================================

impl DataSourceManager {
    pub fn builder() -> DataSourceManagerBuilder {
        DataSourceManagerBuilder::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<SourceEntry>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 宣言順のデータソース名
    pub fn ids(&self) -> Vec<String> {
        self.entries().iter().map(|e| e.id.clone()).collect()
    }

    pub fn kind(&self, id: &str) -> Option<DataSourceKind> {
        self.entries().iter().find(|e| e.id == id).map(|e| e.config.kind)
    }

    pub fn source(&self, id: &str) -> Option<SourceHandle> {
        self.kind(id).map(|kind| SourceHandle {
            manager: self.clone(),
            id: id.to_string(),
            kind,
        })
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.entries()
            .iter()
            .find(|e| e.id == id)
            .and_then(|e| e.state.value.clone())
    }

    pub fn state(&self, id: &str) -> Option<SourceState> {
        self.entries().iter().find(|e| e.id == id).map(|e| e.state.clone())
    }

    pub fn loading(&self, id: &str) -> bool {
        self.entries().iter().any(|e| e.id == id && e.state.loading)
    }

    pub fn error(&self, id: &str) -> Option<FetchError> {
        self.entries()
            .iter()
            .find(|e| e.id == id)
            .and_then(|e| e.state.error.clone())
    }

    /// 値を書き込む。persistent はメモリ更新後にストアへ書き込み、依存する remote を再取得
    pub fn set(&self, id: &str, value: Value) -> Result<(), SourceError> {
        let write_through = {
            let mut entries = self.entries();
            let entry = entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| SourceError::UnknownSource(id.to_string()))?;
            if entry.config.kind == DataSourceKind::Computed {
                return Err(SourceError::ReadOnly(id.to_string()));
            }
            entry.state.value = Some(value.clone());
            match entry.config.kind {
                DataSourceKind::Persistent => {
                    Some(entry.config.key.clone().unwrap_or_else(|| id.to_string()))
                }
                _ => None,
            }
        };

        let stored = match write_through {
            Some(key) => self.inner.store.set(&key, &value),
            None => Ok(()),
        };
        if let Err(e) = &stored {
            log::error!("Failed to persist data source '{}': {}", id, e);
        }

        self.changed(id);
        self.refetch_dependents(id);
        stored.map_err(SourceError::from)
    }

    /// ドット区切りパスの位置だけを書き換える
    pub fn set_path(&self, id: &str, path: &str, value: Value) -> Result<(), SourceError> {
        let mut current = match self.kind(id) {
            Some(_) => self.get(id).unwrap_or(Value::Null),
            None => return Err(SourceError::UnknownSource(id.to_string())),
        };
        set_path(&mut current, path, value)?;
        self.set(id, current)
    }

    /// 全データソースの一貫したスナップショット
    pub fn snapshot(&self) -> Context {
        let entries = self.entries();
        let mut root = Map::new();
        let mut status = Map::new();
        for entry in entries.iter() {
            if let Some(value) = &entry.state.value {
                root.insert(entry.id.clone(), value.clone());
            }
            status.insert(
                entry.id.clone(),
                json!({
                    "loading": entry.state.loading,
                    "error": entry.state.error.as_ref().map(|e| e.to_string()),
                }),
            );
        }
        root.insert(STATUS_KEY.to_string(), Value::Object(status));
        Context::new(root)
    }

    /// 全 remote データソースの初回取得を開始する
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let remote_ids: Vec<String> = self
            .entries()
            .iter()
            .filter(|e| e.config.kind == DataSourceKind::Remote)
            .map(|e| e.id.clone())
            .collect();

        remote_ids
            .iter()
            .filter_map(|id| match self.refetch(id) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::warn!("Could not start fetching '{}': {}", id, e);
                    None
                }
            })
            .collect()
    }

    /// remote データソースを取得し直す。新しい取得が古い取得より優先される
    pub fn refetch(&self, id: &str) -> Result<JoinHandle<()>, SourceError> {
        let runtime = self
            .inner
            .runtime
            .clone()
            .ok_or_else(|| SourceError::NoRuntime(id.to_string()))?;

        let (generation, url, transform) = {
            let mut entries = self.entries();
            let entry = entries
                .iter_mut()
                .find(|e| e.id == id)
                .ok_or_else(|| SourceError::UnknownSource(id.to_string()))?;
            if entry.config.kind != DataSourceKind::Remote {
                return Err(SourceError::NotRemote(id.to_string()));
            }
            entry.generation += 1;
            entry.state.loading = true;
            entry.state.error = None;
            (entry.generation, entry.config.url.clone(), entry.config.transform.clone())
        };
        self.changed(id);

        let request = url.map(|url| {
            let url = interpolate_url(&url, &self.snapshot());
            log::debug!("Fetching '{}' from {} (generation {})", id, url, generation);
            self.inner.fetcher.fetch(&url)
        });

        let manager = self.clone();
        let id = id.to_string();
        Ok(runtime.spawn(async move {
            let result = match request {
                Some(request) => request
                    .await
                    .and_then(|raw| apply_fetch_transform(raw, transform.as_deref())),
                None => Err(FetchError::MissingUrl),
            };
            manager.complete_fetch(&id, generation, result);
        }))
    }

    fn complete_fetch(&self, id: &str, generation: u64, result: Result<Value, FetchError>) {
        {
            let mut entries = self.entries();
            let Some(entry) = entries.iter_mut().find(|e| e.id == id) else {
                return;
            };
            if entry.generation != generation {
                log::debug!(
                    "Discarding stale response for '{}' (generation {}, latest {})",
                    id,
                    generation,
                    entry.generation
                );
                return;
            }
            entry.state.loading = false;
            match result {
                Ok(value) => {
                    entry.state.value = Some(value);
                    entry.state.error = None;
                }
                Err(e) => {
                    // 表示中の値は消さない
                    log::warn!("Fetching '{}' failed: {}", id, e);
                    entry.state.error = Some(e);
                }
            }
        }
        self.changed(id);
    }

    fn refetch_dependents(&self, id: &str) {
        let dependents: Vec<String> = self
            .entries()
            .iter()
            .filter(|e| e.id != id && e.dependencies.iter().any(|d| d == id))
            .map(|e| e.id.clone())
            .collect();
        for dependent in dependents {
            if let Err(e) = self.refetch(&dependent) {
                log::warn!("Could not refetch '{}' after '{}' changed: {}", dependent, id, e);
            }
        }
    }

    /// 変更通知を登録する（引数は変更されたデータソース名）。
    /// リスナー内から subscribe を呼ぶとデッドロックする
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    /// 変更のたびに増えるカウンタ
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    fn changed(&self, id: &str) {
        self.inner.version.fetch_add(1, Ordering::SeqCst);
        let listeners = self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(id);
        }
    }
}

impl fmt::Debug for DataSourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceManager")
            .field("sources", &self.ids())
            .field("version", &self.version())
            .finish()
    }
}

/// データソース1つ分の操作ハンドル
#[derive(Clone, Debug)]
pub struct SourceHandle {
    manager: DataSourceManager,
    id: String,
    kind: DataSourceKind,
}

impl SourceHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> DataSourceKind {
        self.kind
    }

    pub fn get(&self) -> Option<Value> {
        self.manager.get(&self.id)
    }

    pub fn set(&self, value: Value) -> Result<(), SourceError> {
        self.manager.set(&self.id, value)
    }

    pub fn loading(&self) -> bool {
        self.manager.loading(&self.id)
    }

    pub fn error(&self) -> Option<FetchError> {
        self.manager.error(&self.id)
    }

    pub fn refetch(&self) -> Result<JoinHandle<()>, SourceError> {
        self.manager.refetch(&self.id)
    }
}
