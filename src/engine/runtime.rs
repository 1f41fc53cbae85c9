// ========================================
// ページランタイム
// ========================================
//
// スキーマ・データソース・レジストリ・アクション実行をまとめ、
// 描画とイベント発火の入口を提供する。再描画のタイミングはホストが決める。

use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::engine::action::{ActionExecutor, ActionHandler, LoggingActionHandler};
use crate::engine::core::{Dispatch, RenderNode, RenderOptions, Renderer, find_by_key};
use crate::engine::data_source::{DataSourceManager, DataSourceManagerBuilder};
use crate::engine::registry::{ComponentRegistry, MapRegistry};
use crate::parser::ast::PageSchema;
use crate::parser::utils::normalize_event_name;

pub struct Page<R: ComponentRegistry = MapRegistry> {
    schema: Arc<PageSchema>,
    sources: DataSourceManager,
    registry: R,
    executor: ActionExecutor,
    options: RenderOptions,
}

impl<R: ComponentRegistry> Page<R> {
    /// 既定のストア・フェッチャー・ログ出力ハンドラで作成
    pub fn new(schema: PageSchema, registry: R) -> Self {
        Self::with_builder(schema, registry, DataSourceManager::builder(), Arc::new(LoggingActionHandler))
    }

    pub fn with_builder(
        schema: PageSchema,
        registry: R,
        builder: DataSourceManagerBuilder,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        let sources = builder.build(&schema.data_sources);
        let executor = ActionExecutor::new(sources.clone(), handler);
        Self {
            schema: Arc::new(schema),
            sources,
            registry,
            executor,
            options: RenderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn schema(&self) -> &Arc<PageSchema> {
        &self.schema
    }

    pub fn sources(&self) -> &DataSourceManager {
        &self.sources
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// remote データソースの初回取得を開始
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.sources.start()
    }

    /// 現在のスナップショット1つに対してページ全体を描画
    pub fn render(&self) -> Vec<RenderNode> {
        let snapshot = self.sources.snapshot();
        Renderer::with_options(&self.registry, self.options).render(&self.schema.components, &snapshot)
    }

    /// 描画済みツリー内の要素のイベントを発火する（同名ハンドラは宣言順にすべて）
    pub fn dispatch(&self, tree: &[RenderNode], key: &str, event: &str, payload: Value) -> Vec<Dispatch> {
        let Some(element) = find_by_key(tree, key) else {
            log::warn!("No element with key '{}' to dispatch '{}' on", key, event);
            return Vec::new();
        };
        let event = normalize_event_name(event);
        let dispatches: Vec<Dispatch> = element
            .handlers(&event)
            .map(|bound| bound.dispatch(payload.clone(), &self.executor))
            .collect();
        if dispatches.is_empty() {
            log::warn!("Element '{}' has no '{}' handler", key, event);
        }
        dispatches
    }
}
