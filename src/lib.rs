pub mod analysis;
pub mod engine;
pub mod error;
#[cfg(feature = "cli")]
pub mod hotreload;
pub mod parser;

use log::{error, info, warn};
use serde_json::Value;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub use engine::action::{ActionExecutor, ActionHandler, LoggingActionHandler};
pub use engine::core::{RenderNode, RenderOptions, Renderer, outline};
pub use engine::data_source::DataSourceManager;
pub use engine::registry::{ComponentRegistry, MapRegistry, Renderable};
pub use engine::runtime::Page;
pub use error::{ActionError, ExprError, FetchError, SchemaError, SourceError, StoreError};
pub use parser::ast::PageSchema;
pub use parser::{parse_schema, parse_schema_file};

use analysis::error::{Diagnostic, DiagnosticLevel};
use engine::store::{FileStore, KeyValueStore, MemoryStore};

// ========================================
// コマンドライン引数構造体
// ========================================

/// コマンドライン引数の設定
#[derive(Debug)]
pub struct CliArgs {
    pub enable_lint: bool,
    pub quiet: bool, // panic以外のログを抑制
    pub log_level: LogLevel,
    pub json: bool,
    pub watch: bool,
    pub kv_dir: Option<PathBuf>,
    pub dispatches: Vec<DispatchSpec>,
    pub schema_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogLevel {
    Off,   // ログを一切表示しない（panicは除く）
    Error, // エラーレベルのみ
    Warn,  // 警告レベル以上
    Info,  // 情報レベル以上
    Debug, // デバッグレベル以上
    Trace, // 全てのログ
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            enable_lint: true,
            quiet: false,
            log_level: LogLevel::Info,
            json: false,
            watch: false,
            kv_dir: None,
            dispatches: Vec::new(),
            schema_path: None,
        }
    }
}

/// `--dispatch=KEY:EVENT[:JSON]` で指定されたイベント発火
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSpec {
    pub key: String,
    pub event: String,
    pub payload: Value,
}

impl std::str::FromStr for DispatchSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // JSON側に ':' が含まれうるので先頭2つだけで区切る
        let mut parts = s.splitn(3, ':');
        let key = parts.next().unwrap_or_default();
        let event = parts.next().unwrap_or_default();
        if key.is_empty() || event.is_empty() {
            return Err(format!("expected KEY:EVENT[:JSON], got '{}'", s));
        }
        let payload = match parts.next() {
            Some(json) => serde_json::from_str(json).map_err(|e| format!("invalid payload in '{}': {}", s, e))?,
            None => Value::Null,
        };
        Ok(Self {
            key: key.to_string(),
            event: event.to_string(),
            payload,
        })
    }
}

pub fn parse_args() -> CliArgs {
    match parse_args_from(env::args().skip(1)) {
        Ok(cli_args) => cli_args,
        Err(message) => {
            eprintln!("{}", message);
            show_help();
            std::process::exit(2);
        }
    }
}

pub fn parse_args_from<I, S>(args: I) -> Result<CliArgs, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut cli_args = CliArgs::default();

    for arg in args {
        let arg = arg.as_ref();
        match arg {
            "--no-lint" => cli_args.enable_lint = false,
            "--lint" => cli_args.enable_lint = true,
            "--json" => cli_args.json = true,
            "--watch" => cli_args.watch = true,
            "--quiet" | "-q" => {
                cli_args.quiet = true;
                cli_args.log_level = LogLevel::Off;
            }
            "--log-level=off" => cli_args.log_level = LogLevel::Off,
            "--log-level=error" => cli_args.log_level = LogLevel::Error,
            "--log-level=warn" => cli_args.log_level = LogLevel::Warn,
            "--log-level=info" => cli_args.log_level = LogLevel::Info,
            "--log-level=debug" => cli_args.log_level = LogLevel::Debug,
            "--log-level=trace" => cli_args.log_level = LogLevel::Trace,
            "--help" | "-h" => {
                show_help();
                std::process::exit(0);
            }
            _ => {
                if let Some(dir) = arg.strip_prefix("--kv-dir=") {
                    cli_args.kv_dir = Some(PathBuf::from(dir));
                } else if let Some(spec) = arg.strip_prefix("--dispatch=") {
                    cli_args.dispatches.push(spec.parse()?);
                } else if arg.starts_with('-') {
                    return Err(format!("unknown option '{}'", arg));
                } else if cli_args.schema_path.is_none() {
                    cli_args.schema_path = Some(PathBuf::from(arg));
                } else {
                    return Err(format!("unexpected argument '{}'", arg));
                }
            }
        }
    }
    Ok(cli_args)
}

pub fn show_help() {
    println!(
        "JSON UI Schema Renderer

USAGE:
    jsonui [OPTIONS] <SCHEMA.json>

OPTIONS:
    --lint/--no-lint            Enable/disable lint checks (default: enabled)
    --quiet, -q                 Suppress all logs except panics
    --log-level=LEVEL           Set log level (off/error/warn/info/debug/trace)
    --json                      Print the rendered tree as JSON instead of an outline
    --watch                     Re-render whenever the schema file changes
    --kv-dir=DIR                Keep persistent data sources as JSON files in DIR
    --dispatch=KEY:EVENT[:JSON] Fire an event on the element with KEY (repeatable)
    --help, -h                  Show this help"
    );
}

/// ログレベルを初期化する関数
pub fn init_logger(log_level: &LogLevel) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::sync::Once;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let level = match log_level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        };

        let mut builder = Builder::from_default_env();

        if matches!(log_level, LogLevel::Off) {
            // quietモードの場合、何も出力しない（panicは別途処理される）
            builder
                .filter_level(LevelFilter::Off)
                .format(|_, _| Ok(()))
                .try_init()
                .ok(); // エラーを無視
        } else {
            builder
                .filter_level(level)
                // HTTPクライアント関連のログを抑制
                .filter_module("reqwest", LevelFilter::Warn)
                .filter_module("hyper", LevelFilter::Warn)
                .filter_module("hyper_util", LevelFilter::Warn)
                .filter_module("rustls", LevelFilter::Warn)
                .format_timestamp_secs()
                .try_init()
                .ok(); // エラーを無視
        }
    });
}

// ========================================
// スキーマ読み込み
// ========================================

pub fn load_schema<P: AsRef<Path>>(
    path: P,
    enable_lint: bool,
    quiet: bool,
    registry: &dyn ComponentRegistry,
) -> Result<PageSchema, SchemaError> {
    let schema = parse_schema_file(&path)?;

    if enable_lint && !quiet {
        let analysis_result = analysis::analyze_schema(&schema, registry);

        for diag in &analysis_result.diagnostics {
            let msg = paint(diag);
            match diag.level {
                DiagnosticLevel::Error => error!("[{:?}] {}", diag.level, msg),
                DiagnosticLevel::Warning => warn!("[{:?}] {}", diag.level, msg),
                DiagnosticLevel::Info => info!("[{:?}] {}", diag.level, msg),
            }
        }

        if analysis_result.has_errors() {
            error!("Lint errors found. Use --no-lint to skip lint checks.");
        }
    }

    Ok(schema)
}

#[cfg(feature = "cli")]
fn paint(diag: &Diagnostic) -> colored::ColoredString {
    use colored::*;

    let loc = diag.location.as_deref().unwrap_or("");
    match diag.level {
        DiagnosticLevel::Error => format!("{} {}", loc, diag.message).red().bold(),
        DiagnosticLevel::Warning => format!("{} {}", loc, diag.message).yellow().bold(),
        DiagnosticLevel::Info => format!("{} {}", loc, diag.message).blue(),
    }
}

#[cfg(not(feature = "cli"))]
fn paint(diag: &Diagnostic) -> String {
    format!("{} {}", diag.location.as_deref().unwrap_or(""), diag.message)
}

// ========================================
// ページ実行
// ========================================

/// ストア・ランタイムを CLI 設定から組み立ててページを作る
pub fn build_page(schema: PageSchema, cli_args: &CliArgs) -> Page {
    let store: Arc<dyn KeyValueStore> = match &cli_args.kv_dir {
        Some(dir) => Arc::new(FileStore::new(dir)),
        None => Arc::new(MemoryStore::new()),
    };
    let mut builder = DataSourceManager::builder().store(store);
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        builder = builder.runtime(handle);
    }
    Page::with_builder(schema, MapRegistry::with_builtin(), builder, Arc::new(LoggingActionHandler))
}

/// 描画結果を出力する
pub fn print_tree(tree: &[RenderNode], json: bool) {
    if json {
        match serde_json::to_string_pretty(tree) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to serialize render tree: {}", e),
        }
    } else {
        print!("{}", outline(tree));
    }
}

/// 取得中のデータソースがなくなるまで待つ（上限あり）
pub async fn wait_for_sources(page: &Page, limit: Duration) {
    let started = std::time::Instant::now();
    let sources = page.sources();
    while sources.ids().iter().any(|id| sources.loading(id)) {
        if started.elapsed() >= limit {
            warn!("Data sources still loading after {:?}, rendering anyway", limit);
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 取得・描画・イベント発火をひと通り行う
pub async fn run_page(schema: PageSchema, cli_args: &CliArgs) {
    const FETCH_LIMIT: Duration = Duration::from_secs(30);

    let page = build_page(schema, cli_args);
    for handle in page.start() {
        if let Err(e) = handle.await {
            error!("Fetch task failed: {}", e);
        }
    }

    let mut tree = page.render();
    print_tree(&tree, cli_args.json);

    for spec in &cli_args.dispatches {
        let dispatches = page.dispatch(&tree, &spec.key, &spec.event, spec.payload.clone());
        let executed = dispatches.iter().filter(|d| d.is_executed()).count();
        info!(
            "Dispatched '{}' on '{}' ({} of {} handler(s) executed)",
            spec.event,
            spec.key,
            executed,
            dispatches.len()
        );
        wait_for_sources(&page, FETCH_LIMIT).await;
        tree = page.render();
        print_tree(&tree, cli_args.json);
    }
}

/// スキーマファイルの変更ごとに読み直して再描画する（Ctrl-C で終了）
#[cfg(feature = "cli")]
pub async fn run_with_hotreload(path: PathBuf, cli_args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    use hotreload::HotReloader;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let hotreloader = HotReloader::new(&path)?;
    hotreloader.set_reload_callback(move || {
        let _ = tx.send(());
    });

    let registry = MapRegistry::with_builtin();
    loop {
        tokio::select! {
            received = rx.recv() => {
                if received.is_none() {
                    break;
                }
                match load_schema(&path, cli_args.enable_lint, cli_args.quiet, &registry) {
                    Ok(schema) => run_page(schema, cli_args).await,
                    Err(e) => error!("Failed to reload {}: {}", path.display(), e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_args_from() {
        let args = parse_args_from([
            "--no-lint",
            "--json",
            "--log-level=debug",
            "--kv-dir=/tmp/kv",
            "--dispatch=save:onClick",
            "--dispatch=list-0/remove:click:{\"id\":1}",
            "page.json",
        ])
        .unwrap();

        assert!(!args.enable_lint);
        assert!(args.json);
        assert!(!args.watch);
        assert_eq!(args.log_level, LogLevel::Debug);
        assert_eq!(args.kv_dir, Some(PathBuf::from("/tmp/kv")));
        assert_eq!(args.schema_path, Some(PathBuf::from("page.json")));
        assert_eq!(args.dispatches.len(), 2);
        assert_eq!(args.dispatches[0].event, "onClick");
        assert_eq!(args.dispatches[0].payload, Value::Null);
        assert_eq!(args.dispatches[1].key, "list-0/remove");
        assert_eq!(args.dispatches[1].payload, json!({ "id": 1 }));
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(parse_args_from(["--dispatch=only-key"]).is_err());
        assert!(parse_args_from(["--dispatch=a:b:{oops"]).is_err());
        assert!(parse_args_from(["--frobnicate"]).is_err());
        assert!(parse_args_from(["a.json", "b.json"]).is_err());

        let quiet = parse_args_from(["-q"]).unwrap();
        assert!(quiet.quiet);
        assert_eq!(quiet.log_level, LogLevel::Off);
    }

    #[test]
    fn test_load_schema_with_lint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("page.json");
        std::fs::write(&path, r#"{ "components": [{ "id": "x", "type": "Nope" }] }"#).unwrap();

        // lint エラーがあっても読み込みは成功する
        let schema = load_schema(&path, true, false, &MapRegistry::with_builtin()).unwrap();
        assert_eq!(schema.components.len(), 1);
        assert!(load_schema(dir.path().join("missing.json"), true, false, &MapRegistry::with_builtin()).is_err());
    }
}
