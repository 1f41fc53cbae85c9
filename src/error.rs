// ========================================
// エラー型定義
// ========================================
//
// インタプリタ内部の失敗はほとんどがローカルで非致命的（ログ出力して「何も描画しない」等に変換）。
// ここに定義する型は公開APIの Result で返すもの。

use thiserror::Error;

/// スキーマ読み込み時のエラー
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid schema JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// 式のパース・評価エラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("parse error in `{source_text}`: {message}")]
    Parse { source_text: String, message: String },

    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("function `{name}` expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("type error: {0}")]
    Type(String),
}

/// キー・バリューストアのエラー
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// リモートデータソースの取得エラー
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("remote source has no url")]
    MissingUrl,
}

/// データソース操作のエラー
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("unknown data source `{0}`")]
    UnknownSource(String),

    #[error("data source `{0}` is read-only")]
    ReadOnly(String),

    #[error("data source `{0}` is not a remote source")]
    NotRemote(String),

    #[error("index {index} in path `{path}` is past the end of a list of length {len}")]
    IndexOutOfRange { path: String, index: usize, len: usize },

    #[error("no async runtime available to refetch `{0}`")]
    NoRuntime(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// アクション実行エラー
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("action `{0}` has no target")]
    MissingTarget(String),

    #[error("action `{0}` has no value")]
    MissingValue(String),

    #[error("`{target}` is not a {expected}")]
    WrongType { target: String, expected: &'static str },

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Expression(#[from] ExprError),

    #[error("custom action `{name}` failed: {message}")]
    Handler { name: String, message: String },

    #[error("unsupported action `{0}`")]
    Unsupported(String),
}
