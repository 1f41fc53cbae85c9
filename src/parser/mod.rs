pub mod ast;
pub mod expr;
pub mod utils;

use std::fs;
use std::path::Path;

use crate::error::SchemaError;
use ast::PageSchema;

// スキーマファイルをパースして返す。
pub fn parse_schema_file<P: AsRef<Path>>(path: P) -> Result<PageSchema, SchemaError> {
    let source = fs::read_to_string(path)?;
    parse_schema(&source)
}

// 文字列（埋め込みJSON等）からスキーマをパースする関数
pub fn parse_schema(source: &str) -> Result<PageSchema, SchemaError> {
    Ok(serde_json::from_str(source)?)
}
