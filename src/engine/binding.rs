// ========================================
// バインディング解決
// ========================================
//
// 存在しないパスはエラーにせず undefined（None）として扱う。

use serde_json::{Map, Value};

use crate::engine::context::Context;
use crate::engine::evaluator::evaluate_value;
use crate::error::SourceError;
use crate::parser::ast::Binding;

/// バインディングをコンテキストに対して解決する
pub fn resolve(binding: &Binding, context: &Context) -> Option<Value> {
    match binding {
        Binding::Source(name) => match name.split_once('.') {
            Some((source, path)) => lookup_path(context.get(source)?, path).cloned(),
            None => context.get(name).cloned(),
        },
        Binding::Path {
            source,
            path,
            transform,
        } => {
            let root = context.get(source);
            let resolved = match (root, path.as_deref()) {
                (Some(value), Some(path)) => lookup_path(value, path).cloned(),
                (Some(value), None) => Some(value.clone()),
                (None, _) => None,
            };
            match transform {
                Some(expression) => apply_transform(resolved, expression, context),
                None => resolved,
            }
        }
    }
}

/// ドット区切りパスを辿る。途中で null / 非コンテナに当たったら None
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// ドット区切りパスの位置に値を書き込む。途中のオブジェクトは必要に応じて作成。
/// 配列は末尾への追加（index == len）のみ伸ばせる
pub fn set_path(target: &mut Value, path: &str, value: Value) -> Result<(), SourceError> {
    if path.is_empty() {
        *target = value;
        return Ok(());
    }

    let segments: Vec<&str> = path.split('.').collect();
    let mut current = target;
    for (position, segment) in segments.iter().enumerate() {
        let index = if current.is_array() {
            segment.parse::<usize>().ok()
        } else {
            None
        };
        // 配列に名前付きキーは置けないのでオブジェクトに置き換える
        if index.is_none() && !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let slot = match (current, index) {
            (Value::Array(items), Some(index)) => {
                if index == items.len() {
                    items.push(Value::Null);
                }
                let len = items.len();
                match items.get_mut(index) {
                    Some(slot) => slot,
                    None => {
                        return Err(SourceError::IndexOutOfRange {
                            path: path.to_string(),
                            index,
                            len,
                        });
                    }
                }
            }
            (Value::Object(map), _) => map.entry(segment.to_string()).or_insert(Value::Null),
            _ => return Ok(()),
        };
        if position + 1 == segments.len() {
            *slot = value;
            return Ok(());
        }
        current = slot;
    }
    Ok(())
}

/// transform 式を `data` / `value` に解決値を束縛して評価する
fn apply_transform(resolved: Option<Value>, expression: &str, context: &Context) -> Option<Value> {
    let input = resolved.clone().unwrap_or(Value::Null);
    let scope = context.with("data", input.clone()).with("value", input);
    match evaluate_value(expression, &scope) {
        Ok(transformed) => transformed,
        Err(e) => {
            log::warn!("Failed to transform binding with `{}`: {}", expression, e);
            resolved
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Context {
        let mut vars = Map::new();
        vars.insert(
            "profile".to_string(),
            json!({ "name": "Ann", "address": {}, "tags": ["a", "b"], "manager": null }),
        );
        vars.insert("users".to_string(), json!(["Ann", "Bo"]));
        Context::new(vars)
    }

    #[test]
    fn test_bare_source_binding() {
        let ctx = context();
        assert_eq!(resolve(&Binding::source("users"), &ctx), Some(json!(["Ann", "Bo"])));
        assert_eq!(resolve(&Binding::source("missing"), &ctx), None);
    }

    #[test]
    fn test_path_binding_resolves_nested_value() {
        let ctx = context();
        assert_eq!(resolve(&Binding::path("profile", "name"), &ctx), Some(json!("Ann")));
        assert_eq!(resolve(&Binding::path("profile", "tags.1"), &ctx), Some(json!("b")));
        // 旧形式のドット付き文字列
        assert_eq!(resolve(&Binding::source("profile.name"), &ctx), Some(json!("Ann")));
    }

    #[test]
    fn test_missing_segments_resolve_to_undefined() {
        let ctx = context();
        assert_eq!(resolve(&Binding::path("profile", "address.city"), &ctx), None);
        assert_eq!(resolve(&Binding::path("profile", "manager.name"), &ctx), None);
        assert_eq!(resolve(&Binding::path("profile", "name.first.letter"), &ctx), None);
        assert_eq!(resolve(&Binding::path("nobody", "address.city"), &ctx), None);
    }

    #[test]
    fn test_transform_is_applied_and_failures_keep_value() {
        let ctx = context();
        let counted = Binding::Path {
            source: "users".to_string(),
            path: None,
            transform: Some("length(data)".to_string()),
        };
        assert_eq!(resolve(&counted, &ctx), Some(json!(2)));

        let broken = Binding::Path {
            source: "users".to_string(),
            path: None,
            transform: Some("data +".to_string()),
        };
        assert_eq!(resolve(&broken, &ctx), Some(json!(["Ann", "Bo"])));
    }

    #[test]
    fn test_set_path_creates_intermediate_objects() {
        let mut value = json!({ "settings": { "theme": "light" } });
        set_path(&mut value, "settings.theme", json!("dark")).unwrap();
        set_path(&mut value, "settings.layout.columns", json!(3)).unwrap();
        set_path(&mut value, "items.0", json!("x")).unwrap();

        assert_eq!(value["settings"]["theme"], json!("dark"));
        assert_eq!(value["settings"]["layout"]["columns"], json!(3));
        assert_eq!(value["items"], json!({ "0": "x" }));

        let mut list = json!([1, 2]);
        set_path(&mut list, "0", json!(0)).unwrap();
        set_path(&mut list, "2", json!(3)).unwrap();
        assert_eq!(list, json!([0, 2, 3]));
    }

    #[test]
    fn test_set_path_rejects_indices_past_the_end() {
        let mut list = json!([1, 2]);
        assert!(matches!(
            set_path(&mut list, "4", json!(5)),
            Err(SourceError::IndexOutOfRange { index: 4, len: 2, .. })
        ));
        assert!(matches!(
            set_path(&mut list, "18446744073709551615", json!(5)),
            Err(SourceError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            set_path(&mut list, "100000000000.name", json!(5)),
            Err(SourceError::IndexOutOfRange { .. })
        ));
        assert_eq!(list, json!([1, 2]));

        let mut rows = json!({ "rows": [] });
        assert!(set_path(&mut rows, "rows.7", json!("x")).is_err());
        assert_eq!(rows, json!({ "rows": [] }));
    }
}
