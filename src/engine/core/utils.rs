// src/engine/core/utils.rs
// ユーティリティ関数

use serde_json::{Map, Value};

use crate::parser::ast::UIComponent;

/// 兄弟間で一意なキー（id が空なら位置から生成）
#[inline]
pub fn node_key(component: &UIComponent, index: usize) -> String {
    if component.id.is_empty() {
        format!("child-{}", index)
    } else {
        component.id.clone()
    }
}

/// ループ1回分のキー
#[inline]
pub fn iteration_key(component: &UIComponent, index: usize) -> String {
    format!("{}-{}", component.id, index)
}

/// 空でないクラス名をスペース区切りで連結
pub fn merge_class_names<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> Option<String> {
    let joined = parts
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() { None } else { Some(joined) }
}

/// スタイルの浅いマージ（後に渡したものが優先）
pub fn merge_styles<'a>(layers: impl IntoIterator<Item = Option<&'a Map<String, Value>>>) -> Option<Map<String, Value>> {
    let mut merged = Map::new();
    for layer in layers.into_iter().flatten() {
        for (name, value) in layer {
            merged.insert(name.clone(), value.clone());
        }
    }
    if merged.is_empty() { None } else { Some(merged) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys() {
        let named = UIComponent::new("list", "List");
        let anonymous = UIComponent::new("", "Text");
        assert_eq!(node_key(&named, 3), "list");
        assert_eq!(node_key(&anonymous, 3), "child-3");
        assert_eq!(iteration_key(&named, 1), "list-1");
    }

    #[test]
    fn test_merge_class_names_and_styles() {
        assert_eq!(
            merge_class_names([Some("btn"), None, Some(" "), Some("btn-primary wide")]),
            Some("btn btn-primary wide".to_string())
        );
        assert_eq!(merge_class_names([None, Some("")]), None);

        let base = json!({ "color": "black", "margin": 0 });
        let node = json!({ "color": "red" });
        let merged = merge_styles([base.as_object(), None, node.as_object()]).unwrap();
        assert_eq!(Value::Object(merged), json!({ "color": "red", "margin": 0 }));
    }
}
