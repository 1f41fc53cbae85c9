// ========================================
// 描画コンテキスト
// ========================================
//
// 不変レイヤーを親ポインタで連結したスコープチェーン。
// ルートレイヤーはデータソース全体のスナップショット、
// ループの各イテレーションは itemVar / indexVar だけを持つ小さなレイヤーを積む。

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

struct Layer {
    vars: Map<String, Value>,
    parent: Option<Arc<Layer>>,
}

#[derive(Clone)]
pub struct Context {
    layer: Arc<Layer>,
}

impl Context {
    /// ルートレイヤーからコンテキストを作成
    pub fn new(root: Map<String, Value>) -> Self {
        Self {
            layer: Arc::new(Layer {
                vars: root,
                parent: None,
            }),
        }
    }

    pub fn empty() -> Self {
        Self::new(Map::new())
    }

    /// 最も内側のレイヤーから順に検索
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut layer: &Layer = &self.layer;
        loop {
            if let Some(value) = layer.vars.get(name) {
                return Some(value);
            }
            layer = layer.parent.as_deref()?;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 新しいレイヤーを積んだ子コンテキストを返す（自身は変更しない）
    pub fn child(&self, vars: Map<String, Value>) -> Context {
        Context {
            layer: Arc::new(Layer {
                vars,
                parent: Some(Arc::clone(&self.layer)),
            }),
        }
    }

    /// 変数1つだけのレイヤーを積む
    pub fn with(&self, name: impl Into<String>, value: Value) -> Context {
        let mut vars = Map::new();
        vars.insert(name.into(), value);
        self.child(vars)
    }

    /// レイヤー数（ルートを含む）
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut layer: &Layer = &self.layer;
        while let Some(parent) = layer.parent.as_deref() {
            depth += 1;
            layer = parent;
        }
        depth
    }

    /// 全レイヤーを内側優先でマージした平坦なマップ
    pub fn flatten(&self) -> Map<String, Value> {
        self.merge_layers(true)
    }

    /// ルート以外のレイヤー（ループ変数等）だけをマージしたマップ
    pub fn locals(&self) -> Map<String, Value> {
        self.merge_layers(false)
    }

    /// ローカルレイヤーを別のルートの上に載せ替える
    pub fn rebase(&self, root: &Context) -> Context {
        let locals = self.locals();
        if locals.is_empty() {
            return root.clone();
        }
        root.child(locals)
    }

    fn merge_layers(&self, include_root: bool) -> Map<String, Value> {
        let mut chain: Vec<&Layer> = Vec::with_capacity(self.depth());
        let mut layer: &Layer = &self.layer;
        loop {
            match layer.parent.as_deref() {
                Some(parent) => {
                    chain.push(layer);
                    layer = parent;
                }
                None => {
                    if include_root {
                        chain.push(layer);
                    }
                    break;
                }
            }
        }

        let mut merged = Map::new();
        for layer in chain.into_iter().rev() {
            for (name, value) in &layer.vars {
                merged.insert(name.clone(), value.clone());
            }
        }
        merged
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.layer, &other.layer) || self.flatten() == other.flatten()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("depth", &self.depth())
            .field("vars", &self.flatten())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root() -> Context {
        let mut vars = Map::new();
        vars.insert("users".to_string(), json!(["Ann", "Bo"]));
        vars.insert("title".to_string(), json!("Team"));
        Context::new(vars)
    }

    #[test]
    fn test_inner_layer_shadows_outer() {
        let base = root();
        let scoped = base.with("title", json!("Inner")).with("u", json!("Ann"));

        assert_eq!(scoped.get("title"), Some(&json!("Inner")));
        assert_eq!(scoped.get("u"), Some(&json!("Ann")));
        assert_eq!(scoped.get("users"), Some(&json!(["Ann", "Bo"])));
        // 親は変更されない
        assert_eq!(base.get("title"), Some(&json!("Team")));
        assert!(base.get("u").is_none());
        assert_eq!(scoped.depth(), 3);
    }

    #[test]
    fn test_locals_and_rebase() {
        let scoped = root().with("u", json!("Bo")).with("i", json!(1));
        let locals = scoped.locals();
        assert_eq!(locals.len(), 2);
        assert_eq!(locals.get("u"), Some(&json!("Bo")));

        let mut fresh_vars = Map::new();
        fresh_vars.insert("users".to_string(), json!(["Cy"]));
        let rebased = scoped.rebase(&Context::new(fresh_vars));

        assert_eq!(rebased.get("users"), Some(&json!(["Cy"])));
        assert_eq!(rebased.get("u"), Some(&json!("Bo")));
        assert!(rebased.get("title").is_none());
    }

    #[test]
    fn test_structural_equality() {
        let a = root().with("x", json!(1));
        let b = root().with("x", json!(1));
        assert_eq!(a, b);
        assert_ne!(a, root().with("x", json!(2)));
    }
}
