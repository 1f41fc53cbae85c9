// src/engine/core/flow.rs
// 制御フロー（ループ・条件分岐）の描画

use serde_json::{Map, Value};

use super::component::passes_gate;
use super::render::{RenderNode, Renderer};
use super::utils::iteration_key;
use crate::engine::binding::resolve;
use crate::engine::context::Context;
use crate::engine::evaluator::evaluate_condition;
use crate::parser::ast::{Branch, BranchItem, Conditional, LoopSpec, UIComponent};

/// 条件式を評価して描画する分岐を選ぶ（該当する分岐が無ければ None）
pub fn select_branch<'a>(conditional: &'a Conditional, context: &Context) -> Option<&'a Branch> {
    if evaluate_condition(&conditional.condition, context) {
        conditional.then_branch.as_ref()
    } else {
        conditional.else_branch.as_ref()
    }
}

impl Renderer<'_> {
    /// ループ: 要素ごとに itemVar / indexVar のレイヤーを積んで子を描画する。
    /// condition / conditional は各イテレーションのスコープで評価する
    pub(super) fn render_loop(
        &self,
        component: &UIComponent,
        loop_spec: &LoopSpec,
        context: &Context,
        depth: usize,
        out: &mut Vec<RenderNode>,
    ) {
        let items = match resolve(&loop_spec.source, context) {
            Some(Value::Array(items)) => items,
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                log::warn!(
                    "Loop source of '{}' is not a list (got {}), rendering nothing",
                    component.id,
                    type_name(&other)
                );
                Vec::new()
            }
        };

        for (index, item) in items.into_iter().enumerate() {
            let mut vars = Map::new();
            vars.insert(loop_spec.item_var.clone(), item);
            if let Some(index_var) = &loop_spec.index_var {
                vars.insert(index_var.clone(), Value::from(index));
            }
            let scope = context.child(vars);

            if !passes_gate(component, &scope) {
                continue;
            }

            let children = match &component.conditional {
                Some(conditional) => match select_branch(conditional, &scope) {
                    Some(branch) => {
                        let mut children = Vec::new();
                        self.render_branch(branch, &scope, depth + 1, &mut children);
                        children
                    }
                    None => continue,
                },
                None => self.render_children(component, &scope, depth + 1),
            };

            out.push(RenderNode::Fragment {
                key: iteration_key(component, index),
                children,
            });
        }
    }

    /// 分岐の中身を描画: 文字列はテキスト、ノードは再帰、列は順番に
    pub(super) fn render_branch(&self, branch: &Branch, context: &Context, depth: usize, out: &mut Vec<RenderNode>) {
        match branch {
            Branch::Text(text) => out.push(RenderNode::Text(text.clone())),
            Branch::Node(node) => self.render_component(node, 0, context, depth, out),
            Branch::Sequence(items) => {
                for (index, item) in items.iter().enumerate() {
                    match item {
                        BranchItem::Text(text) => out.push(RenderNode::Text(text.clone())),
                        BranchItem::Node(node) => self.render_component(node, index, context, depth, out),
                    }
                }
            }
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::core::render::{find_by_key, text_content};
    use crate::engine::registry::MapRegistry;
    use crate::parser::ast::{Binding, ChildContent};
    use serde_json::json;

    fn todos() -> Context {
        let mut vars = Map::new();
        vars.insert(
            "todos".to_string(),
            json!([
                { "id": 1, "title": "docs", "done": true },
                { "id": 2, "title": "tests", "done": false },
                { "id": 3, "title": "ship", "done": false }
            ]),
        );
        vars.insert("label".to_string(), json!("outer"));
        Context::new(vars)
    }

    fn todo_list() -> UIComponent {
        let mut list = UIComponent::new("todos", "List");
        list.loop_spec = Some(LoopSpec {
            source: Binding::source("todos"),
            item_var: "todo".to_string(),
            index_var: None,
        });
        let mut title = UIComponent::new("title", "Text");
        title.data_binding = Some(Binding::path("todo", "title"));
        list.children = Some(ChildContent::Nodes(vec![title]));
        list
    }

    #[test]
    fn test_gate_is_evaluated_per_iteration() {
        let registry = MapRegistry::with_builtin();
        let mut list = todo_list();
        list.condition = Some(Binding::path("todo", "done"));

        let tree = Renderer::new(&registry).render(&[list], &todos());
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].key(), Some("todos-0"));
    }

    #[test]
    fn test_conditional_inside_loop_uses_iteration_scope() {
        let registry = MapRegistry::with_builtin();
        let mut list = todo_list();
        list.conditional = Some(Conditional {
            condition: "todo.done".to_string(),
            then_branch: Some(Branch::Text("✓".to_string())),
            else_branch: Some(Branch::Sequence(vec![
                BranchItem::Text("todo: ".to_string()),
                BranchItem::Node({
                    let mut title = UIComponent::new("pending", "Text");
                    title.data_binding = Some(Binding::path("todo", "title"));
                    title
                }),
            ])),
        });

        let tree = Renderer::new(&registry).render(&[list], &todos());
        let keys: Vec<&str> = tree.iter().filter_map(RenderNode::key).collect();
        assert_eq!(keys, vec!["todos-0", "todos-1", "todos-2"]);
        assert_eq!(text_content(&tree), "✓todo: todo: ");
        assert_eq!(
            find_by_key(&tree, "todos-2/pending").and_then(|e| e.prop("value")),
            Some(&json!("ship"))
        );
    }

    #[test]
    fn test_loop_variable_shadows_only_inside_iteration() {
        let registry = MapRegistry::with_builtin();
        let mut list = UIComponent::new("labels", "List");
        list.loop_spec = Some(LoopSpec {
            source: Binding::source("todos"),
            item_var: "label".to_string(),
            index_var: None,
        });
        let mut inner = UIComponent::new("inner", "Text");
        inner.data_binding = Some(Binding::path("label", "id"));
        list.children = Some(ChildContent::Nodes(vec![inner]));
        let mut after = UIComponent::new("after", "Text");
        after.data_binding = Some(Binding::source("label"));

        let tree = Renderer::new(&registry).render(&[list, after], &todos());
        assert_eq!(find_by_key(&tree, "labels-1/inner").and_then(|e| e.prop("value")), Some(&json!(2)));
        assert_eq!(find_by_key(&tree, "after").and_then(|e| e.prop("value")), Some(&json!("outer")));
    }

    #[test]
    fn test_non_list_source_renders_nothing() {
        let registry = MapRegistry::with_builtin();
        let mut list = todo_list();
        list.loop_spec = Some(LoopSpec {
            source: Binding::source("label"),
            item_var: "todo".to_string(),
            index_var: None,
        });
        assert!(Renderer::new(&registry).render(&[list], &todos()).is_empty());
    }
}
