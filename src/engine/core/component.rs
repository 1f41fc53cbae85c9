// src/engine/core/component.rs
// ノード1つ分のプロパティ解決

use serde_json::{Map, Value};

use super::utils::{merge_class_names, merge_styles};
use crate::engine::binding::resolve;
use crate::engine::context::Context;
use crate::engine::evaluator::is_truthy;
use crate::engine::registry::Renderable;
use crate::parser::ast::UIComponent;

/// dataBinding の値を公開するプロパティ名
pub const DATA_BINDING_PROPS: [&str; 2] = ["value", "data"];

/// リテラル props にバインディング・className・style を適用した最終プロパティ
pub fn resolve_props(component: &UIComponent, renderable: &Renderable, context: &Context) -> Map<String, Value> {
    let mut props = component.props.clone();

    // undefined に解決されたバインディングは同名のリテラルも消す
    for (name, binding) in &component.bindings {
        match resolve(binding, context) {
            Some(value) => {
                props.insert(name.clone(), value);
            }
            None => {
                props.remove(name);
            }
        }
    }

    if let Some(binding) = &component.data_binding {
        if let Some(value) = resolve(binding, context) {
            for name in DATA_BINDING_PROPS {
                props.insert(name.to_string(), value.clone());
            }
        }
    }

    let class_name = merge_class_names([
        renderable.default_class_name.as_deref(),
        props.get("className").and_then(Value::as_str),
        component.class_name.as_deref(),
    ]);
    match class_name {
        Some(class_name) => {
            props.insert("className".to_string(), Value::String(class_name));
        }
        None => {
            props.remove("className");
        }
    }

    let style = merge_styles([
        Some(&renderable.default_style),
        props.get("style").and_then(Value::as_object),
        component.style.as_ref(),
    ]);
    if let Some(style) = style {
        props.insert("style".to_string(), Value::Object(style));
    }

    props
}

/// 軽量な表示ゲート（condition バインディング）を通過するか
pub fn passes_gate(component: &UIComponent, context: &Context) -> bool {
    match &component.condition {
        Some(binding) => is_truthy(resolve(binding, context).as_ref()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Binding;
    use serde_json::json;

    fn context() -> Context {
        let mut vars = Map::new();
        vars.insert("profile".to_string(), json!({ "name": "Ann", "address": {} }));
        vars.insert("visible".to_string(), json!(false));
        Context::new(vars)
    }

    #[test]
    fn test_bindings_override_literal_props() {
        let mut node = UIComponent::new("name", "Input");
        node.props.insert("label".to_string(), json!("Name"));
        node.props.insert("value".to_string(), json!("placeholder"));
        node.props.insert("city".to_string(), json!("Unknown"));
        node.bindings.insert("value".to_string(), Binding::path("profile", "name"));
        node.bindings.insert("city".to_string(), Binding::path("profile", "address.city"));

        let props = resolve_props(&node, &Renderable::widget("Input"), &context());
        assert_eq!(props.get("label"), Some(&json!("Name")));
        assert_eq!(props.get("value"), Some(&json!("Ann")));
        assert!(props.get("city").is_none());
    }

    #[test]
    fn test_data_binding_sets_value_and_data() {
        let mut node = UIComponent::new("title", "Text");
        node.data_binding = Some(Binding::source("profile.name"));
        let props = resolve_props(&node, &Renderable::widget("Text"), &context());
        assert_eq!(props.get("value"), Some(&json!("Ann")));
        assert_eq!(props.get("data"), Some(&json!("Ann")));

        node.data_binding = Some(Binding::source("missing"));
        let props = resolve_props(&node, &Renderable::widget("Text"), &context());
        assert!(props.get("value").is_none());
    }

    #[test]
    fn test_class_and_style_merge_order() {
        let mut node = UIComponent::new("card", "Card");
        node.props.insert("className".to_string(), json!("shadow"));
        node.props.insert("style".to_string(), json!({ "padding": 8, "color": "blue" }));
        node.class_name = Some("wide".to_string());
        node.style = json!({ "color": "red" }).as_object().cloned();

        let renderable = Renderable::widget("Card")
            .with_class_name("card")
            .with_style(json!({ "padding": 4, "border": "1px" }).as_object().cloned().unwrap());
        let props = resolve_props(&node, &renderable, &context());

        assert_eq!(props.get("className"), Some(&json!("card shadow wide")));
        assert_eq!(
            props.get("style"),
            Some(&json!({ "padding": 8, "border": "1px", "color": "red" }))
        );
    }

    #[test]
    fn test_gate() {
        let mut node = UIComponent::new("banner", "Alert");
        assert!(passes_gate(&node, &context()));
        node.condition = Some(Binding::source("visible"));
        assert!(!passes_gate(&node, &context()));
        node.condition = Some(Binding::path("profile", "name"));
        assert!(passes_gate(&node, &context()));
    }
}
