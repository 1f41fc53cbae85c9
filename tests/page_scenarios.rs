use jsonui::analysis::analyze_schema;
use jsonui::analysis::error::DiagnosticLevel;
use jsonui::engine::action::LoggingActionHandler;
use jsonui::engine::binding::resolve;
use jsonui::engine::context::Context;
use jsonui::engine::core::{RenderNode, elements, find_by_key, text_content};
use jsonui::engine::data_source::DataSourceManager;
use jsonui::engine::fetch::{FetchFuture, Fetcher};
use jsonui::engine::store::{KeyValueStore, MemoryStore};
use jsonui::parser::ast::Binding;
use jsonui::{FetchError, MapRegistry, Page, PageSchema};
use serde_json::{Value, json};
use std::sync::Arc;

fn schema(value: Value) -> PageSchema {
    serde_json::from_value(value).unwrap()
}

fn values_of_type<'a>(tree: &'a [RenderNode], component_type: &str) -> Vec<&'a Value> {
    elements(tree)
        .into_iter()
        .filter(|e| e.component_type == component_type)
        .filter_map(|e| e.prop("value"))
        .collect()
}

#[test]
fn loop_over_static_names_renders_in_order() {
    let page = Page::new(
        schema(json!({
            "dataSources": { "users": { "type": "static", "defaultValue": ["Ann", "Bo"] } },
            "components": [{
                "id": "list",
                "type": "List",
                "loop": { "source": "users", "itemVar": "u" },
                "children": [{ "id": "item", "type": "Text", "dataBinding": "u" }]
            }]
        })),
        MapRegistry::with_builtin(),
    );

    let tree = page.render();
    let keys: Vec<_> = tree.iter().filter_map(RenderNode::key).collect();
    assert_eq!(keys, vec!["list-0", "list-1"]);
    assert_eq!(values_of_type(&tree, "Text"), vec![&json!("Ann"), &json!("Bo")]);
    assert_eq!(find_by_key(&tree, "list-1/item").and_then(|e| e.prop("data")), Some(&json!("Bo")));
}

#[test]
fn empty_loop_renders_nothing() {
    let page = Page::new(
        schema(json!({
            "dataSources": { "users": { "type": "static", "defaultValue": [] } },
            "components": [{
                "id": "list",
                "type": "List",
                "loop": { "source": "users", "itemVar": "u" },
                "children": [{ "id": "item", "type": "Text", "dataBinding": "u" }]
            }]
        })),
        MapRegistry::with_builtin(),
    );
    assert!(page.render().is_empty());
}

#[test]
fn missing_nested_path_is_undefined() {
    let mut root = serde_json::Map::new();
    root.insert("profile".to_string(), json!({ "address": {} }));
    let context = Context::new(root);
    assert_eq!(resolve(&Binding::path("profile", "address.city"), &context), None);

    let page = Page::new(
        schema(json!({
            "dataSources": { "profile": { "type": "static", "defaultValue": { "address": {} } } },
            "components": [{
                "id": "city",
                "type": "Text",
                "props": { "label": "placeholder" },
                "bindings": { "label": { "source": "profile", "path": "address.city" } },
                "dataBinding": { "source": "profile", "path": "address.city" }
            }]
        })),
        MapRegistry::with_builtin(),
    );
    let tree = page.render();
    let city = find_by_key(&tree, "city").unwrap();
    assert_eq!(city.prop("label"), None);
    assert_eq!(city.prop("value"), None);
}

#[test]
fn conditional_branches() {
    let page = Page::new(
        schema(json!({
            "dataSources": { "user": { "type": "static", "defaultValue": { "admin": false } } },
            "components": [
                { "id": "a", "type": "div", "conditional": { "if": "user.admin", "then": "admin", "else": "guest" } },
                { "id": "b", "type": "div", "conditional": { "if": "user.admin", "then": "only admin" } },
                { "id": "c", "type": "div", "conditional": { "if": "!user.admin", "else": "never" } }
            ]
        })),
        MapRegistry::with_builtin(),
    );
    let tree = page.render();
    assert_eq!(text_content(&tree), "guest");
}

#[test]
fn rendering_is_deterministic() {
    let value = json!({
        "dataSources": {
            "todos": { "type": "static", "defaultValue": [{ "title": "a", "done": true }, { "title": "b", "done": false }] }
        },
        "components": [{
            "id": "todos",
            "type": "List",
            "loop": { "source": "todos", "itemVar": "todo", "indexVar": "i" },
            "className": "rows",
            "children": [{
                "id": "row",
                "type": "Checkbox",
                "bindings": { "checked": "todo.done", "label": "todo.title" },
                "events": { "onChange": "toggleTodo" }
            }]
        }]
    });
    let first = Page::new(schema(value.clone()), MapRegistry::with_builtin());
    let second = Page::new(schema(value), MapRegistry::with_builtin());

    let tree = first.render();
    assert_eq!(tree, first.render());
    assert_eq!(tree, second.render());
    assert_eq!(
        serde_json::to_value(&tree).unwrap(),
        serde_json::to_value(second.render()).unwrap()
    );
}

#[test]
fn dispatch_updates_sources_and_rerender_reflects_them() {
    let store = Arc::new(MemoryStore::new());
    let page = Page::with_builder(
        schema(json!({
            "dataSources": {
                "todos": { "type": "persistent", "key": "todos", "defaultValue": [] },
                "locked": { "type": "static", "defaultValue": false }
            },
            "components": [{
                "id": "add",
                "type": "Button",
                "events": [{
                    "event": "click",
                    "condition": "!locked",
                    "actions": [
                        { "id": "append", "type": "create", "target": "todos", "expression": "event" },
                        { "id": "toast", "type": "show-toast", "message": "Added" }
                    ]
                }]
            }, {
                "id": "list",
                "type": "List",
                "loop": { "source": "todos", "itemVar": "todo" },
                "children": [{
                    "id": "remove",
                    "type": "Button",
                    "dataBinding": "todo.title",
                    "events": [{
                        "event": "click",
                        "actions": [{ "id": "drop", "type": "delete", "target": "todos", "path": "id", "expression": "todo.id" }]
                    }]
                }]
            }]
        })),
        MapRegistry::with_builtin(),
        DataSourceManager::builder().store(store.clone()),
        Arc::new(LoggingActionHandler),
    );

    let tree = page.render();
    let dispatches = page.dispatch(&tree, "add", "onClick", json!({ "id": 1, "title": "write docs" }));
    assert_eq!(dispatches.len(), 1);
    assert!(dispatches[0].is_executed());
    page.dispatch(&tree, "add", "click", json!({ "id": 2, "title": "ship" }));

    let tree = page.render();
    assert_eq!(values_of_type(&tree, "Button"), vec![&json!("write docs"), &json!("ship")]);
    assert_eq!(store.get("todos").unwrap().map(|v| v.as_array().map(Vec::len)), Some(Some(2)));

    // ループ内のハンドラは描画時のスコープ (todo) を保持している
    page.dispatch(&tree, "list-0/remove", "click", Value::Null);
    let tree = page.render();
    assert_eq!(values_of_type(&tree, "Button"), vec![&json!("ship")]);

    // condition が偽なら実行されない
    page.sources().set("locked", json!(true)).unwrap();
    let dispatches = page.dispatch(&tree, "add", "click", json!({ "id": 3, "title": "never" }));
    assert!(!dispatches[0].is_executed());
    assert_eq!(page.sources().get("todos").and_then(|v| v.as_array().map(Vec::len)), Some(1));
}

#[tokio::test]
async fn remote_failure_keeps_default_and_reports_status() {
    let fetcher: Arc<dyn Fetcher> =
        Arc::new(|_: &str| -> FetchFuture { Box::pin(async { Err(FetchError::Network("connection refused".into())) }) });
    let page = Page::with_builder(
        schema(json!({
            "dataSources": {
                "users": { "type": "remote", "url": "https://example.invalid/users", "defaultValue": ["cached"] }
            },
            "components": [{
                "id": "status",
                "type": "Alert",
                "conditional": {
                    "if": "$status.users.error != null",
                    "then": { "id": "failed", "type": "Text", "children": "Could not load users" },
                    "else": {
                        "id": "rows",
                        "type": "List",
                        "loop": { "source": "users", "itemVar": "u" },
                        "children": [{ "id": "row", "type": "Text", "dataBinding": "u" }]
                    }
                }
            }]
        })),
        MapRegistry::with_builtin(),
        DataSourceManager::builder().fetcher(fetcher),
        Arc::new(LoggingActionHandler),
    );

    let handles = page.start();
    assert!(page.sources().loading("users"));
    let tree = page.render();
    assert_eq!(values_of_type(&tree, "Text"), vec![&json!("cached")]);

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(!page.sources().loading("users"));
    assert_eq!(page.sources().get("users"), Some(json!(["cached"])));
    assert_eq!(page.sources().error("users"), Some(FetchError::Network("connection refused".into())));

    let tree = page.render();
    assert_eq!(text_content(&tree), "Could not load users");
}

#[test]
fn analysis_reports_schema_problems() {
    let page = schema(json!({
        "dataSources": {
            "items": { "type": "static", "defaultValue": [] },
            "count": { "type": "computed", "expression": "items.length" }
        },
        "components": [{
            "id": "list",
            "type": "List",
            "loop": { "source": "items", "itemVar": "item" },
            "children": [{ "id": "label", "type": "Text", "dataBinding": "item" }]
        }, {
            "id": "reset",
            "type": "Button",
            "events": [{ "event": "click", "actions": [{ "id": "zero", "type": "set-value", "target": "count", "value": 0 }] }]
        }, {
            "id": "ghost",
            "type": "Hologram"
        }]
    }));

    let result = analyze_schema(&page, &MapRegistry::with_builtin());
    assert!(result.has_errors());
    assert_eq!(result.count(DiagnosticLevel::Error), 2);
    assert_eq!(result.count(DiagnosticLevel::Warning), 0);
}
