// ========================================
// JSON UI スキーマ AST定義
// ========================================

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::parser::utils::normalize_event_name;

// ========================================
// ページ全体の構造
// ========================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSchema {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// 宣言順を保持したデータソース一覧
    #[serde(
        default,
        deserialize_with = "deserialize_data_sources",
        serialize_with = "serialize_data_sources"
    )]
    pub data_sources: Vec<(String, DataSourceConfig)>,
    #[serde(default)]
    pub components: Vec<UIComponent>,
}

impl PageSchema {
    pub fn data_source(&self, id: &str) -> Option<&DataSourceConfig> {
        self.data_sources
            .iter()
            .find(|(source_id, _)| source_id == id)
            .map(|(_, config)| config)
    }
}

// ========================================
// データソース
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    Static,
    #[serde(alias = "kv")]
    Persistent,
    #[serde(alias = "api")]
    Remote,
    Computed,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    /// 配列形式で宣言された場合のみ使用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: DataSourceKind,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub transform: Option<String>,
    #[serde(default, alias = "compute")]
    pub expression: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub default_value: Option<Value>,
}

impl DataSourceConfig {
    pub fn new(kind: DataSourceKind) -> Self {
        Self {
            id: None,
            kind,
            key: None,
            url: None,
            transform: None,
            expression: None,
            dependencies: Vec::new(),
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DataSourcesRepr {
    // 宣言順のまま読む（computed は先行するソースを参照する）
    Map(IndexMap<String, DataSourceConfig>),
    List(Vec<DataSourceConfig>),
}

fn serialize_data_sources<S>(sources: &[(String, DataSourceConfig)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_map(sources.iter().map(|(id, config)| (id, config)))
}

fn deserialize_data_sources<'de, D>(deserializer: D) -> Result<Vec<(String, DataSourceConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    let repr = DataSourcesRepr::deserialize(deserializer)?;
    let sources = match repr {
        DataSourcesRepr::Map(map) => map.into_iter().collect(),
        DataSourcesRepr::List(list) => {
            let mut sources = Vec::with_capacity(list.len());
            for config in list {
                let id = config
                    .id
                    .clone()
                    .ok_or_else(|| serde::de::Error::custom("data source in list form needs an `id`"))?;
                sources.push((id, config));
            }
            sources
        }
    };
    Ok(sources)
}

// ========================================
// バインディング
// ========================================

/// データソース名そのもの、または `{source, path}` の参照
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Binding {
    Source(String),
    Path {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transform: Option<String>,
    },
}

impl Binding {
    pub fn source(name: impl Into<String>) -> Self {
        Binding::Source(name.into())
    }

    pub fn path(source: impl Into<String>, path: impl Into<String>) -> Self {
        Binding::Path {
            source: source.into(),
            path: Some(path.into()),
            transform: None,
        }
    }

    /// 参照先のルート名（"user.name" 形式なら先頭セグメント）
    pub fn root_name(&self) -> &str {
        match self {
            Binding::Source(name) => name.split('.').next().unwrap_or(name),
            Binding::Path { source, .. } => source,
        }
    }
}

// ========================================
// コンポーネントツリー
// ========================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UIComponent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_binding: Option<Binding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<ChildContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<Conditional>,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_spec: Option<LoopSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Binding>,
    #[serde(default, deserialize_with = "deserialize_events", skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventHandler>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<Map<String, Value>>,
}

impl UIComponent {
    pub fn new(id: impl Into<String>, component_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component_type: component_type.into(),
            props: Map::new(),
            bindings: BTreeMap::new(),
            data_binding: None,
            children: None,
            conditional: None,
            loop_spec: None,
            condition: None,
            events: Vec::new(),
            class_name: None,
            style: None,
        }
    }

    /// 子ノード（テキストの場合は空）
    pub fn child_nodes(&self) -> &[UIComponent] {
        match &self.children {
            Some(ChildContent::Nodes(nodes)) => nodes,
            _ => &[],
        }
    }
}

/// 子要素: テキストまたはノード列
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChildContent {
    Text(String),
    Nodes(Vec<UIComponent>),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Conditional {
    #[serde(rename = "if")]
    pub condition: String,
    #[serde(default, rename = "then", skip_serializing_if = "Option::is_none")]
    pub then_branch: Option<Branch>,
    #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
    pub else_branch: Option<Branch>,
}

/// 条件分岐の描画内容
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Branch {
    Text(String),
    Node(Box<UIComponent>),
    Sequence(Vec<BranchItem>),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BranchItem {
    Text(String),
    Node(UIComponent),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSpec {
    pub source: Binding,
    pub item_var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_var: Option<String>,
}

// ========================================
// イベントとアクション
// ========================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EventHandler {
    pub event: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    Navigate,
    ShowToast,
    OpenDialog,
    CloseDialog,
    SetValue,
    ToggleValue,
    Increment,
    Decrement,
    Custom,
    #[serde(other)]
    Unknown,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::Navigate => "navigate",
            ActionKind::ShowToast => "show-toast",
            ActionKind::OpenDialog => "open-dialog",
            ActionKind::CloseDialog => "close-dialog",
            ActionKind::SetValue => "set-value",
            ActionKind::ToggleValue => "toggle-value",
            ActionKind::Increment => "increment",
            ActionKind::Decrement => "decrement",
            ActionKind::Custom => "custom",
            ActionKind::Unknown => "unknown",
        }
    }

    /// データソースを書き換えるアクションかどうか
    pub fn mutates_source(&self) -> bool {
        matches!(
            self,
            ActionKind::Create
                | ActionKind::Update
                | ActionKind::Delete
                | ActionKind::SetValue
                | ActionKind::ToggleValue
                | ActionKind::Increment
                | ActionKind::Decrement
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastVariant {
    #[default]
    Success,
    Error,
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Action {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, alias = "compute", skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<ToastVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Action {
    pub fn new(id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            target: None,
            path: None,
            value: None,
            expression: None,
            message: None,
            variant: None,
            params: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

// ========================================
// 旧形式イベント定義の正規化
// ========================================

/// `{ "onClick": "save" }` や `{ "click": { "action": "save" } }` などの旧形式
#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyHandler {
    Name(String),
    Handler {
        actions: Vec<Action>,
        #[serde(default)]
        condition: Option<String>,
    },
    Single {
        action: String,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        params: Option<Value>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EventsRepr {
    List(Vec<EventHandler>),
    Map(BTreeMap<String, LegacyHandler>),
}

fn deserialize_events<'de, D>(deserializer: D) -> Result<Vec<EventHandler>, D::Error>
where
    D: Deserializer<'de>,
{
    let handlers = match EventsRepr::deserialize(deserializer)? {
        EventsRepr::List(list) => list
            .into_iter()
            .map(|mut handler| {
                handler.event = normalize_event_name(&handler.event);
                handler
            })
            .collect(),
        EventsRepr::Map(map) => map
            .into_iter()
            .map(|(name, legacy)| {
                let event = normalize_event_name(&name);
                match legacy {
                    LegacyHandler::Name(action_name) => EventHandler {
                        event,
                        actions: vec![Action::new(action_name, ActionKind::Custom)],
                        condition: None,
                    },
                    LegacyHandler::Handler { actions, condition } => EventHandler {
                        event,
                        actions,
                        condition,
                    },
                    LegacyHandler::Single {
                        action,
                        target,
                        params,
                    } => {
                        let mut custom = Action::new(action, ActionKind::Custom);
                        custom.target = target;
                        custom.params = params;
                        EventHandler {
                            event,
                            actions: vec![custom],
                            condition: None,
                        }
                    }
                }
            })
            .collect(),
    };
    Ok(handlers)
}

// ========================================
// 式（条件式・値式）
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    StrictEq,
    StrictNe,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Undefined,
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Array(Vec<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        op: LogicalOperator,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

impl Expr {
    /// 式が参照するルート識別子を収集する
    pub fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Ident(name) => out.push(name),
            Expr::Member { object, .. } => object.collect_identifiers(out),
            Expr::Index { object, index } => {
                object.collect_identifiers(out);
                index.collect_identifiers(out);
            }
            Expr::Array(items) => items.iter().for_each(|item| item.collect_identifiers(out)),
            Expr::Call { args, .. } => args.iter().for_each(|arg| arg.collect_identifiers(out)),
            Expr::Unary { operand, .. } => operand.collect_identifiers(out),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                left.collect_identifiers(out);
                right.collect_identifiers(out);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                test.collect_identifiers(out);
                consequent.collect_identifiers(out);
                alternate.collect_identifiers(out);
            }
            Expr::Literal(_) | Expr::Undefined => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_sources_map_and_list_forms() {
        let from_map: PageSchema = serde_json::from_value(json!({
            "dataSources": { "users": { "type": "static", "defaultValue": [] } },
            "components": []
        }))
        .unwrap();
        let from_list: PageSchema = serde_json::from_value(json!({
            "dataSources": [{ "id": "users", "type": "kv", "key": "app-users" }],
            "components": []
        }))
        .unwrap();

        assert_eq!(from_map.data_sources[0].0, "users");
        assert_eq!(from_map.data_sources[0].1.kind, DataSourceKind::Static);
        assert_eq!(from_list.data_sources[0].0, "users");
        assert_eq!(from_list.data_sources[0].1.kind, DataSourceKind::Persistent);
        assert_eq!(from_list.data_sources[0].1.key.as_deref(), Some("app-users"));
    }

    #[test]
    fn test_data_source_map_keeps_declaration_order() {
        let source = r#"{
            "dataSources": {
                "zitems": { "type": "static", "defaultValue": [1, 2, 3] },
                "ztotal": { "type": "computed", "expression": "length(zitems)" },
                "abig": { "type": "computed", "expression": "ztotal > 2" }
            }
        }"#;
        let from_str: PageSchema = serde_json::from_str(source).unwrap();
        let from_value: PageSchema = serde_json::from_value(serde_json::from_str(source).unwrap()).unwrap();

        for schema in [from_str, from_value] {
            let ids: Vec<&str> = schema.data_sources.iter().map(|(id, _)| id.as_str()).collect();
            assert_eq!(ids, vec!["zitems", "ztotal", "abig"]);
        }
    }

    #[test]
    fn test_children_and_branch_variants() {
        let node: UIComponent = serde_json::from_value(json!({
            "id": "root",
            "type": "div",
            "children": [
                { "id": "title", "type": "Text", "children": "Hello" }
            ],
            "conditional": {
                "if": "loggedIn",
                "then": { "id": "welcome", "type": "Text" },
                "else": ["Please log in", { "id": "login", "type": "Button" }]
            }
        }))
        .unwrap();

        assert_eq!(node.child_nodes().len(), 1);
        assert_eq!(
            node.child_nodes()[0].children,
            Some(ChildContent::Text("Hello".to_string()))
        );
        let conditional = node.conditional.unwrap();
        assert!(matches!(conditional.then_branch, Some(Branch::Node(_))));
        match conditional.else_branch {
            Some(Branch::Sequence(items)) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0], BranchItem::Text("Please log in".to_string()));
            }
            other => panic!("unexpected else branch: {:?}", other),
        }
    }

    #[test]
    fn test_binding_forms() {
        let bare: Binding = serde_json::from_value(json!("users")).unwrap();
        let pathed: Binding =
            serde_json::from_value(json!({ "source": "profile", "path": "address.city" })).unwrap();

        assert_eq!(bare, Binding::source("users"));
        assert_eq!(pathed, Binding::path("profile", "address.city"));
        assert_eq!(Binding::source("user.name").root_name(), "user");
    }

    #[test]
    fn test_legacy_event_map_is_normalized() {
        let node: UIComponent = serde_json::from_value(json!({
            "id": "save",
            "type": "Button",
            "events": {
                "onClick": "saveDraft",
                "change": { "actions": [{ "id": "a", "type": "set-value", "target": "name" }], "condition": "enabled" },
                "submit": { "action": "send", "target": "outbox" }
            }
        }))
        .unwrap();

        let names: Vec<&str> = node.events.iter().map(|h| h.event.as_str()).collect();
        assert_eq!(names, vec!["change", "click", "submit"]);

        let click = &node.events[1];
        assert_eq!(click.actions[0].kind, ActionKind::Custom);
        assert_eq!(click.actions[0].id, "saveDraft");

        let change = &node.events[0];
        assert_eq!(change.condition.as_deref(), Some("enabled"));
        assert_eq!(change.actions[0].kind, ActionKind::SetValue);

        let submit = &node.events[2];
        assert_eq!(submit.actions[0].target.as_deref(), Some("outbox"));
    }

    #[test]
    fn test_unknown_action_type_deserializes() {
        let action: Action = serde_json::from_value(json!({ "id": "x", "type": "launch-rocket" })).unwrap();
        assert_eq!(action.kind, ActionKind::Unknown);
    }
}
