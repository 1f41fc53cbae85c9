// ========================================
// コンポーネントレジストリ
// ========================================
//
// type 文字列から描画実装を引く。見つからない場合は None を返すだけで例外にはしない。

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderableKind {
    /// HTML相当の素の要素
    Primitive,
    /// ホストが提供するウィジェット
    Widget,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Deprecation {
    pub replaced_by: Option<String>,
    pub message: Option<String>,
}

/// レジストリに登録された描画実装の記述
#[derive(Debug, Clone, PartialEq)]
pub struct Renderable {
    pub name: String,
    pub kind: RenderableKind,
    pub default_class_name: Option<String>,
    pub default_style: Map<String, Value>,
    pub deprecated: Option<Deprecation>,
}

impl Renderable {
    pub fn primitive(name: impl Into<String>) -> Self {
        Self::new(name, RenderableKind::Primitive)
    }

    pub fn widget(name: impl Into<String>) -> Self {
        Self::new(name, RenderableKind::Widget)
    }

    fn new(name: impl Into<String>, kind: RenderableKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default_class_name: None,
            default_style: Map::new(),
            deprecated: None,
        }
    }

    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.default_class_name = Some(class_name.into());
        self
    }

    pub fn with_style(mut self, style: Map<String, Value>) -> Self {
        self.default_style = style;
        self
    }

    pub fn deprecated(mut self, replaced_by: Option<&str>, message: Option<&str>) -> Self {
        self.deprecated = Some(Deprecation {
            replaced_by: replaced_by.map(str::to_string),
            message: message.map(str::to_string),
        });
        self
    }
}

/// ホストが実装するレジストリ。同期的かつ副作用なしで引けること
pub trait ComponentRegistry: Send + Sync {
    fn lookup(&self, component_type: &str) -> Option<&Renderable>;
}

const PRIMITIVES: &[&str] = &[
    "div", "section", "article", "aside", "header", "footer", "nav", "main", "span", "p", "h1", "h2",
    "h3", "h4", "h5", "h6", "ul", "ol", "li", "form", "label", "img", "a", "button", "input",
    "textarea", "select", "option", "table", "thead", "tbody", "tr", "th", "td", "pre", "code",
];

const WIDGETS: &[&str] = &[
    "Alert", "Avatar", "Badge", "Breadcrumb", "Button", "Card", "CardContent", "CardDescription",
    "CardFooter", "CardHeader", "CardTitle", "Checkbox", "Container", "DataTable", "Dialog", "Divider",
    "Flex", "Grid", "Heading", "Icon", "Input", "Label", "Link", "List", "Progress", "RadioGroup",
    "Select", "Separator", "Skeleton", "Slider", "Stack", "Switch", "Table", "Tabs", "Text",
    "Textarea", "Tooltip",
];

/// HashMapベースの標準レジストリ
#[derive(Debug, Clone, Default)]
pub struct MapRegistry {
    entries: HashMap<String, Renderable>,
}

impl MapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// HTMLプリミティブと標準ウィジェットを登録済みのレジストリ
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for name in PRIMITIVES {
            registry.register(Renderable::primitive(*name));
        }
        for name in WIDGETS {
            registry.register(Renderable::widget(*name));
        }
        registry
    }

    /// 同名の登録があれば置き換える
    pub fn register(&mut self, renderable: Renderable) {
        self.entries.insert(renderable.name.clone(), renderable);
    }

    /// 登録名の一覧（ソート済み）
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ComponentRegistry for MapRegistry {
    fn lookup(&self, component_type: &str) -> Option<&Renderable> {
        let renderable = self.entries.get(component_type)?;
        if let Some(deprecation) = &renderable.deprecated {
            log::warn!(
                "Component '{}' is deprecated{}{}",
                component_type,
                deprecation
                    .replaced_by
                    .as_deref()
                    .map(|r| format!(", use '{}' instead", r))
                    .unwrap_or_default(),
                deprecation
                    .message
                    .as_deref()
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            );
        }
        Some(renderable)
    }
}
