// src/engine/core/render.rs
// スキーマツリーの解釈（ホスト非依存の描画ツリーを生成）

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Write as _;

use super::component::{passes_gate, resolve_props};
use super::event::{BoundEvent, bind_events};
use super::flow::select_branch;
use super::utils::node_key;
use crate::engine::context::Context;
use crate::engine::registry::{ComponentRegistry, RenderableKind};
use crate::parser::ast::{ChildContent, UIComponent};

pub const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// これより深いノードは描画しない
    pub max_depth: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

// ========================================
// 描画ツリー
// ========================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderNode {
    Element(ElementNode),
    Text(String),
    Fragment { key: String, children: Vec<RenderNode> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub key: String,
    pub id: String,
    #[serde(rename = "type")]
    pub component_type: String,
    pub kind: RenderableKind,
    pub props: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<BoundEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderNode>,
}

impl ElementNode {
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    /// 指定イベントに束縛されたハンドラ（宣言順）
    pub fn handlers<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a BoundEvent> + 'a {
        self.events.iter().filter(move |bound| bound.event == event)
    }
}

impl RenderNode {
    pub fn key(&self) -> Option<&str> {
        match self {
            RenderNode::Element(element) => Some(&element.key),
            RenderNode::Fragment { key, .. } => Some(key),
            RenderNode::Text(_) => None,
        }
    }

    pub fn children(&self) -> &[RenderNode] {
        match self {
            RenderNode::Element(element) => &element.children,
            RenderNode::Fragment { children, .. } => children,
            RenderNode::Text(_) => &[],
        }
    }

    pub fn as_element(&self) -> Option<&ElementNode> {
        match self {
            RenderNode::Element(element) => Some(element),
            _ => None,
        }
    }
}

/// キーで要素を探す。
/// "list-1/item" のように `/` で区切るとルートからのキーパスとして辿る
pub fn find_by_key<'a>(nodes: &'a [RenderNode], key: &str) -> Option<&'a ElementNode> {
    if key.contains('/') {
        let mut current = nodes;
        let mut found = None;
        for segment in key.split('/') {
            let node = current.iter().find(|n| n.key() == Some(segment))?;
            current = node.children();
            found = Some(node);
        }
        return found.and_then(RenderNode::as_element);
    }

    nodes.iter().find_map(|node| match node {
        RenderNode::Element(element) if element.key == key => Some(element),
        other => find_by_key(other.children(), key),
    })
}

/// 全要素を深さ優先で列挙
pub fn elements(nodes: &[RenderNode]) -> Vec<&ElementNode> {
    let mut out = Vec::new();
    collect_elements(nodes, &mut out);
    out
}

fn collect_elements<'a>(nodes: &'a [RenderNode], out: &mut Vec<&'a ElementNode>) {
    for node in nodes {
        if let RenderNode::Element(element) = node {
            out.push(element);
        }
        collect_elements(node.children(), out);
    }
}

/// テキストノードを出現順に連結
pub fn text_content(nodes: &[RenderNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            RenderNode::Text(text) => out.push_str(text),
            other => out.push_str(&text_content(other.children())),
        }
    }
    out
}

/// インデント付きのツリー表示（CLI用）
pub fn outline(nodes: &[RenderNode]) -> String {
    let mut out = String::new();
    write_outline(nodes, 0, &mut out);
    out
}

fn write_outline(nodes: &[RenderNode], depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for node in nodes {
        match node {
            RenderNode::Element(element) => {
                let _ = write!(out, "{}<{} key=\"{}\"", indent, element.component_type, element.key);
                if !element.props.is_empty() {
                    let _ = write!(out, " {}", Value::Object(element.props.clone()));
                }
                for bound in &element.events {
                    let _ = write!(out, " {}", bound.prop_name);
                }
                out.push_str(">\n");
            }
            RenderNode::Text(text) => {
                let _ = writeln!(out, "{}{:?}", indent, text);
            }
            RenderNode::Fragment { key, .. } => {
                let _ = writeln!(out, "{}[{}]", indent, key);
            }
        }
        write_outline(node.children(), depth + 1, out);
    }
}

// ========================================
// レンダラー
// ========================================

/// スキーマを描画ツリーに変換する。同じ入力なら常に同じ出力（副作用なし）
pub struct Renderer<'r> {
    registry: &'r dyn ComponentRegistry,
    options: RenderOptions,
}

impl<'r> Renderer<'r> {
    pub fn new(registry: &'r dyn ComponentRegistry) -> Self {
        Self::with_options(registry, RenderOptions::default())
    }

    pub fn with_options(registry: &'r dyn ComponentRegistry, options: RenderOptions) -> Self {
        Self { registry, options }
    }

    /// トップレベルのノード列を1つのスナップショットに対して描画
    pub fn render(&self, components: &[UIComponent], context: &Context) -> Vec<RenderNode> {
        self.render_nodes(components, context, 0)
    }

    pub(super) fn render_nodes(&self, nodes: &[UIComponent], context: &Context, depth: usize) -> Vec<RenderNode> {
        let mut out = Vec::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            self.render_component(node, index, context, depth, &mut out);
        }
        out
    }

    /// ノード1つを描画して out に追加する（何も描画しない場合もある）
    pub(super) fn render_component(
        &self,
        component: &UIComponent,
        index: usize,
        context: &Context,
        depth: usize,
        out: &mut Vec<RenderNode>,
    ) {
        if depth >= self.options.max_depth {
            log::error!(
                "Render depth limit {} reached at '{}' ({}), subtree skipped",
                self.options.max_depth,
                component.id,
                component.component_type
            );
            return;
        }

        if let Some(loop_spec) = &component.loop_spec {
            self.render_loop(component, loop_spec, context, depth, out);
            return;
        }

        if !passes_gate(component, context) {
            return;
        }

        if let Some(conditional) = &component.conditional {
            if let Some(branch) = select_branch(conditional, context) {
                self.render_branch(branch, context, depth + 1, out);
            }
            return;
        }

        if let Some(element) = self.render_element(component, index, context, depth) {
            out.push(RenderNode::Element(element));
        }
    }

    fn render_element(
        &self,
        component: &UIComponent,
        index: usize,
        context: &Context,
        depth: usize,
    ) -> Option<ElementNode> {
        let Some(renderable) = self.registry.lookup(&component.component_type) else {
            log::warn!(
                "Component type '{}' not found in registry (node '{}')",
                component.component_type,
                component.id
            );
            return None;
        };

        Some(ElementNode {
            key: node_key(component, index),
            id: component.id.clone(),
            component_type: component.component_type.clone(),
            kind: renderable.kind,
            props: resolve_props(component, renderable, context),
            events: bind_events(component, context),
            children: self.render_children(component, context, depth + 1),
        })
    }

    /// 文字列の子はそのまま、ノード列は再帰的に描画
    pub(super) fn render_children(&self, component: &UIComponent, context: &Context, depth: usize) -> Vec<RenderNode> {
        match &component.children {
            Some(ChildContent::Text(text)) => vec![RenderNode::Text(text.clone())],
            Some(ChildContent::Nodes(nodes)) => self.render_nodes(nodes, context, depth),
            None => Vec::new(),
        }
    }
}
