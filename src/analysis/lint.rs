use crate::analysis::error::Diagnostic;
use crate::engine::data_source::STATUS_KEY;
use crate::engine::registry::ComponentRegistry;
use crate::parser::ast::*;
use crate::parser::expr::parse_expression;

use regex::Regex;
use std::collections::HashMap;

lazy_static::lazy_static! {
    // データソースIDとループ変数に使える識別子
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();
}

pub fn run_lints(schema: &PageSchema, registry: &dyn ComponentRegistry) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    // データソース定義チェック
    for (id, config) in &schema.data_sources {
        let location = format!("dataSources.{}", id);
        if !IDENTIFIER.is_match(id) {
            diags.push(
                Diagnostic::error(format!("Data source id '{}' is not a valid identifier", id)).at(&location),
            );
        }
        match config.kind {
            DataSourceKind::Remote if config.url.is_none() => {
                diags.push(Diagnostic::error(format!("Remote data source '{}' has no url", id)).at(&location));
            }
            DataSourceKind::Persistent if config.key.is_none() => {
                diags.push(
                    Diagnostic::info(format!("Persistent data source '{}' has no key, its id is used", id))
                        .at(&location),
                );
            }
            DataSourceKind::Computed if config.expression.is_none() => {
                diags.push(
                    Diagnostic::warning(format!("Computed data source '{}' has no expression", id)).at(&location),
                );
            }
            _ => {}
        }
        if let Some(expression) = &config.expression {
            check_expression(expression, "expression", &location, &mut diags);
        }
        if let Some(transform) = &config.transform {
            check_expression(transform, "transform", &location, &mut diags);
        }
        for dependency in &config.dependencies {
            if schema.data_source(dependency).is_none() {
                diags.push(
                    Diagnostic::warning(format!(
                        "Data source '{}' depends on '{}' which is not declared",
                        id, dependency
                    ))
                    .at(&location),
                );
            }
        }
    }

    let mut walker = Walker {
        schema,
        registry,
        ids: HashMap::new(),
        diags,
    };
    let mut scope = Vec::new();
    for component in &schema.components {
        walker.visit(component, "", &mut scope);
    }

    // 重複IDチェック
    let Walker { ids, mut diags, .. } = walker;
    let mut duplicates: Vec<_> = ids.into_iter().filter(|(_, count)| *count > 1).collect();
    duplicates.sort();
    for (id, count) in duplicates {
        diags.push(Diagnostic::error(format!(
            "Component id '{}' is defined more than once ({} times)",
            id, count
        )));
    }

    diags
}

fn check_expression(source: &str, what: &str, location: &str, diags: &mut Vec<Diagnostic>) {
    if let Err(e) = parse_expression(source) {
        diags.push(Diagnostic::error(format!("Invalid {}: {}", what, e)).at(location));
    }
}

struct Walker<'a> {
    schema: &'a PageSchema,
    registry: &'a dyn ComponentRegistry,
    ids: HashMap<String, usize>,
    diags: Vec<Diagnostic>,
}

impl Walker<'_> {
    /// scope にはループ変数を外側から順に積む
    fn visit(&mut self, component: &UIComponent, parent: &str, scope: &mut Vec<String>) {
        let name = if component.id.is_empty() {
            component.component_type.as_str()
        } else {
            component.id.as_str()
        };
        let location = if parent.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent, name)
        };

        if !component.id.is_empty() {
            *self.ids.entry(component.id.clone()).or_insert(0) += 1;
        }

        // 型チェック
        match self.registry.lookup(&component.component_type) {
            None => self.diags.push(
                Diagnostic::error(format!("Unknown component type '{}'", component.component_type)).at(&location),
            ),
            Some(renderable) => {
                if let Some(deprecation) = &renderable.deprecated {
                    let mut message = format!("Component type '{}' is deprecated", component.component_type);
                    if let Some(replacement) = &deprecation.replaced_by {
                        message.push_str(&format!(", use '{}' instead", replacement));
                    }
                    self.diags.push(Diagnostic::warning(message).at(&location));
                }
            }
        }

        // ループのソースは外側のスコープで解決される
        let mut pushed = 0;
        if let Some(loop_spec) = &component.loop_spec {
            self.check_binding(&loop_spec.source, "loop source", &location, scope);
            for var in std::iter::once(&loop_spec.item_var).chain(loop_spec.index_var.iter()) {
                if !IDENTIFIER.is_match(var) {
                    self.diags.push(
                        Diagnostic::error(format!("Loop variable '{}' is not a valid identifier", var)).at(&location),
                    );
                }
                scope.push(var.clone());
                pushed += 1;
            }
        }

        for (prop, binding) in &component.bindings {
            self.check_binding(binding, &format!("binding '{}'", prop), &location, scope);
        }
        if let Some(binding) = &component.data_binding {
            self.check_binding(binding, "dataBinding", &location, scope);
        }
        if let Some(binding) = &component.condition {
            self.check_binding(binding, "condition", &location, scope);
        }

        for handler in &component.events {
            if let Some(condition) = &handler.condition {
                check_expression(
                    condition,
                    &format!("'{}' event condition", handler.event),
                    &location,
                    &mut self.diags,
                );
            }
            for action in &handler.actions {
                self.check_action(action, &location);
            }
        }

        if let Some(conditional) = &component.conditional {
            check_expression(&conditional.condition, "conditional", &location, &mut self.diags);
            for branch in conditional.then_branch.iter().chain(conditional.else_branch.iter()) {
                match branch {
                    Branch::Text(_) => {}
                    Branch::Node(node) => self.visit(node, &location, scope),
                    Branch::Sequence(items) => {
                        for item in items {
                            if let BranchItem::Node(node) = item {
                                self.visit(node, &location, scope);
                            }
                        }
                    }
                }
            }
        }

        for child in component.child_nodes() {
            self.visit(child, &location, scope);
        }

        scope.truncate(scope.len() - pushed);
    }

    fn check_binding(&mut self, binding: &Binding, what: &str, location: &str, scope: &[String]) {
        let root = binding.root_name();
        let known = root == STATUS_KEY
            || scope.iter().any(|var| var == root)
            || self.schema.data_source(root).is_some();
        if !known {
            self.diags.push(
                Diagnostic::warning(format!("{} refers to unknown data source '{}'", capitalize(what), root))
                    .at(location),
            );
        }
        if let Binding::Path {
            transform: Some(transform),
            ..
        } = binding
        {
            check_expression(transform, "transform", location, &mut self.diags);
        }
    }

    fn check_action(&mut self, action: &Action, location: &str) {
        if let Some(expression) = &action.expression {
            check_expression(expression, &format!("expression in action '{}'", action.id), location, &mut self.diags);
        }
        if action.kind == ActionKind::Unknown {
            self.diags.push(Diagnostic::warning(format!("Action '{}' has an unsupported type", action.id)).at(location));
            return;
        }
        if !action.kind.mutates_source() {
            return;
        }
        let Some(target) = &action.target else {
            self.diags.push(
                Diagnostic::error(format!(
                    "Action '{}' ({}) has no target",
                    action.id,
                    action.kind.as_str()
                ))
                .at(location),
            );
            return;
        };
        match self.schema.data_source(target) {
            None => self.diags.push(
                Diagnostic::error(format!(
                    "Action '{}' targets undeclared data source '{}'",
                    action.id, target
                ))
                .at(location),
            ),
            Some(config) if config.kind == DataSourceKind::Computed => self.diags.push(
                Diagnostic::error(format!(
                    "Action '{}' targets computed data source '{}' which is read-only",
                    action.id, target
                ))
                .at(location),
            ),
            Some(_) => {}
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
