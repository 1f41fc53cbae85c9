// src/engine/core/event.rs
// イベント処理関連

use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;

use crate::engine::action::{ActionExecutor, ExecutionReport};
use crate::engine::context::Context;
use crate::engine::evaluator::evaluate_condition;
use crate::parser::ast::{EventHandler, UIComponent};
use crate::parser::utils::event_prop_name;

/// 描画時のスコープを保持したイベントハンドラ
#[derive(Debug, Clone, PartialEq)]
pub struct BoundEvent {
    /// 正規化済みのイベント名（"click"）
    pub event: String,
    /// ホスト側のプロパティ名（"onClick"）
    pub prop_name: String,
    pub handler: EventHandler,
    /// 描画時のコンテキスト（ループ変数を含む）
    pub scope: Context,
}

#[derive(Debug)]
pub enum Dispatch {
    /// condition が偽だったので実行しなかった
    Skipped,
    Executed(ExecutionReport),
}

impl Dispatch {
    pub fn is_executed(&self) -> bool {
        matches!(self, Dispatch::Executed(_))
    }
}

impl BoundEvent {
    pub fn new(handler: &EventHandler, scope: &Context) -> Self {
        Self {
            event: handler.event.clone(),
            prop_name: event_prop_name(&handler.event),
            handler: handler.clone(),
            scope: scope.clone(),
        }
    }

    /// イベントを発火する。
    /// ループ変数などのローカルはそのままに、データソースは現在値に載せ替えてから評価する
    pub fn dispatch(&self, payload: Value, executor: &ActionExecutor) -> Dispatch {
        let scope = self
            .scope
            .rebase(&executor.sources().snapshot())
            .with("event", payload.clone());

        if let Some(condition) = &self.handler.condition {
            if !evaluate_condition(condition, &scope) {
                log::debug!("Skipping '{}' handler: condition `{}` is false", self.event, condition);
                return Dispatch::Skipped;
            }
        }

        Dispatch::Executed(executor.execute(&self.handler.actions, &payload, &scope))
    }
}

impl Serialize for BoundEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let actions: Vec<&str> = self.handler.actions.iter().map(|a| a.id.as_str()).collect();
        let mut state = serializer.serialize_struct("BoundEvent", 3)?;
        state.serialize_field("event", &self.event)?;
        state.serialize_field("prop", &self.prop_name)?;
        state.serialize_field("actions", &actions)?;
        state.end()
    }
}

/// ノードのイベントをすべて現在のスコープに束縛する
pub fn bind_events(component: &UIComponent, scope: &Context) -> Vec<BoundEvent> {
    component
        .events
        .iter()
        .map(|handler| BoundEvent::new(handler, scope))
        .collect()
}
