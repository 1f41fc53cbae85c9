// ========================================
// アクション実行
// ========================================
//
// アクションはリスト順に1つずつ同期実行する。
// 失敗したアクションはログと実行結果に記録し、残りのアクションは続けて実行する（ロールバックなし）。

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::engine::binding::lookup_path;
use crate::engine::context::Context;
use crate::engine::data_source::DataSourceManager;
use crate::engine::evaluator::{evaluate_value, is_truthy, strict_equals};
use crate::error::ActionError;
use crate::parser::ast::{Action, ActionKind, ToastVariant};

const DEFAULT_TOAST_MESSAGE: &str = "Action completed";

/// ホストアプリが提供するアクションハンドラ
pub trait ActionHandler: Send + Sync {
    /// custom / open-dialog / close-dialog の実行
    fn invoke(&self, name: &str, action: &Action, payload: &Value, context: &Context) -> Result<(), ActionError>;

    fn show_toast(&self, message: &str, variant: ToastVariant) {
        log::info!("[toast:{:?}] {}", variant, message);
    }

    fn navigate(&self, path: &str) {
        log::info!("Navigate to {}", path);
    }
}

/// ログ出力だけを行うハンドラ（CLI用）
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingActionHandler;

impl ActionHandler for LoggingActionHandler {
    fn invoke(&self, name: &str, _action: &Action, payload: &Value, _context: &Context) -> Result<(), ActionError> {
        log::info!("Custom action '{}' invoked with payload {}", name, payload);
        Ok(())
    }
}

/// アクションリスト1回分の実行結果
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub executed: usize,
    /// (アクションID, エラー)
    pub failures: Vec<(String, ActionError)>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone)]
pub struct ActionExecutor {
    sources: DataSourceManager,
    handler: Arc<dyn ActionHandler>,
}

impl fmt::Debug for ActionExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionExecutor")
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl ActionExecutor {
    pub fn new(sources: DataSourceManager, handler: Arc<dyn ActionHandler>) -> Self {
        Self { sources, handler }
    }

    pub fn with_logging(sources: DataSourceManager) -> Self {
        Self::new(sources, Arc::new(LoggingActionHandler))
    }

    pub fn sources(&self) -> &DataSourceManager {
        &self.sources
    }

    /// アクションを順に実行する。1つ失敗しても残りは実行する
    pub fn execute(&self, actions: &[Action], payload: &Value, context: &Context) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for action in actions {
            match self.execute_one(action, payload, context) {
                Ok(()) => report.executed += 1,
                Err(e) => {
                    log::error!("Action '{}' ({}) failed: {}", action.id, action.kind.as_str(), e);
                    report.failures.push((action.id.clone(), e));
                }
            }
        }
        report
    }

    fn execute_one(&self, action: &Action, payload: &Value, context: &Context) -> Result<(), ActionError> {
        log::debug!("Executing action '{}' ({})", action.id, action.kind.as_str());
        match action.kind {
            ActionKind::Create => {
                let target = target_of(action)?;
                let value = self.required_value(action, context)?;
                let mut list = self.sources.get(target).unwrap_or_else(|| Value::Array(Vec::new()));
                let Value::Array(items) = &mut list else {
                    return Err(wrong_type(target, "list"));
                };
                items.push(value);
                self.sources.set(target, list)?;
            }
            ActionKind::Update | ActionKind::SetValue => {
                let target = target_of(action)?;
                let value = self.required_value(action, context)?;
                self.write(target, action.path.as_deref(), value)?;
            }
            ActionKind::Delete => {
                let target = target_of(action)?;
                let value = self.required_value(action, context)?;
                let Some(Value::Array(items)) = self.sources.get(target) else {
                    return Err(wrong_type(target, "list"));
                };
                let kept: Vec<Value> = items
                    .into_iter()
                    .filter(|item| {
                        let compared = match action.path.as_deref() {
                            Some(path) => lookup_path(item, path),
                            None => Some(item),
                        };
                        !strict_equals(compared, Some(&value))
                    })
                    .collect();
                self.sources.set(target, Value::Array(kept))?;
            }
            ActionKind::ToggleValue => {
                let target = target_of(action)?;
                let current = self.read(target, action.path.as_deref());
                self.write(target, action.path.as_deref(), Value::Bool(!is_truthy(current.as_ref())))?;
            }
            ActionKind::Increment | ActionKind::Decrement => {
                let target = target_of(action)?;
                let amount = self.value(action, context)?.unwrap_or_else(|| Value::from(1));
                if !amount.is_number() {
                    return Err(wrong_type(target, "number"));
                }
                let current = match self.read(target, action.path.as_deref()) {
                    None | Some(Value::Null) => Value::from(0),
                    Some(n) if n.is_number() => n,
                    Some(_) => return Err(wrong_type(target, "number")),
                };
                let sign = if action.kind == ActionKind::Increment { 1 } else { -1 };
                self.write(target, action.path.as_deref(), add_numbers(&current, &amount, sign))?;
            }
            ActionKind::ShowToast => {
                let message = match (&action.message, self.value(action, context)?) {
                    (Some(message), _) => message.clone(),
                    (None, Some(Value::String(s))) => s,
                    _ => DEFAULT_TOAST_MESSAGE.to_string(),
                };
                self.handler.show_toast(&message, action.variant.unwrap_or_default());
            }
            ActionKind::Navigate => {
                let path = action
                    .path
                    .clone()
                    .or_else(|| action.target.clone())
                    .or_else(|| action.value.as_ref().and_then(Value::as_str).map(str::to_string))
                    .ok_or_else(|| ActionError::MissingTarget(action.id.clone()))?;
                self.handler.navigate(&path);
            }
            ActionKind::Custom => self.handler.invoke(&action.id, action, payload, context)?,
            ActionKind::OpenDialog | ActionKind::CloseDialog => {
                self.handler.invoke(action.kind.as_str(), action, payload, context)?
            }
            ActionKind::Unknown => return Err(ActionError::Unsupported(action.id.clone())),
        }
        Ok(())
    }

    /// expression があれば評価、なければリテラル value
    fn value(&self, action: &Action, context: &Context) -> Result<Option<Value>, ActionError> {
        match &action.expression {
            Some(expression) => Ok(evaluate_value(expression, context)?),
            None => Ok(action.value.clone()),
        }
    }

    fn required_value(&self, action: &Action, context: &Context) -> Result<Value, ActionError> {
        self.value(action, context)?
            .ok_or_else(|| ActionError::MissingValue(action.id.clone()))
    }

    /// 直前のアクションの結果が見えるよう、常に現在値を読む
    fn read(&self, target: &str, path: Option<&str>) -> Option<Value> {
        let current = self.sources.get(target)?;
        match path {
            Some(path) => lookup_path(&current, path).cloned(),
            None => Some(current),
        }
    }

    fn write(&self, target: &str, path: Option<&str>, value: Value) -> Result<(), ActionError> {
        match path {
            Some(path) => self.sources.set_path(target, path, value)?,
            None => self.sources.set(target, value)?,
        }
        Ok(())
    }
}

fn target_of(action: &Action) -> Result<&str, ActionError> {
    action
        .target
        .as_deref()
        .ok_or_else(|| ActionError::MissingTarget(action.id.clone()))
}

fn wrong_type(target: &str, expected: &'static str) -> ActionError {
    ActionError::WrongType {
        target: target.to_string(),
        expected,
    }
}

/// 両方整数なら整数のまま計算する
fn add_numbers(current: &Value, amount: &Value, sign: i64) -> Value {
    if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
        if let Some(result) = b.checked_mul(sign).and_then(|b| a.checked_add(b)) {
            return Value::from(result);
        }
    }
    let a = current.as_f64().unwrap_or(0.0);
    let b = amount.as_f64().unwrap_or(0.0);
    serde_json::Number::from_f64(a + b * sign as f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
