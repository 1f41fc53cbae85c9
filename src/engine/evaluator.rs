// ========================================
// 式評価モジュール
// ========================================
//
// パース済みの Expr を純粋関数として評価する。
// 条件式の評価失敗はログに出して false 扱い（呼び出し元へは伝播しない）。

use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::engine::context::Context;
use crate::error::ExprError;
use crate::parser::ast::{BinaryOperator, Expr, LogicalOperator, UnaryOperator};
use crate::parser::expr::parse_expression;

/// キャッシュの上限（超えたら全消去）
const EXPRESSION_CACHE_LIMIT: usize = 4096;

/// 式から呼び出せる関数（名前, 引数の数）
pub const SUPPORTED_FUNCTIONS: &[(&str, usize)] = &[
    ("length", 1),
    ("keyCount", 1),
    ("includes", 2),
    ("isEmpty", 1),
    ("findById", 2),
    ("findByIdOrFirst", 2),
    ("toLowerCase", 1),
    ("toUpperCase", 1),
    ("trim", 1),
];

// パース済み式のキャッシュ（式文字列ごとに一度だけパース）
lazy_static::lazy_static! {
    static ref EXPRESSION_CACHE: Mutex<HashMap<String, Result<Arc<Expr>, ExprError>>> =
        Mutex::new(HashMap::new());
}

type Evaluated<'c> = Option<Cow<'c, Value>>;

/// 式文字列をパース（キャッシュ済みならそれを返す）
pub fn compile(source: &str) -> Result<Arc<Expr>, ExprError> {
    let mut cache = EXPRESSION_CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(cached) = cache.get(source) {
        return cached.clone();
    }
    if cache.len() >= EXPRESSION_CACHE_LIMIT {
        log::debug!("Expression cache reached {} entries, clearing", cache.len());
        cache.clear();
    }
    let compiled = parse_expression(source).map(Arc::new);
    cache.insert(source.to_string(), compiled.clone());
    compiled
}

/// 条件式を評価する。失敗時は警告を出して false
pub fn evaluate_condition(source: &str, context: &Context) -> bool {
    let result = compile(source).and_then(|expr| eval(&expr, context).map(|v| is_truthy(v.as_deref())));
    match result {
        Ok(met) => met,
        Err(e) => {
            log::warn!("Failed to evaluate condition `{}`: {}", source, e);
            false
        }
    }
}

/// 値式を評価する（None は undefined）
pub fn evaluate_value(source: &str, context: &Context) -> Result<Option<Value>, ExprError> {
    let expr = compile(source)?;
    evaluate(&expr, context)
}

pub fn evaluate(expr: &Expr, context: &Context) -> Result<Option<Value>, ExprError> {
    eval(expr, context).map(|v| v.map(Cow::into_owned))
}

fn eval<'c>(expr: &Expr, context: &'c Context) -> Result<Evaluated<'c>, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(Some(Cow::Owned(value.clone()))),
        Expr::Undefined => Ok(None),
        Expr::Ident(name) => context
            .get(name)
            .map(|value| Some(Cow::Borrowed(value)))
            .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
        Expr::Member { object, property } => {
            let object = eval(object, context)?;
            Ok(object.and_then(|o| member(o, property)))
        }
        Expr::Index { object, index } => {
            let object = eval(object, context)?;
            let index = eval(index, context)?;
            Ok(match (object, index) {
                (Some(object), Some(index)) => match index.as_ref() {
                    Value::Number(n) => n.as_u64().and_then(|i| member(object, &i.to_string())),
                    Value::String(key) => member(object, key),
                    _ => None,
                },
                _ => None,
            })
        }
        Expr::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval(item, context)?.map(Cow::into_owned).unwrap_or(Value::Null));
            }
            Ok(Some(Cow::Owned(Value::Array(values))))
        }
        Expr::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval(arg, context)?.map(Cow::into_owned));
            }
            call_function(name, values).map(|v| v.map(Cow::Owned))
        }
        Expr::Unary { op, operand } => {
            let value = eval(operand, context)?;
            match op {
                UnaryOperator::Not => Ok(Some(Cow::Owned(Value::Bool(!is_truthy(value.as_deref()))))),
                UnaryOperator::Neg => match value.as_deref().and_then(Value::as_f64) {
                    Some(n) => Ok(Some(Cow::Owned(number_value(-n)))),
                    None => Err(ExprError::Type("cannot negate a non-number".to_string())),
                },
            }
        }
        Expr::Binary { left, op, right } => {
            let left = eval(left, context)?;
            let right = eval(right, context)?;
            let (l, r) = (left.as_deref(), right.as_deref());
            let result = match op {
                BinaryOperator::StrictEq => strict_equals(l, r),
                BinaryOperator::StrictNe => !strict_equals(l, r),
                BinaryOperator::Eq => loose_equals(l, r),
                BinaryOperator::Ne => !loose_equals(l, r),
                BinaryOperator::Lt => compare(l, r) == Some(Ordering::Less),
                BinaryOperator::Le => matches!(compare(l, r), Some(Ordering::Less | Ordering::Equal)),
                BinaryOperator::Gt => compare(l, r) == Some(Ordering::Greater),
                BinaryOperator::Ge => matches!(compare(l, r), Some(Ordering::Greater | Ordering::Equal)),
                BinaryOperator::In => contains(r, l)?,
            };
            Ok(Some(Cow::Owned(Value::Bool(result))))
        }
        Expr::Logical { left, op, right } => {
            let left_value = eval(left, context)?;
            let short_circuit = match op {
                LogicalOperator::And => !is_truthy(left_value.as_deref()),
                LogicalOperator::Or => is_truthy(left_value.as_deref()),
            };
            if short_circuit {
                Ok(left_value)
            } else {
                eval(right, context)
            }
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            if is_truthy(eval(test, context)?.as_deref()) {
                eval(consequent, context)
            } else {
                eval(alternate, context)
            }
        }
    }
}

/// プロパティアクセス。`length` は配列と文字列で要素数を返す
fn member<'c>(object: Cow<'c, Value>, property: &str) -> Evaluated<'c> {
    if property == "length" {
        match object.as_ref() {
            Value::Array(items) => return Some(Cow::Owned(Value::from(items.len()))),
            Value::String(s) => return Some(Cow::Owned(Value::from(s.chars().count()))),
            _ => {}
        }
    }
    match object {
        Cow::Borrowed(value) => child(value, property).map(Cow::Borrowed),
        Cow::Owned(value) => child(&value, property).cloned().map(Cow::Owned),
    }
}

fn child<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

// ========================================
// 真偽値・比較
// ========================================

/// JSと同じ真偽判定（undefined / null / false / 0 / NaN / "" は偽）
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// 数値は表現（整数/浮動小数）に関係なく比較する構造的等価
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

pub fn strict_equals(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => values_equal(a, b),
        _ => false,
    }
}

/// `==` 相当。null と undefined は等しく、数値と数値文字列は数値として比較
pub fn loose_equals(a: Option<&Value>, b: Option<&Value>) -> bool {
    let nullish = |v: Option<&Value>| matches!(v, None | Some(Value::Null));
    match (a, b) {
        _ if nullish(a) || nullish(b) => nullish(a) && nullish(b),
        (Some(Value::String(x)), Some(Value::String(y))) => x == y,
        (Some(x @ (Value::Number(_) | Value::String(_) | Value::Bool(_))), Some(y @ (Value::Number(_) | Value::String(_) | Value::Bool(_)))) => {
            match (to_number(x), to_number(y)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        (Some(x), Some(y)) => values_equal(x, y),
        _ => false,
    }
}

fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// 文字列同士は辞書順、それ以外は数値として比較。比較不能なら None
fn compare(a: Option<&Value>, b: Option<&Value>) -> Option<Ordering> {
    match (a?, b?) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (x, y) => to_number(x)?.partial_cmp(&to_number(y)?),
    }
}

/// `item in collection`
fn contains(collection: Option<&Value>, item: Option<&Value>) -> Result<bool, ExprError> {
    match collection {
        Some(Value::Array(items)) => Ok(items.iter().any(|candidate| strict_equals(Some(candidate), item))),
        Some(Value::Object(map)) => Ok(match item {
            Some(Value::String(key)) => map.contains_key(key),
            Some(Value::Number(n)) => map.contains_key(&n.to_string()),
            _ => false,
        }),
        Some(Value::String(haystack)) => match item {
            Some(Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
            _ => Ok(false),
        },
        _ => Err(ExprError::Type("right-hand side of `in` must be a list, object or string".to_string())),
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

// ========================================
// 許可済み関数
// ========================================

fn call_function(name: &str, args: Vec<Option<Value>>) -> Result<Option<Value>, ExprError> {
    let expected = SUPPORTED_FUNCTIONS
        .iter()
        .find(|(supported, _)| *supported == name)
        .map(|(_, arity)| *arity)
        .ok_or_else(|| ExprError::UnknownFunction(name.to_string()))?;
    if args.len() != expected {
        return Err(ExprError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }

    let mut args = args.into_iter();
    let first = args.next().flatten();
    let second = args.next().flatten();

    let result = match name {
        "length" => Value::from(match &first {
            Some(Value::Array(items)) => items.len(),
            Some(Value::String(s)) => s.chars().count(),
            Some(Value::Object(map)) => map.len(),
            _ => 0,
        }),
        "keyCount" => Value::from(match &first {
            Some(Value::Object(map)) => map.len(),
            _ => 0,
        }),
        "includes" => Value::Bool(match &first {
            Some(Value::Array(items)) => items.iter().any(|item| strict_equals(Some(item), second.as_ref())),
            Some(Value::String(s)) => second.as_ref().and_then(Value::as_str).is_some_and(|needle| s.contains(needle)),
            _ => false,
        }),
        "isEmpty" => Value::Bool(match &first {
            None | Some(Value::Null) => true,
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::String(s)) => s.is_empty(),
            Some(Value::Object(map)) => map.is_empty(),
            _ => false,
        }),
        "findById" | "findByIdOrFirst" => {
            let Some(Value::Array(items)) = &first else {
                return Ok(Some(Value::Null));
            };
            let found = items
                .iter()
                .find(|item| strict_equals(item.get("id"), second.as_ref()))
                .or_else(|| if name == "findByIdOrFirst" { items.first() } else { None });
            found.cloned().unwrap_or(Value::Null)
        }
        "toLowerCase" | "toUpperCase" | "trim" => {
            let text = match &first {
                None => return Ok(None),
                Some(Value::Null) => return Ok(Some(Value::Null)),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            Value::String(match name {
                "toLowerCase" => text.to_lowercase(),
                "toUpperCase" => text.to_uppercase(),
                _ => text.trim().to_string(),
            })
        }
        other => return Err(ExprError::UnknownFunction(other.to_string())),
    };
    Ok(Some(result))
}
