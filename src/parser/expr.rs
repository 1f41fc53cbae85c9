// ========================================
// 式パーサーモジュール
// ========================================
//
// 条件式・値式を一度だけパースして Expr に変換する。
// 任意コードの実行は行わず、文法で許可した構文のみを受け付ける。

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest_derive::Parser;
use serde_json::{Number, Value};

use crate::error::ExprError;
use crate::parser::ast::{BinaryOperator, Expr, LogicalOperator, UnaryOperator};
use crate::parser::utils::unquote;

/// grammar.pestファイルで定義された式の構文規則を使用
#[derive(Parser)]
#[grammar = "parser/grammar.pest"]
pub struct ExprParser;

/// 括弧・三項演算子の入れ子の上限
pub const MAX_EXPRESSION_DEPTH: usize = 64;
/// 式の長さの上限（左結合の連鎖で評価時の再帰が深くなりすぎないように）
pub const MAX_EXPRESSION_LEN: usize = 2048;

/// 式文字列をパースして Expr を生成する
pub fn parse_expression(source: &str) -> Result<Expr, ExprError> {
    check_complexity(source)?;

    let mut pairs = ExprParser::parse(Rule::expression, source).map_err(|e| ExprError::Parse {
        source_text: source.to_string(),
        message: e.to_string(),
    })?;

    let expression = next_pair(&mut pairs, source)?;
    let mut inner = expression.into_inner();
    let expr = next_pair(&mut inner, source)?;
    build_expr(expr, source)
}

/// パース前に長さと入れ子の深さを確かめる（文字列リテラルの中は数えない）
fn check_complexity(source: &str) -> Result<(), ExprError> {
    let reject = |message: String| ExprError::Parse {
        source_text: source.to_string(),
        message,
    };
    if source.len() > MAX_EXPRESSION_LEN {
        return Err(reject(format!(
            "expression is {} bytes long, the limit is {}",
            source.len(),
            MAX_EXPRESSION_LEN
        )));
    }

    let mut depth = 0usize;
    let mut ternaries = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(_), '\\') => {
                chars.next();
            }
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, '?') => ternaries += 1,
            _ => {}
        }
        if depth + ternaries > MAX_EXPRESSION_DEPTH {
            return Err(reject(format!(
                "expression nests deeper than {} levels",
                MAX_EXPRESSION_DEPTH
            )));
        }
    }
    Ok(())
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, source: &str) -> Result<Pair<'i, Rule>, ExprError> {
    pairs.next().ok_or_else(|| ExprError::Parse {
        source_text: source.to_string(),
        message: "unexpected end of expression".to_string(),
    })
}

fn build_expr(pair: Pair<Rule>, source: &str) -> Result<Expr, ExprError> {
    match pair.as_rule() {
        Rule::expr => {
            let mut inner = pair.into_inner();
            let test = build_expr(next_pair(&mut inner, source)?, source)?;
            match inner.next() {
                Some(consequent) => {
                    let alternate = next_pair(&mut inner, source)?;
                    Ok(Expr::Conditional {
                        test: Box::new(test),
                        consequent: Box::new(build_expr(consequent, source)?),
                        alternate: Box::new(build_expr(alternate, source)?),
                    })
                }
                None => Ok(test),
            }
        }
        Rule::or_expr | Rule::and_expr => {
            let op = if pair.as_rule() == Rule::or_expr {
                LogicalOperator::Or
            } else {
                LogicalOperator::And
            };
            let mut inner = pair.into_inner();
            let mut left = build_expr(next_pair(&mut inner, source)?, source)?;
            while inner.next().is_some() {
                let right = build_expr(next_pair(&mut inner, source)?, source)?;
                left = Expr::Logical {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
            }
            Ok(left)
        }
        Rule::cmp_expr => {
            let mut inner = pair.into_inner();
            let mut left = build_expr(next_pair(&mut inner, source)?, source)?;
            while let Some(op_pair) = inner.next() {
                let op = comparison_operator(op_pair.as_str().trim(), source)?;
                let right = build_expr(next_pair(&mut inner, source)?, source)?;
                left = Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
            }
            Ok(left)
        }
        Rule::unary => {
            let mut ops = Vec::new();
            let mut operand = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::unary_op => ops.push(if inner.as_str() == "!" {
                        UnaryOperator::Not
                    } else {
                        UnaryOperator::Neg
                    }),
                    _ => operand = Some(build_expr(inner, source)?),
                }
            }
            let mut expr = operand.ok_or_else(|| ExprError::Parse {
                source_text: source.to_string(),
                message: "missing operand".to_string(),
            })?;
            // 内側の演算子から順に適用
            for op in ops.into_iter().rev() {
                expr = Expr::Unary {
                    op,
                    operand: Box::new(expr),
                };
            }
            Ok(expr)
        }
        Rule::postfix => {
            let mut inner = pair.into_inner();
            let mut expr = build_expr(next_pair(&mut inner, source)?, source)?;
            for accessor in inner {
                let target = next_pair(&mut accessor.into_inner(), source)?;
                expr = match target.as_rule() {
                    Rule::field => Expr::Member {
                        object: Box::new(expr),
                        property: target.as_str().to_string(),
                    },
                    _ => Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(build_expr(target, source)?),
                    },
                };
            }
            Ok(expr)
        }
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = next_pair(&mut inner, source)?.as_str().to_string();
            let args = inner
                .map(|arg| build_expr(arg, source))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Call { name, args })
        }
        Rule::array => {
            let items = pair
                .into_inner()
                .map(|item| build_expr(item, source))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Array(items))
        }
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        Rule::number => parse_number(pair.as_str(), source).map(Expr::Literal),
        Rule::string => Ok(Expr::Literal(Value::String(unquote(pair.as_str())))),
        Rule::boolean => Ok(Expr::Literal(Value::Bool(pair.as_str() == "true"))),
        Rule::null => Ok(Expr::Literal(Value::Null)),
        Rule::undefined => Ok(Expr::Undefined),
        other => Err(ExprError::Parse {
            source_text: source.to_string(),
            message: format!("unexpected rule {:?}", other),
        }),
    }
}

fn comparison_operator(op: &str, source: &str) -> Result<BinaryOperator, ExprError> {
    let op = match op {
        "===" => BinaryOperator::StrictEq,
        "!==" => BinaryOperator::StrictNe,
        "==" => BinaryOperator::Eq,
        "!=" => BinaryOperator::Ne,
        "<" => BinaryOperator::Lt,
        "<=" => BinaryOperator::Le,
        ">" => BinaryOperator::Gt,
        ">=" => BinaryOperator::Ge,
        "in" => BinaryOperator::In,
        other => {
            return Err(ExprError::Parse {
                source_text: source.to_string(),
                message: format!("unknown operator `{}`", other),
            });
        }
    };
    Ok(op)
}

/// 整数は整数のまま、それ以外は f64 として保持
fn parse_number(text: &str, source: &str) -> Result<Value, ExprError> {
    if !text.contains(['.', 'e', 'E']) {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Number(n.into()));
        }
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ExprError::Parse {
            source_text: source.to_string(),
            message: format!("invalid number `{}`", text),
        })
}
