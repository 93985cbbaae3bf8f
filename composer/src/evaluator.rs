use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use indexmap::IndexMap;
use weft::expr::template_string::{TemplateString, TemplateStringPart};
use weft::expr::{BinaryOperator, Expr, UnaryOperator};
use weft::tag::{AttrValue, Attribute, Param, Tag};

use crate::compiler::CompileContext;
use crate::error::{CompileError, ErrorKind, Location, Result, type_error};
use crate::functions;
use crate::intrinsics;
use crate::scope::Scope;
use crate::value::{Color, Value, defer};

/// Evaluates expressions against one scope of one source file.
pub struct Evaluator<'c> {
    pub cx: &'c CompileContext,
    pub scope: &'c Arc<Scope>,
    pub file_id: usize,
}

/// Names resolvable without a definition: intrinsics and builtins.
pub fn is_global(name: &str) -> bool {
    intrinsics::is_intrinsic(name) || functions::exists(name)
}

impl<'c> Evaluator<'c> {
    pub fn new(cx: &'c CompileContext, scope: &'c Arc<Scope>, file_id: usize) -> Self {
        Evaluator { cx, scope, file_id }
    }

    pub fn location(&self, span: Range<usize>) -> Location {
        Location::new(self.file_id, span)
    }

    pub fn permissive(&self) -> bool {
        self.scope.permissive()
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value> {
        let result = self.eval_inner(expr);
        match expr.span() {
            Some(span) => result.map_err(|e| e.or_at(&self.location(span))),
            None => result,
        }
    }

    fn eval_inner(&self, expr: &Expr) -> Result<Value> {
        let permissive = self.permissive();
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float { value, unit } => Ok(Value::Float {
                value: *value,
                unit: unit.clone(),
            }),
            Expr::String(ts) => self.eval_template_string(ts, false),
            Expr::Color { r, g, b, a } => Ok(Value::Color(Color {
                r: *r,
                g: *g,
                b: *b,
                a: *a,
            })),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<Result<_>>()?,
            )),
            Expr::Dict(entries) => Ok(Value::Dict(
                entries
                    .iter()
                    .map(|(k, e)| Ok((k.clone(), self.eval(e)?)))
                    .collect::<Result<_>>()?,
            )),
            Expr::Ident(name, _) => self.lookup(name),
            Expr::Call { callee, args, span } => {
                let args = args.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>>>()?;
                self.call(callee, args, span.clone())
            }
            Expr::Index { base, index, .. } => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                defer(vec![base, index], move |a| index_value(&a[0], &a[1], permissive))
            }
            Expr::UnaryOperation { operator, operand } => {
                let operator = *operator;
                let value = self.eval(operand)?;
                defer(vec![value], move |a| unary_op(operator, &a[0], permissive))
            }
            Expr::BinaryOperation {
                operator,
                left,
                right,
            } => self.binary(*operator, left, right),
            Expr::Conditional {
                condition,
                true_branch,
                false_branch,
            } => {
                let cond = self.eval(condition)?;
                if !cond.contains_lazy() {
                    return if cond.as_condition(permissive)? {
                        self.eval(true_branch)
                    } else {
                        self.eval(false_branch)
                    };
                }
                let yes = self.eval(true_branch)?;
                let no = self.eval(false_branch)?;
                defer(vec![cond, yes, no], move |a| {
                    let chosen = if a[0].as_condition(permissive)? { &a[1] } else { &a[2] };
                    Ok(chosen.clone())
                })
            }
        }
    }

    fn binary(&self, operator: BinaryOperator, left: &Expr, right: &Expr) -> Result<Value> {
        let permissive = self.permissive();
        let l = self.eval(left)?;
        match operator {
            BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr if !l.contains_lazy() => {
                let lb = l.as_condition(permissive)?;
                match (operator, lb) {
                    (BinaryOperator::LogicalAnd, false) => Ok(Value::Bool(false)),
                    (BinaryOperator::LogicalOr, true) => Ok(Value::Bool(true)),
                    _ => {
                        let r = self.eval(right)?;
                        defer(vec![r], move |a| Ok(Value::Bool(a[0].as_condition(permissive)?)))
                    }
                }
            }
            BinaryOperator::NullCoalesce if !l.contains_lazy() => {
                if l.is_null() {
                    self.eval(right)
                } else {
                    Ok(l)
                }
            }
            _ => {
                let r = self.eval(right)?;
                defer(vec![l, r], move |a| binary_op(operator, &a[0], &a[1], permissive))
            }
        }
    }

    /// Resolve a bare or dotted name.
    pub fn lookup(&self, name: &str) -> Result<Value> {
        if let Some(var) = self.scope.get_var(name) {
            return Ok(var.value);
        }
        if let Some((head, path)) = name.split_once('.') {
            if let Some(var) = self.scope.get_var(head) {
                return members(var.value, path, self.permissive());
            }
        }
        if is_global(name) {
            return Ok(Value::Function(name.to_string()));
        }
        if self.permissive() {
            return Ok(Value::Null);
        }
        Err(ErrorKind::UndefinedVariable(name.to_string()).into())
    }

    /// Call `callee`: a variable holding a function first, then the
    /// intrinsics, then the builtin table.
    pub fn call(&self, callee: &str, args: Vec<Value>, span: Range<usize>) -> Result<Value> {
        if let Some(var) = self.scope.get_var(callee) {
            return match var.value {
                Value::Function(name) => self.call_named(&name, args, span),
                _ => Err(ErrorKind::NotCallable(callee.to_string()).into()),
            };
        }
        self.call_named(callee, args, span)
    }

    fn call_named(&self, name: &str, args: Vec<Value>, span: Range<usize>) -> Result<Value> {
        if intrinsics::is_intrinsic(name) {
            return intrinsics::call(self, name, args, span);
        }
        if functions::exists(name) {
            let name = name.to_string();
            return defer(args, move |a| functions::call(&name, a));
        }
        Err(ErrorKind::UndefinedFunction(name.to_string()).into())
    }

    /// Evaluate a string with interpolations. With `passthrough`, a string
    /// that is a single `{expr}` yields the expression's value unchanged.
    pub fn eval_template_string(&self, ts: &TemplateString, passthrough: bool) -> Result<Value> {
        if let (true, Some(expr)) = (passthrough, ts.as_single_expression()) {
            return self.eval(expr);
        }
        let parts = ts
            .parts
            .iter()
            .map(|part| match part {
                TemplateStringPart::Literal(s) => Ok(Value::String(s.clone())),
                TemplateStringPart::Expression(e) => self.eval(e),
            })
            .collect::<Result<Vec<_>>>()?;
        defer(parts, |parts| {
            Ok(Value::String(parts.iter().map(Value::to_string).collect()))
        })
    }

    pub fn eval_attribute(&self, attr: &Attribute) -> Result<Value> {
        let result = match &attr.value {
            AttrValue::Flag => Ok(Value::Bool(true)),
            AttrValue::Text(ts) => self.eval_template_string(ts, true),
            AttrValue::Expr(e) => self.eval(e),
            AttrValue::Params(_) => Err(CompileError::new(ErrorKind::Structure(format!(
                "a parameter list is not allowed for `{}`",
                attr.name
            )))),
        };
        result.map_err(|e| e.or_at(&self.location(attr.span.clone())))
    }

    pub fn eval_attributes(&self, tag: &Tag) -> Result<IndexMap<String, Value>> {
        tag.attributes
            .iter()
            .map(|attr| Ok((attr.name.clone(), self.eval_attribute(attr)?)))
            .collect()
    }

    /// Evaluate a `(a, b = expr)` list. A bare name forwards the variable of
    /// the same name.
    pub fn eval_params(&self, params: &[Param]) -> Result<IndexMap<String, Value>> {
        params
            .iter()
            .map(|p| {
                let value = match &p.default {
                    Some(expr) => self.eval(expr)?,
                    None => self
                        .scope
                        .get_var(&p.name)
                        .map(|v| v.value)
                        .ok_or_else(|| {
                            CompileError::new(ErrorKind::UndefinedVariable(p.name.clone()))
                                .at(&self.location(p.span.clone()))
                        })?,
                };
                Ok((p.name.clone(), value))
            })
            .collect()
    }
}

/// Follow a dotted member path.
pub fn members(mut value: Value, path: &str, permissive: bool) -> Result<Value> {
    for key in path.split('.') {
        value = member(&value, key, permissive)?;
    }
    Ok(value)
}

fn member(value: &Value, key: &str, permissive: bool) -> Result<Value> {
    match value {
        Value::Dict(map) => match map.get(key) {
            Some(v) => Ok(v.clone()),
            None if permissive => Ok(Value::Null),
            None => Err(CompileError::custom(format!("dict has no key `{}`", key))),
        },
        Value::ParentStyle(handle) => handle.search(key, permissive),
        Value::Lazy(_) => {
            let key = key.to_string();
            defer(vec![value.clone()], move |a| member(&a[0], &key, permissive))
        }
        Value::Null if permissive => Ok(Value::Null),
        other => Err(type_error("dict", other.type_name())),
    }
}

pub fn index_value(base: &Value, index: &Value, permissive: bool) -> Result<Value> {
    match (base, index) {
        (Value::List(items), Value::Int(i)) => match usize::try_from(*i).ok().and_then(|i| items.get(i)) {
            Some(v) => Ok(v.clone()),
            None if permissive => Ok(Value::Null),
            None => Err(ErrorKind::IndexOutOfBounds {
                index: *i,
                len: items.len(),
            }
            .into()),
        },
        (Value::String(s), Value::Int(i)) => {
            match usize::try_from(*i).ok().and_then(|i| s.chars().nth(i)) {
                Some(c) => Ok(Value::String(c.to_string())),
                None if permissive => Ok(Value::Null),
                None => Err(ErrorKind::IndexOutOfBounds {
                    index: *i,
                    len: s.chars().count(),
                }
                .into()),
            }
        }
        (Value::Dict(_) | Value::ParentStyle(_), Value::String(key)) => member(base, key, permissive),
        (Value::Null, _) if permissive => Ok(Value::Null),
        (Value::List(_) | Value::String(_), other) => Err(type_error("int index", other.type_name())),
        (Value::Dict(_), other) => Err(type_error("string key", other.type_name())),
        (other, _) => Err(type_error("list or dict", other.type_name())),
    }
}

pub fn unary_op(operator: UnaryOperator, value: &Value, permissive: bool) -> Result<Value> {
    match (operator, value) {
        (UnaryOperator::Negation, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| CompileError::custom("integer overflow")),
        (UnaryOperator::Negation, Value::Float { value, unit }) => Ok(Value::Float {
            value: -value,
            unit: unit.clone(),
        }),
        (UnaryOperator::Negation, Value::Null) if permissive => Ok(Value::Null),
        (UnaryOperator::Negation, other) => Err(type_error("number", other.type_name())),
        (UnaryOperator::LogicalNot, v) => Ok(Value::Bool(!v.as_condition(permissive)?)),
    }
}

pub fn binary_op(
    operator: BinaryOperator,
    left: &Value,
    right: &Value,
    permissive: bool,
) -> Result<Value> {
    use BinaryOperator::*;

    match operator {
        Equality => return Ok(Value::Bool(left == right)),
        Inequality => return Ok(Value::Bool(left != right)),
        NullCoalesce => {
            return Ok(if left.is_null() { right } else { left }.clone());
        }
        LogicalAnd => {
            return Ok(Value::Bool(
                left.as_condition(permissive)? && right.as_condition(permissive)?,
            ));
        }
        LogicalOr => {
            return Ok(Value::Bool(
                left.as_condition(permissive)? || right.as_condition(permissive)?,
            ));
        }
        _ => {}
    }

    if permissive && (left.is_null() || right.is_null()) {
        return Ok(Value::Null);
    }

    match operator {
        Addition => match (left, right) {
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            (Value::List(a), Value::List(b)) => {
                Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let mut merged = a.clone();
                merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(Value::Dict(merged))
            }
            _ => arithmetic(operator, left, right),
        },
        Subtraction | Multiplication | Division | Modulo => arithmetic(operator, left, right),
        _ => {
            let ordering = compare(left, right)?;
            Ok(Value::Bool(match operator {
                GreaterThan => ordering == Ordering::Greater,
                LessThan => ordering == Ordering::Less,
                GreaterThanOrEqual => ordering != Ordering::Less,
                _ => ordering != Ordering::Greater,
            }))
        }
    }
}

fn arithmetic(operator: BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
    use BinaryOperator::*;

    if let (Value::Int(a), Value::Int(b)) = (left, right) {
        let (a, b) = (*a, *b);
        let result = match operator {
            Addition => a.checked_add(b),
            Subtraction => a.checked_sub(b),
            Multiplication => a.checked_mul(b),
            Division if b == 0 => return Err(ErrorKind::DivisionByZero.into()),
            Division => match a.checked_rem(b) {
                Some(0) => a.checked_div(b),
                Some(_) => return Ok(Value::float(a as f64 / b as f64)),
                None => None,
            },
            Modulo if b == 0 => return Err(ErrorKind::DivisionByZero.into()),
            _ => a.checked_rem(b),
        };
        return result
            .map(Value::Int)
            .ok_or_else(|| CompileError::custom("integer overflow"));
    }

    let (a, ua) = left
        .as_number()
        .ok_or_else(|| type_error("number", left.type_name()))?;
    let (b, ub) = right
        .as_number()
        .ok_or_else(|| type_error("number", right.type_name()))?;

    let unit = match (operator, ua, ub) {
        (_, Some(x), Some(y)) if x != y => {
            return Err(CompileError::custom(format!("unit mismatch: {} and {}", x, y)));
        }
        (Multiplication, Some(x), Some(_)) => {
            return Err(CompileError::custom(format!("can't multiply {} by {}", x, x)));
        }
        (Division, Some(_), Some(_)) => None,
        (_, x, y) => x.or(y).map(str::to_string),
    };

    let value = match operator {
        Addition => a + b,
        Subtraction => a - b,
        Multiplication => a * b,
        Division | Modulo if b == 0.0 => return Err(ErrorKind::DivisionByZero.into()),
        Division => a / b,
        _ => a % b,
    };
    Ok(Value::Float { value, unit })
}

fn compare(left: &Value, right: &Value) -> Result<Ordering> {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return Ok(a.cmp(b));
    }
    let (a, ua) = left
        .as_number()
        .ok_or_else(|| type_error("number", left.type_name()))?;
    let (b, ub) = right
        .as_number()
        .ok_or_else(|| type_error("number", right.type_name()))?;
    if ua.is_some() && ub.is_some() && ua != ub {
        let (x, y) = (ua.unwrap_or_default(), ub.unwrap_or_default());
        return Err(CompileError::custom(format!("unit mismatch: {} and {}", x, y)));
    }
    a.partial_cmp(&b)
        .ok_or_else(|| CompileError::custom("values are not comparable"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(value: f64) -> Value {
        Value::Float {
            value,
            unit: Some("px".into()),
        }
    }

    #[test]
    fn integer_division_stays_exact() {
        let op = BinaryOperator::Division;
        assert_eq!(binary_op(op, &Value::Int(6), &Value::Int(3), false).unwrap(), Value::Int(2));
        assert_eq!(
            binary_op(op, &Value::Int(7), &Value::Int(2), false).unwrap(),
            Value::float(3.5)
        );
        assert!(binary_op(op, &Value::Int(1), &Value::Int(0), false).is_err());
    }

    #[test]
    fn integer_overflow_is_an_error() {
        let min = Value::Int(i64::MIN);
        let minus_one = Value::Int(-1);
        for op in [BinaryOperator::Division, BinaryOperator::Modulo, BinaryOperator::Multiplication] {
            let err = binary_op(op, &min, &minus_one, false).unwrap_err();
            assert_eq!(err.to_string(), "integer overflow");
        }
    }

    #[test]
    fn units_propagate_and_must_agree() {
        let add = BinaryOperator::Addition;
        assert_eq!(binary_op(add, &px(2.0), &Value::Int(3), false).unwrap(), px(5.0));
        let em = Value::Float {
            value: 1.0,
            unit: Some("em".into()),
        };
        assert!(binary_op(add, &px(2.0), &em, false).is_err());
    }

    #[test]
    fn strings_concatenate_with_anything() {
        let add = BinaryOperator::Addition;
        assert_eq!(
            binary_op(add, &"n=".into(), &Value::Int(1), false).unwrap(),
            Value::from("n=1")
        );
    }

    #[test]
    fn permissive_nulls_propagate() {
        let sub = BinaryOperator::Subtraction;
        assert!(binary_op(sub, &Value::Null, &Value::Int(1), false).is_err());
        assert_eq!(binary_op(sub, &Value::Null, &Value::Int(1), true).unwrap(), Value::Null);
    }

    #[test]
    fn indexing() {
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(index_value(&list, &Value::Int(1), false).unwrap(), Value::Int(2));
        assert!(matches!(
            index_value(&list, &Value::Int(5), false).unwrap_err().kind,
            ErrorKind::IndexOutOfBounds { index: 5, len: 2 }
        ));
        assert_eq!(index_value(&list, &Value::Int(5), true).unwrap(), Value::Null);
    }
}
