use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{Result, type_error};
use crate::output::{FinalTag, OutputId, SharedTree};

/// An RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            let alpha = format_number((f64::from(self.a) / 255.0 * 100.0).round() / 100.0);
            write!(f, "rgba({}, {}, {}, {})", self.r, self.g, self.b, alpha)
        }
    }
}

/// A value that can only be computed once the output tree is final.
#[derive(Clone)]
pub struct Lazy(Arc<dyn Fn(&FinalTag<'_>) -> Result<Value> + Send + Sync>);

impl Lazy {
    pub fn new(f: impl Fn(&FinalTag<'_>) -> Result<Value> + Send + Sync + 'static) -> Self {
        Lazy(Arc::new(f))
    }

    pub fn resolve(&self, tag: &FinalTag<'_>) -> Result<Value> {
        (self.0)(tag)
    }
}

impl fmt::Debug for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Lazy(..)")
    }
}

/// Points at the output element whose inline style a template instance
/// inherits from.
#[derive(Clone)]
pub struct StyleHandle {
    pub tree: SharedTree,
    pub id: OutputId,
}

impl StyleHandle {
    pub fn search(&self, key: &str, permissive: bool) -> Result<Value> {
        self.tree.lock().search_style(self.id, key, permissive)
    }
}

impl fmt::Debug for StyleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StyleHandle({:?})", self.id)
    }
}

/// A runtime value produced by evaluating an expression.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float { value: f64, unit: Option<String> },
    Color(Color),
    String(String),
    List(Vec<Value>),
    Dict(IndexMap<String, Value>),
    /// A builtin function referenced by name.
    Function(String),
    ParentStyle(StyleHandle),
    Lazy(Lazy),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn float(value: f64) -> Self {
        Value::Float { value, unit: None }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float { .. } => "float",
            Value::Color(_) => "color",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::ParentStyle(_) => "parent style",
            Value::Lazy(_) => "lazy value",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Value::Lazy(_))
    }

    /// Interpret as a condition. Only booleans qualify; null counts as false
    /// in permissive mode.
    pub fn as_condition(&self, permissive: bool) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Null if permissive => Ok(false),
            Value::Lazy(_) => Err(crate::error::ErrorKind::LazyNotAllowed.into()),
            other => Err(type_error("bool", other.type_name())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float { value, unit: None } if value.fract() == 0.0 => Some(*value as i64),
            _ => None,
        }
    }

    /// Numeric value and unit, for arithmetic.
    pub fn as_number(&self) -> Option<(f64, Option<&str>)> {
        match self {
            Value::Int(n) => Some((*n as f64, None)),
            Value::Float { value, unit } => Some((*value, unit.as_deref())),
            _ => None,
        }
    }

    /// Resolve a lazy value (and any lazies nested in lists and dicts)
    /// against the final tag it is attached to.
    pub fn resolve(&self, tag: &FinalTag<'_>) -> Result<Value> {
        match self {
            Value::Lazy(lazy) => lazy.resolve(tag)?.resolve(tag),
            Value::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|v| v.resolve(tag))
                    .collect::<Result<_>>()?,
            )),
            Value::Dict(map) => Ok(Value::Dict(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.resolve(tag)?)))
                    .collect::<Result<_>>()?,
            )),
            other => Ok(other.clone()),
        }
    }

    /// True if this value, or something nested in it, still needs the final tree.
    pub fn contains_lazy(&self) -> bool {
        match self {
            Value::Lazy(_) => true,
            Value::List(items) => items.iter().any(Value::contains_lazy),
            Value::Dict(map) => map.values().any(Value::contains_lazy),
            _ => false,
        }
    }
}

/// Apply `f` to `args` now, or, when any of them is lazy, return a lazy value
/// that applies `f` once the tree is final.
pub fn defer(
    args: Vec<Value>,
    f: impl Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
) -> Result<Value> {
    if !args.iter().any(Value::contains_lazy) {
        return f(args);
    }
    Ok(Value::Lazy(Lazy::new(move |tag| {
        let resolved = args
            .iter()
            .map(|a| a.resolve(tag))
            .collect::<Result<Vec<_>>>()?;
        f(resolved)
    })))
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_finite() && n == n.floor() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float { value, unit } => {
                write!(f, "{}{}", format_number(*value), unit.as_deref().unwrap_or(""))
            }
            Value::Color(c) => write!(f, "{}", c),
            Value::String(s) => f.write_str(s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Dict(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Function(name) => write!(f, "{}", name),
            Value::ParentStyle(_) => write!(f, "[parent style]"),
            Value::Lazy(_) => write!(f, "[lazy]"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(a), Value::Float { value, unit: None })
            | (Value::Float { value, unit: None }, Value::Int(a)) => *a as f64 == *value,
            (
                Value::Float { value: a, unit: ua },
                Value::Float { value: b, unit: ub },
            ) => a == b && ua == ub,
            (Value::Color(a), Value::Color(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            // parent styles and lazies have no identity worth comparing
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_template_friendly() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(
            Value::Float {
                value: 2.0,
                unit: Some("px".into())
            }
            .to_string(),
            "2px"
        );
        assert_eq!(Value::float(1.5).to_string(), "1.5");
        assert_eq!(
            Value::Color(Color {
                r: 255,
                g: 0,
                b: 16,
                a: 255
            })
            .to_string(),
            "#ff0010"
        );
        assert_eq!(
            Value::List(vec![Value::Int(1), "a".into()]).to_string(),
            "[1, a]"
        );
    }

    #[test]
    fn ints_and_unitless_floats_compare_numerically() {
        assert_eq!(Value::Int(3), Value::float(3.0));
        assert_ne!(
            Value::Int(3),
            Value::Float {
                value: 3.0,
                unit: Some("px".into())
            }
        );
    }

    #[test]
    fn conditions_require_booleans() {
        assert!(Value::Bool(true).as_condition(false).unwrap());
        assert!(Value::Int(1).as_condition(false).is_err());
        assert!(Value::Null.as_condition(false).is_err());
        assert!(!Value::Null.as_condition(true).unwrap());
    }

    #[test]
    fn defer_is_eager_without_lazies() {
        let v = defer(vec![Value::Int(1), Value::Int(2)], |args| {
            Ok(Value::Int(args.len() as i64))
        })
        .unwrap();
        assert_eq!(v, Value::Int(2));

        let lazy = Value::Lazy(Lazy::new(|_| Ok(Value::Int(5))));
        let v = defer(vec![lazy], |args| Ok(args[0].clone())).unwrap();
        assert!(v.is_lazy());
    }
}
