//! The builtin function table.

use indexmap::IndexMap;

use crate::error::{CompileError, ErrorKind, Result, type_error};
use crate::value::{Color, Value};

const NAMES: &[&str] = &[
    "len", "str", "int", "float", "upper", "lower", "join", "concat", "range", "keys", "values",
    "eq", "neq", "contains", "min", "max", "round", "ifelse", "isnull", "rgb", "rgba",
];

pub fn exists(name: &str) -> bool {
    NAMES.contains(&name)
}

pub fn names() -> &'static [&'static str] {
    NAMES
}

fn arity(name: &str, args: &[Value], expected: std::ops::RangeInclusive<usize>) -> Result<()> {
    if expected.contains(&args.len()) {
        return Ok(());
    }
    let expected = if expected.start() == expected.end() {
        format!("{} argument(s)", expected.start())
    } else {
        format!("{} to {} arguments", expected.start(), expected.end())
    };
    Err(ErrorKind::Arity {
        name: name.to_string(),
        expected,
        got: args.len(),
    }
    .into())
}

fn string_arg<'v>(value: &'v Value) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| type_error("string", value.type_name()))
}

fn int_arg(value: &Value) -> Result<i64> {
    value
        .as_int()
        .ok_or_else(|| type_error("int", value.type_name()))
}

fn number_arg(value: &Value) -> Result<f64> {
    value
        .as_number()
        .map(|(n, _)| n)
        .ok_or_else(|| type_error("number", value.type_name()))
}

fn channel(value: &Value) -> Result<u8> {
    let n = int_arg(value)?;
    u8::try_from(n).map_err(|_| CompileError::custom(format!("color channel {} out of range", n)))
}

/// Call builtin `name`. Arguments are fully resolved.
pub fn call(name: &str, args: Vec<Value>) -> Result<Value> {
    match name {
        "len" => {
            arity(name, &args, 1..=1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Dict(map) => map.len(),
                other => return Err(type_error("string, list or dict", other.type_name())),
            };
            Ok(Value::Int(n as i64))
        }
        "str" => {
            arity(name, &args, 1..=1)?;
            Ok(Value::String(args[0].to_string()))
        }
        "int" => {
            arity(name, &args, 1..=1)?;
            match &args[0] {
                Value::Int(n) => Ok(Value::Int(*n)),
                Value::Float { value, .. } => Ok(Value::Int(value.trunc() as i64)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::String(s) => s
                    .trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|_| CompileError::custom(format!("can't convert \"{}\" to int", s))),
                other => Err(type_error("number or string", other.type_name())),
            }
        }
        "float" => {
            arity(name, &args, 1..=1)?;
            match &args[0] {
                Value::String(s) => s
                    .trim()
                    .parse()
                    .map(Value::float)
                    .map_err(|_| CompileError::custom(format!("can't convert \"{}\" to float", s))),
                other => Ok(Value::float(number_arg(other)?)),
            }
        }
        "upper" => {
            arity(name, &args, 1..=1)?;
            Ok(Value::String(string_arg(&args[0])?.to_uppercase()))
        }
        "lower" => {
            arity(name, &args, 1..=1)?;
            Ok(Value::String(string_arg(&args[0])?.to_lowercase()))
        }
        "join" => {
            arity(name, &args, 1..=2)?;
            let Value::List(items) = &args[0] else {
                return Err(type_error("list", args[0].type_name()));
            };
            let sep = match args.get(1) {
                Some(sep) => string_arg(sep)?,
                None => "",
            };
            let parts: Vec<String> = items.iter().map(Value::to_string).collect();
            Ok(Value::String(parts.join(sep)))
        }
        "concat" => {
            if args.iter().all(|a| matches!(a, Value::List(_))) {
                let mut out = Vec::new();
                for arg in args {
                    if let Value::List(items) = arg {
                        out.extend(items);
                    }
                }
                Ok(Value::List(out))
            } else {
                Ok(Value::String(args.iter().map(Value::to_string).collect()))
            }
        }
        "range" => {
            arity(name, &args, 1..=3)?;
            let (start, end, step) = match args.as_slice() {
                [end] => (0, int_arg(end)?, 1),
                [start, end] => (int_arg(start)?, int_arg(end)?, 1),
                _ => (int_arg(&args[0])?, int_arg(&args[1])?, int_arg(&args[2])?),
            };
            if step == 0 {
                return Err(CompileError::custom("range step can't be zero"));
            }
            let mut out = Vec::new();
            let mut i = start;
            while (step > 0 && i < end) || (step < 0 && i > end) {
                out.push(Value::Int(i));
                match i.checked_add(step) {
                    Some(next) => i = next,
                    None => break,
                }
            }
            Ok(Value::List(out))
        }
        "keys" | "values" => {
            arity(name, &args, 1..=1)?;
            let Value::Dict(map) = &args[0] else {
                return Err(type_error("dict", args[0].type_name()));
            };
            Ok(Value::List(if name == "keys" {
                map.keys().cloned().map(Value::String).collect()
            } else {
                map.values().cloned().collect()
            }))
        }
        "eq" => {
            arity(name, &args, 2..=2)?;
            Ok(Value::Bool(args[0] == args[1]))
        }
        "neq" => {
            arity(name, &args, 2..=2)?;
            Ok(Value::Bool(args[0] != args[1]))
        }
        "contains" => {
            arity(name, &args, 2..=2)?;
            let found = match (&args[0], &args[1]) {
                (Value::List(items), item) => items.contains(item),
                (Value::Dict(map), Value::String(key)) => map.contains_key(key),
                (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
                (other, _) => return Err(type_error("list, dict or string", other.type_name())),
            };
            Ok(Value::Bool(found))
        }
        "min" | "max" => {
            let items = match args.first() {
                Some(Value::List(inner)) if args.len() == 1 => inner.clone(),
                _ => args.clone(),
            };
            let mut best: Option<(f64, Value)> = None;
            for item in items {
                let n = number_arg(&item)?;
                let better = match &best {
                    None => true,
                    Some((b, _)) => (name == "min" && n < *b) || (name == "max" && n > *b),
                };
                if better {
                    best = Some((n, item));
                }
            }
            best.map(|(_, v)| v).ok_or_else(|| {
                CompileError::new(ErrorKind::Arity {
                    name: name.to_string(),
                    expected: "at least one value".to_string(),
                    got: 0,
                })
            })
        }
        "round" => {
            arity(name, &args, 1..=2)?;
            let (n, unit) = args[0]
                .as_number()
                .ok_or_else(|| type_error("number", args[0].type_name()))?;
            match args.get(1) {
                None if unit.is_none() => Ok(Value::Int(n.round() as i64)),
                None => Ok(Value::Float {
                    value: n.round(),
                    unit: unit.map(str::to_string),
                }),
                Some(digits) => {
                    let factor = 10f64.powi(int_arg(digits)? as i32);
                    Ok(Value::Float {
                        value: (n * factor).round() / factor,
                        unit: unit.map(str::to_string),
                    })
                }
            }
        }
        "ifelse" => {
            arity(name, &args, 3..=3)?;
            let chosen = if args[0].as_condition(false)? { 1 } else { 2 };
            Ok(args[chosen].clone())
        }
        "isnull" => {
            arity(name, &args, 1..=1)?;
            Ok(Value::Bool(args[0].is_null()))
        }
        "rgb" | "rgba" => {
            let n = if name == "rgb" { 3 } else { 4 };
            arity(name, &args, n..=n)?;
            let a = match args.get(3) {
                Some(alpha) => {
                    let alpha = number_arg(alpha)?;
                    if !(0.0..=1.0).contains(&alpha) {
                        return Err(CompileError::custom(format!("alpha {} out of range", alpha)));
                    }
                    (alpha * 255.0).round() as u8
                }
                None => 255,
            };
            Ok(Value::Color(Color {
                r: channel(&args[0])?,
                g: channel(&args[1])?,
                b: channel(&args[2])?,
                a,
            }))
        }
        _ => Err(ErrorKind::UndefinedFunction(name.to_string()).into()),
    }
}

/// Dump of a parameter dict, stable for equal inputs. Used in cache keys.
pub fn dump(params: &IndexMap<String, Value>) -> String {
    let mut entries: Vec<String> = params
        .iter()
        .map(|(k, v)| format!("{}={:?}", k, v.to_string()))
        .collect();
    entries.sort();
    entries.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_ok(name: &str, args: Vec<Value>) -> Value {
        call(name, args).unwrap()
    }

    #[test]
    fn strings_and_lists() {
        assert_eq!(call_ok("len", vec!["héllo".into()]), Value::Int(5));
        assert_eq!(call_ok("upper", vec!["ab".into()]), Value::from("AB"));
        let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(call_ok("join", vec![list.clone(), "-".into()]), Value::from("1-2"));
        assert_eq!(call_ok("contains", vec![list, Value::Int(2)]), Value::Bool(true));
    }

    #[test]
    fn range_forms() {
        let ints = |v: &[i64]| Value::List(v.iter().map(|n| Value::Int(*n)).collect());
        assert_eq!(call_ok("range", vec![Value::Int(3)]), ints(&[0, 1, 2]));
        assert_eq!(call_ok("range", vec![Value::Int(1), Value::Int(3)]), ints(&[1, 2]));
        assert_eq!(
            call_ok("range", vec![Value::Int(3), Value::Int(0), Value::Int(-1)]),
            ints(&[3, 2, 1])
        );
        assert!(call("range", vec![Value::Int(0), Value::Int(3), Value::Int(0)]).is_err());
        assert_eq!(
            call_ok("range", vec![Value::Int(i64::MAX - 1), Value::Int(i64::MAX), Value::Int(5)]),
            ints(&[i64::MAX - 1])
        );
    }

    #[test]
    fn arity_errors_name_the_function() {
        let err = call("upper", vec![]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Arity { ref name, got: 0, .. } if name == "upper"));
    }

    #[test]
    fn colors() {
        assert_eq!(
            call_ok("rgba", vec![Value::Int(0), Value::Int(0), Value::Int(0), Value::float(0.5)])
                .to_string(),
            "rgba(0, 0, 0, 0.5)"
        );
        assert!(call("rgb", vec![Value::Int(300), Value::Int(0), Value::Int(0)]).is_err());
    }

    #[test]
    fn min_max_accept_a_list() {
        let list = Value::List(vec![Value::Int(4), Value::Int(-1), Value::Int(9)]);
        assert_eq!(call_ok("min", vec![list.clone()]), Value::Int(-1));
        assert_eq!(call_ok("max", vec![Value::Int(1), Value::Int(2)]), Value::Int(2));
    }
}
