//! Functions that need the compilation state rather than just their
//! arguments: scope access, imports, urls and data uris.

use std::fmt::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;
use weft::tag::Tag;

use crate::compiler::FileSource;
use crate::error::{CompileError, ErrorKind, Location, Result, type_error};
use crate::evaluator::{Evaluator, is_global, members};
use crate::functions;
use crate::node::{Node, NodeType};
use crate::output::{OutputId, OutputTree};
use crate::scope::{Scope, Variable};
use crate::template;
use crate::value::Value;

const NAMES: &[&str] = &["svg-uri", "url", "math-uri", "new", "var", "issymbol", "import", "get"];

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

pub fn is_intrinsic(name: &str) -> bool {
    NAMES.contains(&name)
}

fn arity(name: &str, args: &[Value], expected: &str) -> CompileError {
    CompileError::new(ErrorKind::Arity {
        name: name.to_string(),
        expected: expected.to_string(),
        got: args.len(),
    })
}

fn string_arg<'v>(value: &'v Value) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| type_error("string", value.type_name()))
}

pub fn call(ev: &Evaluator<'_>, name: &str, args: Vec<Value>, span: Range<usize>) -> Result<Value> {
    let at = ev.location(span);
    if args.iter().any(Value::contains_lazy) {
        return Err(CompileError::new(ErrorKind::LazyNotAllowed).at(&at));
    }
    trace!(intrinsic = name, args = args.len(), "calling intrinsic");
    let result = match name {
        "new" => declare(ev, args, &at),
        "var" => match args.as_slice() {
            [name] => strict_lookup(ev, string_arg(name)?),
            _ => Err(arity("var", &args, "1 argument")),
        },
        "get" => get(ev, &args),
        "issymbol" => match args.as_slice() {
            [name] => {
                let name = string_arg(name)?;
                Ok(Value::Bool(
                    ev.scope.has_var(name) || ev.scope.has_template(name) || is_global(name),
                ))
            }
            _ => Err(arity("issymbol", &args, "1 argument")),
        },
        "import" => match args.as_slice() {
            [path, name] => dynamic_import(ev, string_arg(path)?, string_arg(name)?),
            _ => Err(arity("import", &args, "2 arguments")),
        },
        "url" => match args.as_slice() {
            [] => registered_url(ev, ev.cx.document(), "this document"),
            [path] => {
                let written = string_arg(path)?;
                let resolved = ev.cx.resolve_path(ev.scope, written).ok();
                let path = resolved
                    .filter(|p| ev.cx.options().urls.contains_key(p))
                    .unwrap_or_else(|| PathBuf::from(written));
                registered_url(ev, Some(&path), written)
            }
            _ => Err(arity("url", &args, "0 or 1 arguments")),
        },
        "svg-uri" => svg_uri(ev, &args, &at),
        "math-uri" => match args.as_slice() {
            [source] => math_uri(ev, &source.to_string()),
            _ => Err(arity("math-uri", &args, "1 argument")),
        },
        _ => Err(ErrorKind::UndefinedFunction(name.to_string()).into()),
    };
    result.map_err(|e| e.or_at(&at))
}

/// `new(name..., value)`: declare each name in the current scope. With more
/// than one name the value must be a list of as many items.
fn declare(ev: &Evaluator<'_>, mut args: Vec<Value>, at: &Location) -> Result<Value> {
    let Some(value) = args.pop() else {
        return Err(arity("new", &args, "a name and a value"));
    };
    if args.is_empty() {
        return Err(arity("new", &[value], "a name and a value"));
    }

    let values = match (&value, args.len()) {
        (_, 1) => vec![value.clone()],
        (Value::List(items), n) if items.len() == n => items.clone(),
        (Value::List(items), n) => {
            return Err(CompileError::new(ErrorKind::Arity {
                name: "new".into(),
                expected: format!("a list of {} values", n),
                got: items.len(),
            }));
        }
        (other, _) => return Err(type_error("list", other.type_name())),
    };

    for (name, value) in args.iter().zip(values) {
        let name = string_arg(name)?;
        if is_global(name) {
            return Err(ErrorKind::GlobalRedefinition(name.to_string()).into());
        }
        ev.scope.set_var(name, Variable::new(value, Some(at.clone())))?;
    }
    Ok(value)
}

fn strict_lookup(ev: &Evaluator<'_>, name: &str) -> Result<Value> {
    if let Some(var) = ev.scope.get_var(name) {
        return Ok(var.value);
    }
    if let Some((head, path)) = name.split_once('.') {
        if let Some(var) = ev.scope.get_var(head) {
            return members(var.value, path, ev.permissive());
        }
    }
    Err(ErrorKind::UndefinedVariable(name.to_string()).into())
}

/// `get(name[, fallback])`: variable, builtin, fallback, member path.
fn get(ev: &Evaluator<'_>, args: &[Value]) -> Result<Value> {
    let (name, fallback) = match args {
        [name] => (string_arg(name)?, None),
        [name, fallback] => (string_arg(name)?, Some(fallback)),
        _ => return Err(arity("get", args, "1 or 2 arguments")),
    };

    if let Some(var) = ev.scope.get_var(name) {
        return Ok(var.value);
    }
    if functions::exists(name) {
        return Ok(Value::Function(name.to_string()));
    }
    if let Some(fallback) = fallback {
        return Ok(fallback.clone());
    }
    if let Some((head, path)) = name.split_once('.') {
        if let Some(var) = ev.scope.get_var(head) {
            return members(var.value, path, ev.permissive());
        }
    }
    if ev.permissive() {
        return Ok(Value::Null);
    }
    Err(CompileError::new(ErrorKind::UndefinedVariable(name.to_string()))
        .with_note(format!("available names: {}", ev.scope.list_names().join(", "))))
}

fn dynamic_import(ev: &Evaluator<'_>, path: &str, name: &str) -> Result<Value> {
    if path == "." {
        return Err(CompileError::custom("can't import dynamically from self"));
    }
    let resolved = ev.cx.resolve_path(ev.scope, path)?;
    let entry = ev
        .cx
        .build_file(FileSource::Path(resolved.clone()), false, None)?;
    if let Some(this) = ev.scope.path() {
        ev.cx.add_dependency(this, &resolved, true);
    }

    if entry.scope.local_template(name).is_some() {
        return Err(CompileError::custom(format!(
            "can't dynamically import `{}` from {}: it is a template",
            name, path
        )));
    }
    entry
        .scope
        .local_var(name)
        .map(|v| v.value)
        .ok_or_else(|| {
            ErrorKind::NotFoundInModule {
                name: name.to_string(),
                module: path.to_string(),
            }
            .into()
        })
}

fn registered_url(ev: &Evaluator<'_>, path: Option<&Path>, shown: &str) -> Result<Value> {
    let options = ev.cx.options();
    match path.and_then(|p| options.urls.get(p)) {
        Some(url) => Ok(Value::String(url.clone())),
        None if options.ignore_unset_urls => Ok(Value::string("")),
        None => Err(CompileError::custom(format!("no url registered for {}", shown))),
    }
}

/// Escape for a `data:` uri inside `url('...')`.
fn escape_uri(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        let keep = b.is_ascii_alphanumeric() || b"-_.~$&+:=@ /,;".contains(&b);
        if keep {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{:02X}", b);
        }
    }
    out
}

fn data_uri(svg: &str) -> Value {
    Value::String(format!("url('data:image/svg+xml;utf8,{}')", escape_uri(svg)))
}

/// `svg-uri(template[, attrs])`: expand `template` on its own and inline the
/// resulting svg document.
fn svg_uri(ev: &Evaluator<'_>, args: &[Value], at: &Location) -> Result<Value> {
    let (name, attrs) = match args {
        [name] => (string_arg(name)?, IndexMap::new()),
        [name, Value::Dict(attrs)] => (string_arg(name)?, attrs.clone()),
        [_, other] => return Err(type_error("dict", other.type_name())),
        _ => return Err(arity("svg-uri", args, "1 or 2 arguments")),
    };
    let template = ev
        .scope
        .get_template(name)
        .ok_or_else(|| CompileError::new(ErrorKind::UndefinedTemplate(name.to_string())))?;

    let shared = OutputTree::new().shared();
    let root = Node::root(shared.clone(), OutputId::ROOT, NodeType::Svg);
    let no_children: Arc<[Tag]> = Arc::from(Vec::new());
    template::build_template_with(ev.cx, &Scope::sub(ev.scope), &root, &template, attrs, &no_children, at)?;

    let mut tree = shared.lock().clone();
    tree.fold_synthetic(OutputId::ROOT);
    let svg = match tree.children(OutputId::ROOT) {
        [only] if tree.name(*only) == Some("svg") => *only,
        _ => {
            return Err(CompileError::custom(format!(
                "svg-uri: <{}> must produce a single <svg>",
                name
            )));
        }
    };
    tree.set_attribute(svg, "xmlns", Value::string(SVG_NS));
    tree.set_attribute(svg, "xmlns:xlink", Value::string(XLINK_NS));
    tree.finalize(OutputId::ROOT)?;
    Ok(data_uri(&tree.render(OutputId::ROOT)))
}

fn math_uri(ev: &Evaluator<'_>, source: &str) -> Result<Value> {
    let renderer = ev
        .cx
        .math_renderer()
        .ok_or_else(|| CompileError::custom("math-uri: no math renderer is installed"))?;
    let svg = renderer
        .render_svg(source)
        .map_err(|message| CompileError::custom(format!("math-uri: {}", message)))?;
    Ok(data_uri(&svg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_escape_keeps_markup_readable() {
        assert_eq!(escape_uri("<a b=\"1\">"), "%3Ca b=%221%22%3E");
        assert_eq!(escape_uri("#fff"), "%23fff");
    }
}
