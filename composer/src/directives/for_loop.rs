use std::sync::Arc;

use tracing::trace;
use weft::tag::Tag;

use super::{attr_location, is_valid_name, string_attr, unexpected};
use crate::build;
use crate::compiler::CompileContext;
use crate::error::{CompileError, ErrorKind, Location, Result, type_error};
use crate::evaluator::Evaluator;
use crate::node::Node;
use crate::scope::{Scope, Variable};
use crate::value::Value;

fn loop_var(value: Value, at: &Location) -> Variable {
    Variable {
        auto: true,
        ..Variable::new(value, Some(at.clone())).constant()
    }
}

/// `<for in={items} [iname=i] [vname=v]>`. With a single name, it binds the
/// value.
pub fn build(cx: &CompileContext, scope: &Arc<Scope>, node: &Node<'_>, tag: &Tag) -> Result<()> {
    let at = Location::new(tag.file_id(), tag.head_span());
    let outer = Scope::branch(scope);
    let ev = Evaluator::new(cx, &outer, tag.file_id());

    let mut values = None;
    let mut iname = None;
    let mut vname = None;
    for attr in &tag.attributes {
        match attr.name.as_str() {
            "in" => values = Some((ev.eval_attribute(attr)?, attr_location(tag, attr))),
            "iname" | "vname" => {
                let name = string_attr(&ev, tag, attr)?;
                if !is_valid_name(&name) {
                    return Err(CompileError::custom(format!("invalid var name `{}`", name))
                        .at(&attr_location(tag, attr)));
                }
                if attr.name == "iname" {
                    iname = Some(name);
                } else {
                    vname = Some(name);
                }
            }
            _ => return Err(unexpected(tag, attr)),
        }
    }
    let Some((values, values_at)) = values else {
        return Err(CompileError::custom("<for> needs an `in` attribute").at(&at));
    };
    let (iname, vname) = match (iname, vname) {
        (Some(only), None) => (None, Some(only)),
        names => names,
    };

    let entries: Vec<(Value, Value)> = match values {
        Value::List(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::Int(i as i64), v))
            .collect(),
        Value::Dict(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
        Value::Null if scope.permissive() => Vec::new(),
        other if other.contains_lazy() => {
            return Err(CompileError::new(ErrorKind::LazyNotAllowed).at(&values_at));
        }
        other => return Err(type_error("list or dict", other.type_name()).at(&values_at)),
    };
    trace!(iterations = entries.len(), "expanding loop");

    for (index, value) in entries {
        let iteration = Scope::branch(&outer);
        if let Some(name) = &iname {
            iteration.set_var(name, loop_var(index, &at))?;
        }
        if let Some(name) = &vname {
            iteration.set_var(name, loop_var(value, &at))?;
        }
        build::build_tags(cx, &iteration, node, &tag.children)?;
    }
    Ok(())
}
