use std::sync::Arc;

use weft::tag::Tag;

use super::{attr_location, flag_attr, unexpected};
use crate::build;
use crate::compiler::CompileContext;
use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::evaluator::Evaluator;
use crate::node::Node;
use crate::scope::Scope;
use crate::value::Value;

/// Expand `tag` if it matches. Returns true when the switch is done, i.e. it
/// matched and doesn't fall through.
fn case(
    cx: &CompileContext,
    scope: &Arc<Scope>,
    node: &Node<'_>,
    subject: Option<&Value>,
    tag: &Tag,
) -> Result<bool> {
    let branch = Scope::branch(scope);
    let ev = Evaluator::new(cx, &branch, tag.file_id());
    let mut value = None;
    let mut fallthrough = false;
    for attr in &tag.attributes {
        match attr.name.as_str() {
            "value" => value = Some((ev.eval_attribute(attr)?, attr_location(tag, attr))),
            "fallthrough" => fallthrough = flag_attr(&ev, tag, attr)?,
            _ => return Err(unexpected(tag, attr)),
        }
    }
    let Some((value, here)) = value else {
        return Err(CompileError::custom("switch case value not found")
            .at(&Location::new(tag.file_id(), tag.head_span())));
    };
    if value.contains_lazy() {
        return Err(CompileError::new(ErrorKind::LazyNotAllowed).at(&here));
    }

    let matched = match subject {
        Some(subject) => *subject == value,
        None => value.as_condition(scope.permissive()).map_err(|e| e.or_at(&here))?,
    };
    if matched {
        build::build_tags(cx, &branch, node, &tag.children)?;
    }
    Ok(matched && !fallthrough)
}

/// `<switch [value={v}]>` with `case` and `default` children.
pub fn build(cx: &CompileContext, scope: &Arc<Scope>, node: &Node<'_>, tag: &Tag) -> Result<()> {
    let outer = Scope::branch(scope);
    let ev = Evaluator::new(cx, &outer, tag.file_id());
    let mut subject = None;
    for attr in &tag.attributes {
        match attr.name.as_str() {
            "value" => {
                let value = ev.eval_attribute(attr)?;
                if value.contains_lazy() {
                    return Err(CompileError::new(ErrorKind::LazyNotAllowed)
                        .at(&attr_location(tag, attr)));
                }
                subject = Some(value);
            }
            _ => return Err(unexpected(tag, attr)),
        }
    }

    let mut default_at: Option<Location> = None;
    let mut done = false;
    for child in tag.element_children() {
        let here = Location::new(child.file_id(), child.head_span());
        match child.name.as_str() {
            "case" => {
                if let Some(default) = &default_at {
                    return Err(CompileError::custom("case after default")
                        .at(&here)
                        .with_note_at("default defined here", default));
                }
                if !done {
                    done = case(cx, &outer, node, subject.as_ref(), child)?;
                }
            }
            "default" => {
                if let Some(first) = &default_at {
                    return Err(CompileError::custom("default defined more than once")
                        .at(&here)
                        .with_note_at("first defined here", first));
                }
                if let Some(attr) = child.attributes.first() {
                    return Err(unexpected(child, attr));
                }
                default_at = Some(here);
                if !done {
                    build::build_tags(cx, &Scope::branch(&outer), node, &child.children)?;
                    done = true;
                }
            }
            other => {
                return Err(CompileError::new(ErrorKind::Structure(format!(
                    "invalid switch directive <{}>",
                    other
                )))
                .at(&here));
            }
        }
    }
    Ok(())
}
