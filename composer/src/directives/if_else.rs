use std::sync::Arc;

use weft::tag::Tag;

use super::attr_location;
use crate::build;
use crate::compiler::CompileContext;
use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::evaluator::Evaluator;
use crate::node::Node;
use crate::scope::Scope;

/// Expand the branch of `tag` when its `cond` holds. Returns whether it did.
fn conditional(cx: &CompileContext, scope: &Arc<Scope>, node: &Node<'_>, tag: &Tag) -> Result<bool> {
    let branch = Scope::branch(scope);
    let ev = Evaluator::new(cx, &branch, tag.file_id());
    let attr = match tag.attributes.as_slice() {
        [attr] if attr.name == "cond" => attr,
        _ => {
            return Err(CompileError::new(ErrorKind::Structure(format!(
                "<{}> takes exactly one `cond` attribute",
                tag.name
            )))
            .at(&Location::new(tag.file_id(), tag.head_span())));
        }
    };
    let value = ev.eval_attribute(attr)?;
    let here = attr_location(tag, attr);
    if value.contains_lazy() {
        return Err(CompileError::new(ErrorKind::LazyNotAllowed).at(&here));
    }
    let cond = value.as_condition(scope.permissive()).map_err(|e| e.or_at(&here))?;
    if cond {
        build::build_tags(cx, &branch, node, &tag.children)?;
    }
    Ok(cond)
}

/// The `ifelse` group the parser makes of consecutive `if`/`elseif`/`else`.
pub fn build(cx: &CompileContext, scope: &Arc<Scope>, node: &Node<'_>, tag: &Tag) -> Result<()> {
    if let Some(attr) = tag.attributes.first() {
        return Err(super::unexpected(tag, attr));
    }

    let mut seen_if: Option<Location> = None;
    let mut seen_else: Option<Location> = None;
    let mut done = false;
    for child in tag.element_children() {
        let here = Location::new(child.file_id(), child.head_span());
        match child.name.as_str() {
            "if" => {
                if let Some(first) = &seen_if {
                    return Err(CompileError::custom("if already defined")
                        .at(&here)
                        .with_note_at("first if here", first));
                }
                seen_if = Some(here);
                if !done {
                    done = conditional(cx, scope, node, child)?;
                }
            }
            "elseif" | "else" if seen_if.is_none() => {
                return Err(CompileError::custom("if not yet defined").at(&here));
            }
            "elseif" | "else" if seen_else.is_some() => {
                let err = CompileError::custom(format!("<{}> after else", child.name)).at(&here);
                return Err(match &seen_else {
                    Some(prev) => err.with_note_at("else defined here", prev),
                    None => err,
                });
            }
            "elseif" => {
                if !done {
                    done = conditional(cx, scope, node, child)?;
                }
            }
            "else" => {
                if let Some(attr) = child.attributes.first() {
                    return Err(super::unexpected(child, attr));
                }
                seen_else = Some(here);
                if !done {
                    build::build_tags(cx, &Scope::branch(scope), node, &child.children)?;
                    done = true;
                }
            }
            other => {
                return Err(CompileError::new(ErrorKind::Structure(format!(
                    "invalid ifelse directive <{}>",
                    other
                )))
                .at(&here));
            }
        }
    }
    Ok(())
}
