use std::sync::Arc;

use tracing::trace;
use weft::tag::Tag;

use super::{attr_location, flag_attr, is_valid_name};
use crate::compiler::CompileContext;
use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::evaluator::{Evaluator, is_global};
use crate::scope::{Scope, Variable};

/// `<var name={value} [export] [constant]/>`
pub fn build(cx: &CompileContext, scope: &Arc<Scope>, tag: &Tag) -> Result<()> {
    let at = Location::new(tag.file_id(), tag.head_span());
    if !tag.children.is_empty() {
        return Err(CompileError::new(ErrorKind::Structure(
            "unexpected child tags of <var>".into(),
        ))
        .at(&at));
    }

    let attr_scope = Scope::sub(scope);
    let ev = Evaluator::new(cx, &attr_scope, tag.file_id());
    let mut exported = false;
    let mut constant = false;
    let mut binding = None;
    for attr in &tag.attributes {
        match attr.name.as_str() {
            "export" => exported = flag_attr(&ev, tag, attr)?,
            "constant" => constant = flag_attr(&ev, tag, attr)?,
            _ if binding.is_none() => binding = Some(attr),
            _ => {
                return Err(CompileError::new(ErrorKind::Structure(
                    "<var> declares exactly one variable".into(),
                ))
                .at(&attr_location(tag, attr)));
            }
        }
    }
    let Some(attr) = binding else {
        return Err(CompileError::new(ErrorKind::Structure(
            "<var> needs a `name={value}` attribute".into(),
        ))
        .at(&at));
    };

    let name = attr.name.as_str();
    let here = attr_location(tag, attr);
    if !is_valid_name(name) {
        return Err(CompileError::custom(format!("invalid var name `{}`", name)).at(&here));
    }
    if is_global(name) {
        return Err(CompileError::new(ErrorKind::GlobalRedefinition(name.to_string())).at(&here));
    }
    if let Some(prev) = scope.get_var(name) {
        // the same declaration seen again, as in a loop body, is fine
        if prev.origin.as_ref() != Some(&here) {
            let err = CompileError::new(ErrorKind::Redefinition(name.to_string())).at(&here);
            return Err(match &prev.origin {
                Some(origin) => err.with_note_at("defined here", origin),
                None => err,
            });
        }
    }

    let value = ev.eval_attribute(attr)?;
    trace!(var = %name, exported, constant, "declared variable");
    let var = Variable {
        constant,
        ..Variable::new(value, Some(here.clone())).exported(exported)
    };
    scope.set_var(name, var).map_err(|e| e.or_at(&here))
}
