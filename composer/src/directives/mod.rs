//! Built-in directive tags.

mod block;
mod for_loop;
mod if_else;
pub(crate) mod import;
mod print;
mod switch;
mod var;

use std::sync::Arc;

use weft::tag::{Attribute, Tag};

use crate::compiler::CompileContext;
use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::evaluator::Evaluator;
use crate::node::Node;
use crate::scope::Scope;
use crate::template;
use crate::value::Value;

const DIRECTIVES: &[&str] = &[
    "template", "var", "for", "ifelse", "if", "elseif", "else", "switch", "case", "default",
    "import", "export", "print", "block", "append", "replace", "parameters", "permissive",
];

/// Names a template can't take: directives and tags with special handling.
const RESERVED: &[&str] = &["script", "style", "prepend"];

pub fn is_directive(name: &str) -> bool {
    DIRECTIVES.contains(&name)
}

pub fn is_reserved(name: &str) -> bool {
    is_directive(name) || RESERVED.contains(&name)
}

/// Expand directive `tag`.
pub fn build(cx: &CompileContext, scope: &Arc<Scope>, node: &Node<'_>, tag: &Tag) -> Result<()> {
    let at = Location::new(tag.file_id(), tag.head_span());
    let result = match tag.name.as_str() {
        "template" => template::define(cx, scope, tag),
        "var" => var::build(cx, scope, tag),
        "for" => for_loop::build(cx, scope, node, tag),
        "ifelse" => if_else::build(cx, scope, node, tag),
        "switch" => switch::build(cx, scope, node, tag),
        "import" => import::build(cx, scope, tag, false),
        "export" => import::build(cx, scope, tag, true),
        "print" => print::build(cx, scope, node, tag),
        "block" => block::build(cx, scope, node, tag),
        "append" | "replace" => Err(misplaced(tag, "is only valid directly inside a template call")),
        "if" | "elseif" | "else" => Err(misplaced(tag, "must be part of an if/elseif/else chain")),
        "case" | "default" => Err(misplaced(tag, "is only valid inside <switch>")),
        _ => Err(misplaced(tag, "must come first in its file")),
    };
    result.map_err(|e| e.or_at(&at))
}

fn misplaced(tag: &Tag, what: &str) -> CompileError {
    CompileError::new(ErrorKind::Structure(format!("<{}> {}", tag.name, what)))
        .at(&Location::new(tag.file_id(), tag.head_span()))
}

pub(crate) fn attr_location(tag: &Tag, attr: &Attribute) -> Location {
    Location::new(tag.file_id(), attr.span.clone())
}

pub(crate) fn unexpected(tag: &Tag, attr: &Attribute) -> CompileError {
    CompileError::new(ErrorKind::UnexpectedAttribute {
        tag: tag.name.clone(),
        attr: attr.name.clone(),
    })
    .at(&attr_location(tag, attr))
}

/// The plain string value of `tag`'s only attribute, which must be `key`.
/// Used by `block`, `append` and `replace`.
pub fn single_name_attr(tag: &Tag, key: &str) -> Result<String> {
    match tag.attributes.as_slice() {
        [attr] if attr.name == key => attr.as_plain_text().map(str::to_string).ok_or_else(|| {
            CompileError::new(ErrorKind::Structure(format!(
                "`{}` of <{}> must be a plain string",
                key, tag.name
            )))
            .at(&attr_location(tag, attr))
        }),
        _ => Err(CompileError::new(ErrorKind::Structure(format!(
            "<{}> takes exactly one `{}` attribute",
            tag.name, key
        )))
        .at(&Location::new(tag.file_id(), tag.head_span()))),
    }
}

/// Evaluate an attribute that must produce a string.
pub(crate) fn string_attr(ev: &Evaluator<'_>, tag: &Tag, attr: &Attribute) -> Result<String> {
    match ev.eval_attribute(attr)? {
        Value::String(s) => Ok(s),
        other => Err(crate::error::type_error("string", other.type_name()).at(&attr_location(tag, attr))),
    }
}

/// Evaluate a boolean flag attribute; a bare flag is true.
pub(crate) fn flag_attr(ev: &Evaluator<'_>, tag: &Tag, attr: &Attribute) -> Result<bool> {
    ev.eval_attribute(attr)?
        .as_condition(false)
        .map_err(|e| e.or_at(&attr_location(tag, attr)))
}

/// Variable names: a letter or `_`, then letters, digits, `_` or `-`.
pub(crate) fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_names() {
        assert!(is_valid_name("x"));
        assert!(is_valid_name("__idx__"));
        assert!(is_valid_name("max-width"));
        assert!(!is_valid_name("1x"));
        assert!(!is_valid_name("ui.card"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn reserved_names_include_directives() {
        assert!(is_reserved("block"));
        assert!(is_reserved("style"));
        assert!(!is_reserved("card"));
    }
}
