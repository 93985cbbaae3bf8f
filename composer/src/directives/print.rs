use std::sync::Arc;

use weft::tag::Tag;

use super::unexpected;
use crate::compiler::CompileContext;
use crate::error::{CompileError, Location, Result};
use crate::evaluator::Evaluator;
use crate::node::Node;
use crate::scope::Scope;

/// `<print value={expr}/>`: append the value as text.
pub fn build(cx: &CompileContext, scope: &Arc<Scope>, node: &Node<'_>, tag: &Tag) -> Result<()> {
    let at = Location::new(tag.file_id(), tag.head_span());
    if !tag.children.is_empty() {
        return Err(CompileError::custom("<print> can't have children").at(&at));
    }
    let attr = match tag.attributes.as_slice() {
        [attr] if attr.name == "value" => attr,
        [attr, ..] if attr.name != "value" => return Err(unexpected(tag, attr)),
        _ => return Err(CompileError::custom("<print> takes exactly one `value` attribute").at(&at)),
    };
    let value = Evaluator::new(cx, &Scope::sub(scope), tag.file_id()).eval_attribute(attr)?;
    node.append_text(value, Some(at));
    Ok(())
}
