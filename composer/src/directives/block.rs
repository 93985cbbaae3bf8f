use std::sync::Arc;

use tracing::trace;
use weft::tag::Tag;

use super::single_name_attr;
use crate::build;
use crate::compiler::CompileContext;
use crate::error::{Location, Result};
use crate::node::Node;
use crate::scope::Scope;

/// `<block name=..>`: an extension point. Its content lands in a synthetic
/// wrapper, so blocks don't show up in the output or in element counts.
pub fn build(cx: &CompileContext, scope: &Arc<Scope>, node: &Node<'_>, tag: &Tag) -> Result<()> {
    let name = single_name_attr(tag, "name")?;
    let target = node.block_target(tag.id).unwrap_or(name);
    let op = node.pop_op(&target);

    let id = node.append_dummy(Some(Location::new(tag.file_id(), tag.head_span())));
    let wrapper = node.dummy(id);
    let inner = Scope::branch(scope);
    match op {
        Some(op) => {
            trace!(block = %target, batches = op.batches.len(), "applying operation");
            build::apply_operation(cx, &op, Some((&inner, &tag.children)), &wrapper)
        }
        None => build::build_tags(cx, &inner, &wrapper, &tag.children),
    }
}
