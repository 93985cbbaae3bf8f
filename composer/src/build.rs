//! Tag expansion: the dispatch every source tag goes through.

use std::sync::Arc;

use indexmap::IndexMap;
use weft::tag::{Tag, TagKind};

use crate::compiler::CompileContext;
use crate::directives;
use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::evaluator::Evaluator;
use crate::html;
use crate::node::{Node, NodeType};
use crate::operation::{Operation, OperationKind};
use crate::scope::Scope;
use crate::template::{self, FORCE_MARKER};
use crate::value::Value;

pub fn build_tags(
    cx: &CompileContext,
    scope: &Arc<Scope>,
    node: &Node<'_>,
    tags: &[Tag],
) -> Result<()> {
    for tag in tags {
        build_tag(cx, scope, node, tag)?;
    }
    Ok(())
}

pub fn build_tag(cx: &CompileContext, scope: &Arc<Scope>, node: &Node<'_>, tag: &Tag) -> Result<()> {
    if let TagKind::Text(text) = &tag.kind {
        let value = Evaluator::new(cx, scope, tag.file_id()).eval_template_string(text, false)?;
        node.append_text(value, Some(Location::new(tag.file_id(), tag.span.clone())));
        return Ok(());
    }
    if scope.has_template(&tag.name) {
        return template::build_template(cx, scope, node, tag);
    }
    if directives::is_directive(&tag.name) {
        return directives::build(cx, scope, node, tag);
    }
    build_element(cx, scope, node, tag)
}

fn build_element(cx: &CompileContext, scope: &Arc<Scope>, node: &Node<'_>, tag: &Tag) -> Result<()> {
    let origin = Location::new(tag.file_id(), tag.head_span());
    let attr_scope = Scope::sub(scope);
    let attributes = Evaluator::new(cx, &attr_scope, tag.file_id()).eval_attributes(tag)?;
    let spec = TreeSpec {
        name: &tag.name,
        node_type: node.node_type(),
        attributes,
        children: &tag.children,
        op: None,
        origin,
    };
    build_tree(cx, scope, node, spec).map_err(|err| with_hint(err, &tag.name, node))
}

fn with_hint(err: CompileError, name: &str, node: &Node<'_>) -> CompileError {
    if !matches!(err.kind, ErrorKind::UnknownTag { .. }) {
        return err;
    }
    let hint = match name {
        "else" | "elseif" => "did you forget to wrap in an ifelse tag?",
        "case" | "default" => "did you forget to wrap in a switch tag?",
        "append" | "replace" => "are you trying to instantiate a templated tag?",
        _ if node.node_type() != NodeType::Svg && html::is_svg_tag(name) => {
            "are you trying to use an svg tag outside <svg>?"
        }
        _ => return err,
    };
    err.with_note(format!("hint: {}", hint))
}

/// An output tag about to be built.
pub struct TreeSpec<'t> {
    pub name: &'t str,
    /// Type of the new node; `Svg` makes its whole subtree svg.
    pub node_type: NodeType,
    pub attributes: IndexMap<String, Value>,
    pub children: &'t [Tag],
    /// Operation whose content replaces or extends `children`.
    pub op: Option<&'t str>,
    pub origin: Location,
}

/// Append an output element below `node` and expand its children into it.
pub fn build_tree(
    cx: &CompileContext,
    scope: &Arc<Scope>,
    node: &Node<'_>,
    spec: TreeSpec<'_>,
) -> Result<()> {
    let valid = match node.node_type() {
        NodeType::Svg => html::is_svg_tag(spec.name),
        NodeType::Html => html::is_html_tag(spec.name) || spec.name == "svg",
    };
    if !valid {
        let context = match node.node_type() {
            NodeType::Svg => "svg",
            NodeType::Html => "html",
        };
        return Err(CompileError::new(ErrorKind::UnknownTag {
            name: spec.name.to_string(),
            context,
        })
        .at(&spec.origin));
    }

    let attributes: IndexMap<String, Value> = spec
        .attributes
        .into_iter()
        .map(|(k, v)| match k.strip_suffix(FORCE_MARKER) {
            Some(stripped) => (stripped.to_string(), v),
            None => (k, v),
        })
        .collect();

    let op = spec.op.and_then(|target| node.pop_op(target));
    let id = node.append_element(spec.name, attributes, Some(spec.origin.clone()));
    let svg = spec.node_type == NodeType::Svg || spec.name == "svg";
    let child = node.element(id, svg);
    let inner = Scope::branch(scope);

    match op {
        Some(op) => apply_operation(cx, &op, Some((&inner, spec.children)), &child),
        None => build_tags(cx, &inner, &child, spec.children),
    }
}

/// Expand the content of `op` into `node`. An append keeps the site's own
/// children (`own`) in front, a replace drops them. Each batch is expanded in
/// the scope it closed over.
pub fn apply_operation(
    cx: &CompileContext,
    op: &Operation,
    own: Option<(&Arc<Scope>, &[Tag])>,
    node: &Node<'_>,
) -> Result<()> {
    if let (OperationKind::Append, Some((scope, tags))) = (op.kind, own) {
        build_tags(cx, scope, node, tags)?;
    }
    for batch in &op.batches {
        build_tags(cx, &batch.scope, node, batch.tags())?;
    }
    Ok(())
}
