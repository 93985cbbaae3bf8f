//! Build-time output positions.
//!
//! A [`Node`] is the cursor that expansion appends to. Nodes borrow their
//! parent, so the chain mirrors the call stack of the build and disappears
//! with it; the output itself lives in the [`OutputTree`](crate::output::OutputTree).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::trace;
use weft::tag::TagId;

use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::operation::{Batch, Operation, OperationKind};
use crate::output::{DUMMY_TAG, OutputId, SharedTree};
use crate::value::{StyleHandle, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Html,
    Svg,
}

/// Bookkeeping of a template expansion in progress.
#[derive(Debug, Default)]
pub struct TemplateState {
    ops: RefCell<Vec<Operation>>,
    block_targets: RefCell<HashMap<TagId, String>>,
}

#[derive(Debug)]
pub enum NodeKind {
    /// A file or data-uri root.
    Root(NodeType),
    Element { svg: bool },
    /// A synthetic wrapper; counts go to the parent.
    Dummy,
    /// A transparent proxy that collects operations for a template call.
    Template(TemplateState),
}

#[derive(Debug)]
pub struct Node<'a> {
    parent: Option<&'a Node<'a>>,
    tree: SharedTree,
    output: OutputId,
    kind: NodeKind,
    folded: Cell<usize>,
}

impl<'a> Node<'a> {
    pub fn root(tree: SharedTree, output: OutputId, node_type: NodeType) -> Node<'a> {
        Node {
            parent: None,
            tree,
            output,
            kind: NodeKind::Root(node_type),
            folded: Cell::new(0),
        }
    }

    fn child(&'a self, output: OutputId, kind: NodeKind) -> Node<'a> {
        Node {
            parent: Some(self),
            tree: self.tree.clone(),
            output,
            kind,
            folded: Cell::new(0),
        }
    }

    pub fn element(&'a self, output: OutputId, svg: bool) -> Node<'a> {
        self.child(output, NodeKind::Element { svg })
    }

    pub fn dummy(&'a self, output: OutputId) -> Node<'a> {
        self.child(output, NodeKind::Dummy)
    }

    /// A proxy that appends where `self` does but owns its own operations.
    pub fn template(&'a self) -> Node<'a> {
        self.child(self.output, NodeKind::Template(TemplateState::default()))
    }

    pub fn parent(&self) -> Option<&'a Node<'a>> {
        self.parent
    }

    pub fn tree(&self) -> &SharedTree {
        &self.tree
    }

    pub fn output(&self) -> OutputId {
        self.output
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        match (&self.kind, self.parent) {
            (NodeKind::Element { svg: true }, _) => NodeType::Svg,
            (NodeKind::Root(t), _) => *t,
            (_, Some(parent)) => parent.node_type(),
            (_, None) => NodeType::Html,
        }
    }

    /// Number of children appended to this node's output so far.
    pub fn raw_count(&self) -> usize {
        self.tree.lock().children(self.output).len()
    }

    /// Number of children appended so far, not counting synthetic wrappers
    /// and counting what was appended through them.
    pub fn folded_count(&self) -> usize {
        match (&self.kind, self.parent) {
            (NodeKind::Dummy | NodeKind::Template(_), Some(parent)) => parent.folded_count(),
            (NodeKind::Dummy | NodeKind::Template(_), None) => 0,
            _ => self.folded.get(),
        }
    }

    fn increment_folded(&self) {
        match (&self.kind, self.parent) {
            (NodeKind::Dummy | NodeKind::Template(_), Some(parent)) => parent.increment_folded(),
            (NodeKind::Dummy | NodeKind::Template(_), None) => {}
            _ => self.folded.set(self.folded.get() + 1),
        }
    }

    pub fn append_element(
        &self,
        name: &str,
        attributes: IndexMap<String, Value>,
        origin: Option<Location>,
    ) -> OutputId {
        let svg = name == "svg" || self.node_type() == NodeType::Svg;
        let id = self
            .tree
            .lock()
            .push_element(self.output, name, attributes, false, svg, origin);
        self.increment_folded();
        id
    }

    /// Append a synthetic wrapper element, folded away after the build.
    pub fn append_dummy(&self, origin: Option<Location>) -> OutputId {
        let svg = self.node_type() == NodeType::Svg;
        self.tree
            .lock()
            .push_element(self.output, DUMMY_TAG, IndexMap::new(), true, svg, origin)
    }

    pub fn append_text(&self, value: Value, origin: Option<Location>) -> OutputId {
        let id = self.tree.lock().push_text(self.output, value, origin);
        self.increment_folded();
        id
    }

    pub fn last_child(&self) -> Option<OutputId> {
        self.tree.lock().last_child(self.output)
    }

    pub fn set_attribute(&self, id: OutputId, key: &str, value: Value) {
        self.tree.lock().set_attribute(id, key, value);
    }

    pub fn style_handle(&self) -> StyleHandle {
        StyleHandle {
            tree: self.tree.clone(),
            id: self.output,
        }
    }

    pub fn block_target(&self, tag: TagId) -> Option<String> {
        let own = match &self.kind {
            NodeKind::Template(state) => state.block_targets.borrow().get(&tag).cloned(),
            _ => None,
        };
        own.or_else(|| self.parent.and_then(|p| p.block_target(tag)))
    }

    pub fn set_block_target(&self, tag: TagId, target: String) {
        match (&self.kind, self.parent) {
            (NodeKind::Template(state), _) => {
                state.block_targets.borrow_mut().insert(tag, target);
            }
            (_, Some(parent)) => parent.set_block_target(tag, target),
            (_, None) => {}
        }
    }

    /// Queue an operation on the nearest template proxy, merging it with a
    /// pending one of the same target.
    pub fn push_op(&self, op: Operation) -> Result<()> {
        let NodeKind::Template(state) = &self.kind else {
            return Err(CompileError::new(ErrorKind::Structure(format!(
                "`{}` can't be targeted here",
                op.target
            ))));
        };
        let mut ops = state.ops.borrow_mut();
        match ops.iter().position(|o| o.target == op.target) {
            Some(i) => {
                let prev = ops.remove(i);
                ops.insert(i, prev.merge(op));
            }
            None => ops.push(op),
        }
        Ok(())
    }

    /// Queue content for the default block.
    pub fn append_to_default(&self, batch: Batch, origin: Option<Location>) -> Result<()> {
        self.push_op(Operation::new("default", OperationKind::Append, batch, origin))
    }

    /// Remove and return the operation for `target`, merging matches found at
    /// different depths. Inner content comes first.
    pub fn pop_op(&self, target: &str) -> Option<Operation> {
        let outer = self.parent.and_then(|p| p.pop_op(target));
        let inner = match &self.kind {
            NodeKind::Template(state) => {
                let mut ops = state.ops.borrow_mut();
                ops.iter()
                    .position(|o| o.target == target)
                    .map(|i| ops.remove(i))
            }
            _ => None,
        };
        let op = match (inner, outer) {
            (Some(inner), Some(outer)) => Some(inner.merge(outer)),
            (inner, outer) => inner.or(outer),
        };
        op.map(|mut op| {
            trace!(op = %op.target, batches = op.batches.len(), "consumed operation");
            op.consumed = true;
            op
        })
    }

    /// Fail if an operation queued on this proxy never reached its block.
    pub fn assert_all_operations_done(&self, at: &Location) -> Result<()> {
        let NodeKind::Template(state) = &self.kind else {
            return Ok(());
        };
        let ops = state.ops.borrow();
        let pending: Vec<&Operation> = ops.iter().filter(|o| !o.consumed).collect();
        if pending.is_empty() {
            return Ok(());
        }
        let targets: Vec<&str> = pending.iter().map(|o| o.target.as_str()).collect();
        let mut err = CompileError::new(ErrorKind::UnappliedOperation(targets.join(", "))).at(at);
        for op in pending {
            if let Some(origin) = &op.origin {
                err = err.with_note_at(format!("`{}` supplied here", op.target), origin);
            }
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputTree;
    use crate::scope::Scope;
    use weft::parser::Parser;

    fn batch(src: &str) -> Batch {
        Batch::whole(Parser::new(src, 0).parse().unwrap().tags, Scope::file(None))
    }

    #[test]
    fn folded_count_skips_wrappers() {
        let tree = OutputTree::new().shared();
        let root = Node::root(tree.clone(), OutputId::ROOT, NodeType::Html);
        let ul = root.append_element("ul", IndexMap::new(), None);
        let ul = root.element(ul, false);

        ul.append_element("li", IndexMap::new(), None);
        let wrap = ul.append_dummy(None);
        let wrap = ul.dummy(wrap);
        wrap.append_element("li", IndexMap::new(), None);
        let inner = wrap.append_dummy(None);
        let inner = wrap.dummy(inner);
        inner.append_element("li", IndexMap::new(), None);
        inner.append_element("li", IndexMap::new(), None);

        assert_eq!(ul.raw_count(), 2);
        assert_eq!(ul.folded_count(), 4);
        assert_eq!(inner.folded_count(), 4);
        assert_eq!(wrap.raw_count(), 2);
    }

    #[test]
    fn template_proxies_append_to_their_parent() {
        let tree = OutputTree::new().shared();
        let root = Node::root(tree.clone(), OutputId::ROOT, NodeType::Html);
        let proxy = root.template();
        proxy.append_element("p", IndexMap::new(), None);
        assert_eq!(root.raw_count(), 1);
        assert_eq!(root.folded_count(), 1);
        assert_eq!(proxy.folded_count(), 1);
    }

    #[test]
    fn svg_context_is_inherited() {
        let tree = OutputTree::new().shared();
        let root = Node::root(tree.clone(), OutputId::ROOT, NodeType::Html);
        let svg = root.append_element("svg", IndexMap::new(), None);
        let svg = root.element(svg, true);
        let g = svg.append_element("g", IndexMap::new(), None);
        let g = svg.element(g, false);
        assert_eq!(g.node_type(), NodeType::Svg);
        assert!(tree.lock().node(g.output()).svg);
        assert_eq!(root.node_type(), NodeType::Html);
    }

    #[test]
    fn pop_merges_inner_before_outer() {
        let tree = OutputTree::new().shared();
        let root = Node::root(tree, OutputId::ROOT, NodeType::Html);
        let outer = root.template();
        outer
            .push_op(Operation::new("body", OperationKind::Append, batch("<b/>"), None))
            .unwrap();
        let inner = outer.template();
        inner
            .push_op(Operation::new("body", OperationKind::Append, batch("<a/>"), None))
            .unwrap();

        let op = inner.element(OutputId::ROOT, false).pop_op("body").unwrap();
        let names: Vec<_> = op
            .batches
            .iter()
            .flat_map(|b| b.tags().iter().map(|t| t.name.clone()))
            .collect();
        assert_eq!(names, ["a", "b"]);
        assert!(op.consumed);
        assert!(inner.pop_op("body").is_none());
    }

    #[test]
    fn unconsumed_operations_are_reported() {
        let tree = OutputTree::new().shared();
        let root = Node::root(tree, OutputId::ROOT, NodeType::Html);
        let proxy = root.template();
        proxy
            .push_op(Operation::new("nope", OperationKind::Append, batch("<a/>"), None))
            .unwrap();
        let err = proxy
            .assert_all_operations_done(&Location::new(0, 0..1))
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnappliedOperation(ref t) if t == "nope"));
        assert!(root.push_op(Operation::new("x", OperationKind::Append, batch("<a/>"), None)).is_err());
    }
}
