//! The output tree: an arena of produced elements and text runs.
//!
//! Build-time nodes refer to output positions by [`OutputId`], so deferred
//! values never hold pointers into the tree. After the root document is built
//! the tree is folded, validated and finalized in place.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::html;
use crate::value::Value;

/// Name of the synthetic wrapper elements folded away after the build.
pub const DUMMY_TAG: &str = "dummy";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(usize);

impl OutputId {
    pub const ROOT: OutputId = OutputId(0);
}

#[derive(Debug, Clone)]
pub enum OutputKind {
    Root,
    Element {
        name: String,
        attributes: IndexMap<String, Value>,
    },
    Text(Value),
}

#[derive(Debug, Clone)]
pub struct OutputNode {
    pub kind: OutputKind,
    pub parent: Option<OutputId>,
    pub children: Vec<OutputId>,
    pub synthetic: bool,
    pub svg: bool,
    pub origin: Option<Location>,
}

impl OutputNode {
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            OutputKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self.kind, OutputKind::Element { .. })
    }
}

pub type SharedTree = Arc<Mutex<OutputTree>>;

#[derive(Debug, Clone)]
pub struct OutputTree {
    nodes: Vec<OutputNode>,
}

impl Default for OutputTree {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputTree {
    pub fn new() -> Self {
        OutputTree {
            nodes: vec![OutputNode {
                kind: OutputKind::Root,
                parent: None,
                children: Vec::new(),
                synthetic: false,
                svg: false,
                origin: None,
            }],
        }
    }

    pub fn shared(self) -> SharedTree {
        Arc::new(Mutex::new(self))
    }

    /// Number of nodes ever pushed, folded wrappers included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: OutputId) -> &OutputNode {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: OutputId) -> &[OutputId] {
        &self.nodes[id.0].children
    }

    pub fn parent(&self, id: OutputId) -> Option<OutputId> {
        self.nodes[id.0].parent
    }

    pub fn name(&self, id: OutputId) -> Option<&str> {
        self.nodes[id.0].name()
    }

    fn push(&mut self, parent: OutputId, node: OutputNode) -> OutputId {
        let id = OutputId(self.nodes.len());
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn push_element(
        &mut self,
        parent: OutputId,
        name: impl Into<String>,
        attributes: IndexMap<String, Value>,
        synthetic: bool,
        svg: bool,
        origin: Option<Location>,
    ) -> OutputId {
        self.push(
            parent,
            OutputNode {
                kind: OutputKind::Element {
                    name: name.into(),
                    attributes,
                },
                parent: Some(parent),
                children: Vec::new(),
                synthetic,
                svg,
                origin,
            },
        )
    }

    pub fn push_text(&mut self, parent: OutputId, value: Value, origin: Option<Location>) -> OutputId {
        let svg = self.nodes[parent.0].svg;
        self.push(
            parent,
            OutputNode {
                kind: OutputKind::Text(value),
                parent: Some(parent),
                children: Vec::new(),
                synthetic: false,
                svg,
                origin,
            },
        )
    }

    pub fn attribute(&self, id: OutputId, key: &str) -> Option<&Value> {
        match &self.nodes[id.0].kind {
            OutputKind::Element { attributes, .. } => attributes.get(key),
            _ => None,
        }
    }

    pub fn set_attribute(&mut self, id: OutputId, key: impl Into<String>, value: Value) {
        if let OutputKind::Element { attributes, .. } = &mut self.nodes[id.0].kind {
            attributes.insert(key.into(), value);
        }
    }

    pub fn last_child(&self, id: OutputId) -> Option<OutputId> {
        self.nodes[id.0].children.last().copied()
    }

    pub fn element_children(&self, id: OutputId) -> impl Iterator<Item = OutputId> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(|c| self.nodes[c.0].is_element())
    }

    /// Look `key` up in the inline style of `id` and then of its ancestors.
    pub fn search_style(&self, id: OutputId, key: &str, permissive: bool) -> Result<Value> {
        let mut current = Some(id);
        while let Some(cur) = current {
            if let Some(found) = self.attribute(cur, "style").and_then(|s| style_entry(s, key)) {
                return Ok(found);
            }
            current = self.nodes[cur.0].parent;
        }
        if permissive {
            Ok(Value::Null)
        } else {
            Err(CompileError::custom(format!(
                "`{}` not found in __pstyle__",
                key
            )))
        }
    }

    /// Replace every synthetic wrapper below `root` by its children.
    pub fn fold_synthetic(&mut self, root: OutputId) {
        let children = std::mem::take(&mut self.nodes[root.0].children);
        let mut folded = Vec::with_capacity(children.len());
        for child in children {
            self.fold_synthetic(child);
            if self.nodes[child.0].synthetic {
                let grandchildren = std::mem::take(&mut self.nodes[child.0].children);
                for gc in &grandchildren {
                    self.nodes[gc.0].parent = Some(root);
                }
                folded.extend(grandchildren);
            } else {
                folded.push(child);
            }
        }
        self.nodes[root.0].children = folded;
    }

    /// All node ids below `root` in depth-first document order.
    fn document_order(&self, root: OutputId) -> Vec<OutputId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    pub fn validate_ids(&self, root: OutputId) -> Result<()> {
        let mut seen: HashMap<String, OutputId> = HashMap::new();
        for id in self.document_order(root) {
            let Some(value) = self.attribute(id, "id") else {
                continue;
            };
            if value.contains_lazy() || value.is_null() {
                continue;
            }
            let key = value.to_string();
            if let Some(first) = seen.get(&key) {
                let mut err = CompileError::new(ErrorKind::DuplicateId(key));
                if let Some(loc) = &self.nodes[id.0].origin {
                    err = err.at(loc);
                }
                if let Some(loc) = &self.nodes[first.0].origin {
                    err = err.with_note_at("first used here", loc);
                }
                return Err(err);
            }
            seen.insert(key, id);
        }
        Ok(())
    }

    pub fn validate_nesting(&self, root: OutputId) -> Result<()> {
        for id in self.document_order(root) {
            let Some(name) = self.name(id) else {
                continue;
            };
            let node = &self.nodes[id.0];
            let parent = node.parent.unwrap_or(root);

            let violation = if name == "html" {
                self.name(parent).map(str::to_string)
            } else if !node.svg && html::forbids_self_nesting(name) {
                self.ancestors(id)
                    .find(|a| self.name(*a) == Some(name) && !self.nodes[a.0].svg)
                    .map(|_| name.to_string())
            } else {
                None
            };

            if let Some(parent_name) = violation {
                let err = CompileError::new(ErrorKind::InvalidNesting {
                    child: name.to_string(),
                    parent: parent_name,
                });
                return Err(match &node.origin {
                    Some(loc) => err.at(loc),
                    None => err,
                });
            }
        }
        Ok(())
    }

    fn ancestors(&self, id: OutputId) -> impl Iterator<Item = OutputId> + '_ {
        std::iter::successors(self.nodes[id.0].parent, |p| self.nodes[p.0].parent)
    }

    /// Resolve every lazy value below `root`, depth-first in document order.
    /// Attribute values resolve against their element, text against the
    /// enclosing element. Returns the number of values resolved.
    pub fn finalize(&mut self, root: OutputId) -> Result<usize> {
        let mut resolved = 0;
        for id in self.document_order(root) {
            let pending: Vec<(String, Value)> = match &self.nodes[id.0].kind {
                OutputKind::Element { attributes, .. } => attributes
                    .iter()
                    .filter(|(_, v)| v.contains_lazy())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                _ => Vec::new(),
            };
            for (key, value) in pending {
                let result = value.resolve(&FinalTag::new(&*self, id));
                let value = self.locate(id, result)?;
                self.set_attribute(id, key, value);
                resolved += 1;
            }

            let text = match &self.nodes[id.0].kind {
                OutputKind::Text(value) if value.contains_lazy() => Some(value.clone()),
                _ => None,
            };
            if let Some(value) = text {
                let owner = self.nodes[id.0].parent.unwrap_or(root);
                let result = value.resolve(&FinalTag::new(&*self, owner));
                let value = self.locate(id, result)?;
                self.nodes[id.0].kind = OutputKind::Text(value);
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    fn locate<T>(&self, id: OutputId, result: Result<T>) -> Result<T> {
        result.map_err(|e| match &self.nodes[id.0].origin {
            Some(loc) => e.or_at(loc),
            None => e,
        })
    }

    /// Concatenated descendant text of `id`, joined by single spaces.
    pub fn text_content(&self, id: OutputId) -> String {
        let mut parts = Vec::new();
        for node in self.document_order(id) {
            if let OutputKind::Text(value) = &self.nodes[node.0].kind {
                let text = value.to_string();
                let text = text.trim();
                if !text.is_empty() {
                    parts.push(text.to_string());
                }
            }
        }
        parts.join(" ")
    }

    /// Serialize everything below `root` as HTML/SVG markup.
    pub fn render(&self, root: OutputId) -> String {
        let mut out = String::new();
        self.render_node(root, &mut out);
        out
    }

    fn render_node(&self, id: OutputId, out: &mut String) {
        let node = &self.nodes[id.0];
        match &node.kind {
            OutputKind::Root => {
                for child in &node.children {
                    self.render_node(*child, out);
                }
            }
            OutputKind::Text(value) => {
                let raw = node
                    .parent
                    .and_then(|p| self.name(p))
                    .is_some_and(html::is_raw_text_element);
                let text = value.to_string();
                if raw {
                    out.push_str(&text);
                } else {
                    out.push_str(&escape_text(&text));
                }
            }
            OutputKind::Element { name, attributes } => {
                out.push('<');
                out.push_str(name);
                for (key, value) in attributes {
                    render_attribute(key, value, out);
                }
                if node.svg && node.children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                if !node.svg && html::is_void_element(name) {
                    return;
                }
                for child in &node.children {
                    self.render_node(*child, out);
                }
                let _ = write!(out, "</{}>", name);
            }
        }
    }
}

fn render_attribute(key: &str, value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(false) => {}
        Value::Bool(true) => {
            out.push(' ');
            out.push_str(key);
        }
        Value::Dict(map) if key == "style" => {
            let css: String = map.iter().map(|(k, v)| format!("{}:{};", k, v)).collect();
            let _ = write!(out, " {}=\"{}\"", key, escape_attribute(&css));
        }
        other => {
            let _ = write!(out, " {}=\"{}\"", key, escape_attribute(&other.to_string()));
        }
    }
}

fn style_entry(style: &Value, key: &str) -> Option<Value> {
    match style {
        Value::Dict(map) => map.get(key).cloned(),
        Value::String(css) => css.split(';').find_map(|decl| {
            let (k, v) = decl.split_once(':')?;
            (k.trim() == key).then(|| Value::String(v.trim().to_string()))
        }),
        _ => None,
    }
}

pub fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn escape_attribute(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

/// Read-only view of an element of the finished tree, handed to lazy values.
#[derive(Clone, Copy)]
pub struct FinalTag<'t> {
    tree: &'t OutputTree,
    id: OutputId,
}

impl<'t> FinalTag<'t> {
    pub fn new(tree: &'t OutputTree, id: OutputId) -> Self {
        FinalTag { tree, id }
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn name(&self) -> Option<&'t str> {
        self.tree.name(self.id)
    }

    pub fn attribute(&self, key: &str) -> Option<&'t Value> {
        self.tree.attribute(self.id, key)
    }

    /// Number of element children.
    pub fn child_count(&self) -> usize {
        self.tree.element_children(self.id).count()
    }

    /// Number of elements sharing this tag's parent, itself included.
    pub fn sibling_count(&self) -> usize {
        match self.tree.parent(self.id) {
            Some(p) => self.tree.element_children(p).count(),
            None => 1,
        }
    }

    /// Position among the parent's element children.
    pub fn index(&self) -> usize {
        match self.tree.parent(self.id) {
            Some(p) => self
                .tree
                .element_children(p)
                .position(|c| c == self.id)
                .unwrap_or(0),
            None => 0,
        }
    }

    pub fn parent(&self) -> Option<FinalTag<'t>> {
        self.tree.parent(self.id).map(|id| FinalTag {
            tree: self.tree,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Lazy;

    fn element(tree: &mut OutputTree, parent: OutputId, name: &str, synthetic: bool) -> OutputId {
        tree.push_element(parent, name, IndexMap::new(), synthetic, false, None)
    }

    #[test]
    fn folding_splices_wrapper_children_in_place() {
        let mut tree = OutputTree::new();
        let ul = element(&mut tree, OutputId::ROOT, "ul", false);
        element(&mut tree, ul, "li", false);
        let dummy = element(&mut tree, ul, DUMMY_TAG, true);
        let inner = element(&mut tree, dummy, DUMMY_TAG, true);
        element(&mut tree, inner, "li", false);
        element(&mut tree, dummy, "li", false);
        element(&mut tree, ul, "li", false);

        tree.fold_synthetic(OutputId::ROOT);
        assert_eq!(tree.children(ul).len(), 4);
        assert!(tree.children(ul).iter().all(|c| tree.parent(*c) == Some(ul)));
        assert_eq!(tree.render(OutputId::ROOT), "<ul><li></li><li></li><li></li><li></li></ul>");
    }

    #[test]
    fn lazy_values_see_the_final_tree() {
        let mut tree = OutputTree::new();
        let ul = element(&mut tree, OutputId::ROOT, "ul", false);
        let wrap = element(&mut tree, ul, DUMMY_TAG, true);
        for _ in 0..3 {
            let li = element(&mut tree, wrap, "li", false);
            tree.set_attribute(
                li,
                "data-pos",
                Value::Lazy(Lazy::new(|tag| {
                    Ok(Value::string(format!("{}/{}", tag.index(), tag.sibling_count())))
                })),
            );
        }
        tree.fold_synthetic(OutputId::ROOT);
        assert_eq!(tree.finalize(OutputId::ROOT).unwrap(), 3);
        assert_eq!(
            tree.render(OutputId::ROOT),
            r#"<ul><li data-pos="0/3"></li><li data-pos="1/3"></li><li data-pos="2/3"></li></ul>"#
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut tree = OutputTree::new();
        for _ in 0..2 {
            let div = element(&mut tree, OutputId::ROOT, "div", false);
            tree.set_attribute(div, "id", "main".into());
        }
        let err = tree.validate_ids(OutputId::ROOT).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::DuplicateId(ref id) if id == "main"));
    }

    #[test]
    fn self_nesting_is_rejected() {
        let mut tree = OutputTree::new();
        let a = element(&mut tree, OutputId::ROOT, "a", false);
        let span = element(&mut tree, a, "span", false);
        element(&mut tree, span, "a", false);
        assert!(tree.validate_nesting(OutputId::ROOT).is_err());

        let mut tree = OutputTree::new();
        let body = element(&mut tree, OutputId::ROOT, "body", false);
        element(&mut tree, body, "html", false);
        assert!(tree.validate_nesting(OutputId::ROOT).is_err());
    }

    #[test]
    fn style_search_walks_up() {
        let mut tree = OutputTree::new();
        let div = element(&mut tree, OutputId::ROOT, "div", false);
        tree.set_attribute(div, "style", "color: red; margin: 0".into());
        let span = element(&mut tree, div, "span", false);

        assert_eq!(tree.search_style(span, "color", false).unwrap(), Value::from("red"));
        assert!(tree.search_style(span, "padding", false).is_err());
        assert_eq!(tree.search_style(span, "padding", true).unwrap(), Value::Null);
    }

    #[test]
    fn rendering_escapes_and_voids() {
        let mut tree = OutputTree::new();
        let p = element(&mut tree, OutputId::ROOT, "p", false);
        tree.set_attribute(p, "title", "a \"b\"".into());
        tree.set_attribute(p, "hidden", Value::Bool(true));
        tree.set_attribute(p, "draggable", Value::Bool(false));
        tree.push_text(p, "1 < 2".into(), None);
        element(&mut tree, p, "br", false);
        assert_eq!(
            tree.render(OutputId::ROOT),
            r#"<p title="a &quot;b&quot;" hidden>1 &lt; 2<br></p>"#
        );
    }
}
