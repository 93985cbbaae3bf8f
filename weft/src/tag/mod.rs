use std::ops::Range;
use std::sync::Arc;

use crate::expr::Expr;
use crate::expr::template_string::TemplateString;

/// Identity of a tag within one parse. Stable across repeated expansions of the
/// same source tag, distinct for every tag occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId {
    pub file_id: usize,
    pub index: u32,
}

/// A source tag: an element with attributes and children, or a run of text.
#[derive(Debug, Clone)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub kind: TagKind,
    pub attributes: Vec<Attribute>,
    /// Shared so that pending operations can hold on to a run of children
    /// without copying the tree.
    pub children: Arc<[Tag]>,
    pub span: Range<usize>,
}

#[derive(Debug, Clone)]
pub enum TagKind {
    Element,
    Text(TemplateString),
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
    pub span: Range<usize>,
}

#[derive(Debug, Clone)]
pub enum AttrValue {
    /// `name` with no value.
    Flag,
    /// `name="text {expr}"`
    Text(TemplateString),
    /// `name={expr}`
    Expr(Expr),
    /// `name=(a, b = expr)`
    Params(Vec<Param>),
}

/// One entry of a parenthesized parameter list.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub default: Option<Expr>,
    pub span: Range<usize>,
}

pub const TEXT_TAG: &str = "#text";

impl Tag {
    pub fn is_text(&self) -> bool {
        matches!(self.kind, TagKind::Text(_))
    }

    pub fn file_id(&self) -> usize {
        self.id.file_id
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn has_flag(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }

    /// Child tags that are elements (text runs skipped).
    pub fn element_children(&self) -> impl Iterator<Item = &Tag> {
        self.children.iter().filter(|c| !c.is_text())
    }

    /// The span of the opening `<name`, used to point diagnostics at a tag
    /// without underlining its whole body.
    pub fn head_span(&self) -> Range<usize> {
        let end = (self.span.start + 1 + self.name.len()).min(self.span.end);
        self.span.start..end
    }
}

impl Attribute {
    /// The literal text of an attribute written as a plain string, without
    /// interpolation.
    pub fn as_plain_text(&self) -> Option<&str> {
        match &self.value {
            AttrValue::Text(ts) => ts.as_literal(),
            _ => None,
        }
    }
}
