use crate::expr::Expr;

/// A string that can contain interpolated expressions.
/// Used in text runs, quoted attribute values and string literals.
#[derive(Debug, Clone)]
pub struct TemplateString {
    pub parts: Vec<TemplateStringPart>,
}

#[derive(Debug, Clone)]
pub enum TemplateStringPart {
    /// Literal text content.
    Literal(String),
    /// An embedded expression to be evaluated and rendered.
    Expression(Expr),
}

impl TemplateString {
    pub fn literal(s: impl Into<String>) -> Self {
        TemplateString {
            parts: vec![TemplateStringPart::Literal(s.into())],
        }
    }

    /// The text of a string made of literal parts only.
    pub fn as_literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [] => Some(""),
            [TemplateStringPart::Literal(s)] => Some(s),
            _ => None,
        }
    }

    /// A string consisting of exactly one `{expr}` with no surrounding text.
    pub fn as_single_expression(&self) -> Option<&Expr> {
        match self.parts.as_slice() {
            [TemplateStringPart::Expression(e)] => Some(e),
            _ => None,
        }
    }
}
