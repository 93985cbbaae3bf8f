pub mod template_string;

use std::ops::Range;

use crate::expr::template_string::TemplateString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// Arithmetic negation: -x
    Negation,
    /// Logical not: !x
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulo,
    LogicalAnd,
    LogicalOr,
    Equality,
    Inequality,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    /// a ?? b
    NullCoalesce,
}

/// An expression AST node.
#[derive(Debug, Clone)]
pub enum Expr {
    // Literals
    Null,
    Bool(bool),
    Int(i64),
    Float { value: f64, unit: Option<String> },
    String(TemplateString),
    Color { r: u8, g: u8, b: u8, a: u8 },
    List(Vec<Expr>),
    Dict(Vec<(String, Expr)>),

    /// A name, possibly dotted (`ui.card`, `item.title`).
    Ident(String, Range<usize>),

    /// f(args). Callees are always names: the evaluator resolves them
    /// against the scope chain, the intrinsics and the builtin table.
    Call {
        callee: String,
        args: Vec<Expr>,
        span: Range<usize>,
    },

    /// base[index]
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
        span: Range<usize>,
    },

    UnaryOperation {
        operator: UnaryOperator,
        operand: Box<Expr>,
    },
    BinaryOperation {
        operator: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// cond ? a : b
    Conditional {
        condition: Box<Expr>,
        true_branch: Box<Expr>,
        false_branch: Box<Expr>,
    },
}

impl Expr {
    /// Byte span of the expression when it is known to the parser.
    pub fn span(&self) -> Option<Range<usize>> {
        match self {
            Expr::Ident(_, span) | Expr::Call { span, .. } | Expr::Index { span, .. } => {
                Some(span.clone())
            }
            Expr::UnaryOperation { operand, .. } => operand.span(),
            Expr::BinaryOperation { left, right, .. } => match (left.span(), right.span()) {
                (Some(l), Some(r)) => Some(l.start..r.end),
                (l, r) => l.or(r),
            },
            _ => None,
        }
    }

    /// The name of a bare identifier expression.
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident(name, _) => Some(name),
            _ => None,
        }
    }
}
