use std::ops::Range;

use crate::expr::template_string::{TemplateString, TemplateStringPart};
use crate::expr::{BinaryOperator, Expr, UnaryOperator};
use crate::parser::error::ParseError;
use crate::tag::Param;

// ---------------------------------------------------------------------------
// Token types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Token {
    // Literals
    Int(i64),
    Float(f64, Option<String>),
    /// Raw string body (escapes and interpolations unprocessed) and the byte
    /// offset where the body starts.
    StringLit(String, usize),
    Color(u8, u8, u8, u8),
    Null,
    True,
    False,

    Ident(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,       // =
    EqEq,     // ==
    BangEq,   // !=
    Gt,
    Lt,
    GtEq,
    LtEq,
    AmpAmp,   // &&
    PipePipe, // ||
    Bang,     // !
    Question, // ?
    QuestionQuestion,
    Colon,
    ColonEq, // :=
    Comma,

    // Grouping
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Int,
    Float,
    StringLit,
    Color,
    Null,
    True,
    False,
    Ident,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    EqEq,
    BangEq,
    Gt,
    Lt,
    GtEq,
    LtEq,
    AmpAmp,
    PipePipe,
    Bang,
    Question,
    QuestionQuestion,
    Colon,
    ColonEq,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
}

fn token_kind(token: &Token) -> TokenKind {
    match token {
        Token::Int(_) => TokenKind::Int,
        Token::Float(..) => TokenKind::Float,
        Token::StringLit(..) => TokenKind::StringLit,
        Token::Color(..) => TokenKind::Color,
        Token::Null => TokenKind::Null,
        Token::True => TokenKind::True,
        Token::False => TokenKind::False,
        Token::Ident(_) => TokenKind::Ident,
        Token::Plus => TokenKind::Plus,
        Token::Minus => TokenKind::Minus,
        Token::Star => TokenKind::Star,
        Token::Slash => TokenKind::Slash,
        Token::Percent => TokenKind::Percent,
        Token::Eq => TokenKind::Eq,
        Token::EqEq => TokenKind::EqEq,
        Token::BangEq => TokenKind::BangEq,
        Token::Gt => TokenKind::Gt,
        Token::Lt => TokenKind::Lt,
        Token::GtEq => TokenKind::GtEq,
        Token::LtEq => TokenKind::LtEq,
        Token::AmpAmp => TokenKind::AmpAmp,
        Token::PipePipe => TokenKind::PipePipe,
        Token::Bang => TokenKind::Bang,
        Token::Question => TokenKind::Question,
        Token::QuestionQuestion => TokenKind::QuestionQuestion,
        Token::Colon => TokenKind::Colon,
        Token::ColonEq => TokenKind::ColonEq,
        Token::Comma => TokenKind::Comma,
        Token::LParen => TokenKind::LParen,
        Token::RParen => TokenKind::RParen,
        Token::LBracket => TokenKind::LBracket,
        Token::RBracket => TokenKind::RBracket,
        Token::LBrace => TokenKind::LBrace,
        Token::RBrace => TokenKind::RBrace,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse a single expression. `base` is the byte offset of `src` within the
/// file, so spans in the result are file-absolute.
///
/// `name := expr` is accepted at the top level and desugars to
/// `new("name", expr)`.
pub fn parse_expression(src: &str, base: usize, file_id: usize) -> Result<Expr, ParseError> {
    let tokens = tokenize(src, base, file_id)?;
    let mut parser = ExprParser::new(tokens, base..base + src.len(), file_id);

    let expr = if parser.is_declaration() {
        let (name, span) = parser.expect_ident()?;
        parser.expect_token_kind(TokenKind::ColonEq)?;
        let value = parser.parse_expr(0)?;
        Expr::Call {
            callee: "new".to_string(),
            args: vec![Expr::String(TemplateString::literal(name)), value],
            span,
        }
    } else {
        parser.parse_expr(0)?
    };

    if !parser.at_end() {
        return Err(parser.error_here("unexpected tokens after expression"));
    }
    Ok(expr)
}

/// Parse the body of a `(a, b = expr, ...)` parameter list (without the parentheses).
pub fn parse_params(src: &str, base: usize, file_id: usize) -> Result<Vec<Param>, ParseError> {
    let tokens = tokenize(src, base, file_id)?;
    let mut parser = ExprParser::new(tokens, base..base + src.len(), file_id);
    let mut params = Vec::new();

    while !parser.at_end() {
        let (name, span) = parser.expect_ident()?;
        let default = if parser.peek_kind() == Some(TokenKind::Eq) {
            parser.advance();
            Some(parser.parse_expr(0)?)
        } else {
            None
        };
        params.push(Param { name, default, span });

        match parser.peek_kind() {
            None => break,
            Some(TokenKind::Comma) => {
                parser.advance();
            }
            Some(_) => return Err(parser.error_here("expected `,` between parameters")),
        }
    }

    Ok(params)
}

/// Parse text containing `{expr}` interpolations. Backslash escapes `\{`, `\}`,
/// `\"`, `\\`, `\n` and `\t` are honored in literal parts.
pub fn parse_template_string(
    src: &str,
    base: usize,
    file_id: usize,
) -> Result<TemplateString, ParseError> {
    let bytes = src.as_bytes();
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut i = 0;
    let mut literal_start = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() => {
                literal.push_str(&src[literal_start..i]);
                let escaped = bytes[i + 1];
                match escaped {
                    b'n' => literal.push('\n'),
                    b't' => literal.push('\t'),
                    b'{' | b'}' | b'"' | b'\\' => literal.push(escaped as char),
                    _ => {
                        // Not an escape we know: keep both characters.
                        literal.push('\\');
                        i += 1;
                        literal_start = i;
                        continue;
                    }
                }
                i += 2;
                literal_start = i;
            }
            b'{' => {
                literal.push_str(&src[literal_start..i]);
                if !literal.is_empty() {
                    parts.push(TemplateStringPart::Literal(std::mem::take(&mut literal)));
                }
                let close = find_closing(bytes, i, b'{', b'}').ok_or_else(|| {
                    ParseError::error("unclosed `{` in interpolation", base + i..base + src.len(), file_id)
                })?;
                let inner = &src[i + 1..close];
                if inner.trim().is_empty() {
                    return Err(ParseError::error(
                        "empty interpolation",
                        base + i..base + close + 1,
                        file_id,
                    ));
                }
                parts.push(TemplateStringPart::Expression(parse_expression(
                    inner,
                    base + i + 1,
                    file_id,
                )?));
                i = close + 1;
                literal_start = i;
            }
            _ => i += 1,
        }
    }
    literal.push_str(&src[literal_start..]);
    if !literal.is_empty() || parts.is_empty() {
        parts.push(TemplateStringPart::Literal(literal));
    }

    Ok(TemplateString { parts })
}

/// Given `bytes[open]` is the opening delimiter, find the index of the matching
/// closing delimiter. Quoted strings inside are skipped, and so are nested
/// delimiters of the same kind.
pub(crate) fn find_closing(bytes: &[u8], open: usize, open_ch: u8, close_ch: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\\' {
            i += 2;
            continue;
        }
        if c == b'"' && i != open {
            i = find_string_end(bytes, i)? + 1;
            continue;
        }
        if c == open_ch {
            depth += 1;
        } else if c == close_ch {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Given `bytes[open]` is `"`, find the index of the closing quote. Braced
/// interpolations inside the string may themselves contain quoted strings.
pub(crate) fn find_string_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            b'{' => i = find_closing(bytes, i, b'{', b'}')? + 1,
            _ => i += 1,
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

fn is_ident_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'$'
}

fn is_ident_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn tokenize(
    src: &str,
    base: usize,
    file_id: usize,
) -> Result<Vec<(Token, Range<usize>)>, ParseError> {
    let bytes = src.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    let peek = |i: usize| bytes.get(i).copied().unwrap_or(0);

    while i < len {
        let c = bytes[i];
        let start = i;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let token = match c {
            b'"' => {
                let end = find_string_end(bytes, i).ok_or_else(|| {
                    ParseError::error("unterminated string literal", base + i..base + len, file_id)
                })?;
                let body = src[i + 1..end].to_string();
                i = end + 1;
                Token::StringLit(body, base + start + 1)
            }

            b'0'..=b'9' => {
                while i < len && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let mut is_float = false;
                if peek(i) == b'.' && peek(i + 1).is_ascii_digit() {
                    is_float = true;
                    i += 1;
                    while i < len && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let number = &src[start..i];

                let unit_start = i;
                if peek(i) == b'%' && !is_ident_continue(peek(i + 1)) && peek(i + 1) != b'(' {
                    i += 1;
                } else {
                    while i < len && bytes[i].is_ascii_alphabetic() {
                        i += 1;
                    }
                }
                let unit = (i > unit_start).then(|| src[unit_start..i].to_string());

                if is_float || unit.is_some() {
                    let value = number.parse::<f64>().map_err(|_| {
                        ParseError::error("invalid number", base + start..base + i, file_id)
                    })?;
                    Token::Float(value, unit)
                } else {
                    let value = number.parse::<i64>().map_err(|_| {
                        ParseError::error("integer literal out of range", base + start..base + i, file_id)
                    })?;
                    Token::Int(value)
                }
            }

            c if is_ident_start(c) => {
                i += 1;
                loop {
                    let c = peek(i);
                    if is_ident_continue(c) {
                        i += 1;
                    } else if c == b'-' && bytes[i - 1].is_ascii_alphanumeric() && peek(i + 1).is_ascii_alphabetic() {
                        i += 1;
                    } else if c == b'.' && is_ident_start(peek(i + 1)) {
                        i += 1;
                    } else {
                        break;
                    }
                }
                match &src[start..i] {
                    "null" => Token::Null,
                    "true" => Token::True,
                    "false" => Token::False,
                    ident => Token::Ident(ident.to_string()),
                }
            }

            b'#' => {
                i += 1;
                while i < len && bytes[i].is_ascii_hexdigit() {
                    i += 1;
                }
                let hex = &src[start + 1..i];
                parse_color(hex).ok_or_else(|| {
                    ParseError::error(
                        format!("invalid color literal `#{hex}`"),
                        base + start..base + i,
                        file_id,
                    )
                    .with_note("colors are written #rgb, #rgba, #rrggbb or #rrggbbaa")
                })?
            }

            _ => {
                let two = (c, peek(i + 1));
                let (token, width) = match two {
                    (b'=', b'=') => (Token::EqEq, 2),
                    (b'!', b'=') => (Token::BangEq, 2),
                    (b'>', b'=') => (Token::GtEq, 2),
                    (b'<', b'=') => (Token::LtEq, 2),
                    (b'&', b'&') => (Token::AmpAmp, 2),
                    (b'|', b'|') => (Token::PipePipe, 2),
                    (b'?', b'?') => (Token::QuestionQuestion, 2),
                    (b':', b'=') => (Token::ColonEq, 2),
                    (b'=', _) => (Token::Eq, 1),
                    (b'!', _) => (Token::Bang, 1),
                    (b'>', _) => (Token::Gt, 1),
                    (b'<', _) => (Token::Lt, 1),
                    (b'?', _) => (Token::Question, 1),
                    (b':', _) => (Token::Colon, 1),
                    (b'+', _) => (Token::Plus, 1),
                    (b'-', _) => (Token::Minus, 1),
                    (b'*', _) => (Token::Star, 1),
                    (b'/', _) => (Token::Slash, 1),
                    (b'%', _) => (Token::Percent, 1),
                    (b',', _) => (Token::Comma, 1),
                    (b'(', _) => (Token::LParen, 1),
                    (b')', _) => (Token::RParen, 1),
                    (b'[', _) => (Token::LBracket, 1),
                    (b']', _) => (Token::RBracket, 1),
                    (b'{', _) => (Token::LBrace, 1),
                    (b'}', _) => (Token::RBrace, 1),
                    _ => {
                        let ch = src[i..].chars().next().unwrap_or('?');
                        return Err(ParseError::error(
                            format!("unexpected character `{ch}` in expression"),
                            base + i..base + i + ch.len_utf8(),
                            file_id,
                        ));
                    }
                };
                i += width;
                token
            }
        };

        tokens.push((token, base + start..base + i));
    }

    Ok(tokens)
}

fn parse_color(hex: &str) -> Option<Token> {
    let digit = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|d| d * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => Some(Token::Color(digit(0)?, digit(1)?, digit(2)?, 255)),
        4 => Some(Token::Color(digit(0)?, digit(1)?, digit(2)?, digit(3)?)),
        6 => Some(Token::Color(byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some(Token::Color(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Pratt parser
// ---------------------------------------------------------------------------

struct ExprParser {
    tokens: Vec<(Token, Range<usize>)>,
    pos: usize,
    span: Range<usize>,
    file_id: usize,
}

// Binding powers (precedence). Higher = tighter binding.
// Left bp, right bp. For left-assoc: right = left + 1. For right-assoc: right = left.
const BP_CONDITIONAL: u8 = 2; // ? :
const BP_COALESCE: u8 = 3; // ??
const BP_OR: u8 = 4; // ||
const BP_AND: u8 = 6; // &&
const BP_EQUALITY: u8 = 8; // == !=
const BP_COMPARISON: u8 = 10; // < > <= >=
const BP_ADDITIVE: u8 = 12; // + -
const BP_MULTIPLICATIVE: u8 = 14; // * / %
const BP_UNARY: u8 = 16; // ! -
const BP_POSTFIX: u8 = 18; // f() x[]

impl ExprParser {
    fn new(tokens: Vec<(Token, Range<usize>)>, span: Range<usize>, file_id: usize) -> Self {
        ExprParser {
            tokens,
            pos: 0,
            span,
            file_id,
        }
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.tokens.get(self.pos).map(|(t, _)| token_kind(t))
    }

    fn advance(&mut self) -> Option<(Token, Range<usize>)> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Error pointing at the current token, or at the end of the input.
    fn error_here(&self, msg: impl Into<String>) -> ParseError {
        let span = match self.tokens.get(self.pos) {
            Some((_, span)) => span.clone(),
            None => self.span.end..self.span.end,
        };
        ParseError::error(msg, span, self.file_id)
    }

    fn error_at(&self, msg: impl Into<String>, span: Range<usize>) -> ParseError {
        ParseError::error(msg, span, self.file_id)
    }

    fn expect_ident(&mut self) -> Result<(String, Range<usize>), ParseError> {
        match self.advance() {
            Some((Token::Ident(name), span)) => Ok((name, span)),
            Some((_, span)) => Err(self.error_at("expected identifier", span)),
            None => Err(self.error_here("expected identifier")),
        }
    }

    fn expect_token_kind(&mut self, kind: TokenKind) -> Result<Range<usize>, ParseError> {
        match self.advance() {
            Some((t, span)) if token_kind(&t) == kind => Ok(span),
            Some((_, span)) => Err(self.error_at(format!("expected {kind:?}"), span)),
            None => Err(self.error_here(format!("expected {kind:?}"))),
        }
    }

    /// `ident := expr`
    fn is_declaration(&self) -> bool {
        matches!(
            (self.tokens.first(), self.tokens.get(1)),
            (Some((Token::Ident(_), _)), Some((Token::ColonEq, _)))
        )
    }

    // ------------------------------------------------------------------
    // Pratt parser core
    // ------------------------------------------------------------------

    fn parse_expr(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_prefix()?;

        loop {
            let Some(kind) = self.peek_kind() else { break };

            // Postfix: call and index
            if matches!(kind, TokenKind::LParen | TokenKind::LBracket) {
                if BP_POSTFIX < min_bp {
                    break;
                }
                left = self.parse_postfix(left)?;
                continue;
            }

            let Some((l_bp, r_bp)) = infix_bp(kind) else { break };
            if l_bp < min_bp {
                break;
            }

            if kind == TokenKind::Question {
                self.advance();
                let true_branch = self.parse_expr(0)?;
                self.expect_token_kind(TokenKind::Colon)?;
                let false_branch = self.parse_expr(r_bp)?;
                left = Expr::Conditional {
                    condition: Box::new(left),
                    true_branch: Box::new(true_branch),
                    false_branch: Box::new(false_branch),
                };
                continue;
            }

            let Some((op, op_span)) = self.advance() else { break };
            let right = self.parse_expr(r_bp)?;

            let operator = match token_kind(&op) {
                TokenKind::Plus => BinaryOperator::Addition,
                TokenKind::Minus => BinaryOperator::Subtraction,
                TokenKind::Star => BinaryOperator::Multiplication,
                TokenKind::Slash => BinaryOperator::Division,
                TokenKind::Percent => BinaryOperator::Modulo,
                TokenKind::EqEq => BinaryOperator::Equality,
                TokenKind::BangEq => BinaryOperator::Inequality,
                TokenKind::Gt => BinaryOperator::GreaterThan,
                TokenKind::Lt => BinaryOperator::LessThan,
                TokenKind::GtEq => BinaryOperator::GreaterThanOrEqual,
                TokenKind::LtEq => BinaryOperator::LessThanOrEqual,
                TokenKind::AmpAmp => BinaryOperator::LogicalAnd,
                TokenKind::PipePipe => BinaryOperator::LogicalOr,
                TokenKind::QuestionQuestion => BinaryOperator::NullCoalesce,
                _ => return Err(self.error_at("unexpected infix operator", op_span)),
            };

            left = Expr::BinaryOperation {
                operator,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_postfix(&mut self, left: Expr) -> Result<Expr, ParseError> {
        let Some((token, open_span)) = self.advance() else {
            return Ok(left);
        };
        match token {
            Token::LParen => {
                let Expr::Ident(callee, callee_span) = left else {
                    return Err(self
                        .error_at("only named functions can be called", open_span)
                        .with_note("bind the function to a name first"));
                };
                let args = self.parse_comma_list(TokenKind::RParen)?;
                let end = self.tokens[self.pos - 1].1.end;
                Ok(Expr::Call {
                    callee,
                    args,
                    span: callee_span.start..end,
                })
            }
            Token::LBracket => {
                let index = self.parse_expr(0)?;
                let close = self.expect_token_kind(TokenKind::RBracket)?;
                let start = left.span().map_or(open_span.start, |s| s.start);
                Ok(Expr::Index {
                    base: Box::new(left),
                    index: Box::new(index),
                    span: start..close.end,
                })
            }
            _ => Err(self.error_at("expected call or index", open_span)),
        }
    }

    /// Comma-separated expressions up to and including `close`. A trailing
    /// comma is allowed.
    fn parse_comma_list(&mut self, close: TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        loop {
            if self.peek_kind() == Some(close) {
                self.advance();
                return Ok(items);
            }
            items.push(self.parse_expr(0)?);
            match self.peek_kind() {
                Some(TokenKind::Comma) => {
                    self.advance();
                }
                Some(k) if k == close => {}
                _ => return Err(self.error_here(format!("expected `,` or {close:?}"))),
            }
        }
    }

    fn parse_prefix(&mut self) -> Result<Expr, ParseError> {
        let (token, span) = self
            .advance()
            .ok_or_else(|| self.error_here("unexpected end of expression"))?;

        match token {
            // Literals
            Token::Int(n) => Ok(Expr::Int(n)),
            Token::Float(value, unit) => Ok(Expr::Float { value, unit }),
            Token::StringLit(body, body_start) => Ok(Expr::String(parse_template_string(
                &body,
                body_start,
                self.file_id,
            )?)),
            Token::Color(r, g, b, a) => Ok(Expr::Color { r, g, b, a }),
            Token::Null => Ok(Expr::Null),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),

            Token::Ident(name) => Ok(Expr::Ident(name, span)),

            // Unary operators
            Token::Bang => {
                let operand = self.parse_expr(BP_UNARY)?;
                Ok(Expr::UnaryOperation {
                    operator: UnaryOperator::LogicalNot,
                    operand: Box::new(operand),
                })
            }
            Token::Minus => {
                let operand = self.parse_expr(BP_UNARY)?;
                Ok(match operand {
                    Expr::Int(n) => Expr::Int(-n),
                    Expr::Float { value, unit } => Expr::Float { value: -value, unit },
                    operand => Expr::UnaryOperation {
                        operator: UnaryOperator::Negation,
                        operand: Box::new(operand),
                    },
                })
            }

            Token::LParen => {
                let expr = self.parse_expr(0)?;
                self.expect_token_kind(TokenKind::RParen)?;
                Ok(expr)
            }

            Token::LBracket => Ok(Expr::List(self.parse_comma_list(TokenKind::RBracket)?)),

            Token::LBrace => self.parse_dict(),

            other => Err(self.error_at(format!("unexpected token: {:?}", token_kind(&other)), span)),
        }
    }

    /// `{key: value, "other key": value}`, after the opening brace.
    fn parse_dict(&mut self) -> Result<Expr, ParseError> {
        let mut entries = Vec::new();
        loop {
            let key = match self.advance() {
                Some((Token::RBrace, _)) => return Ok(Expr::Dict(entries)),
                Some((Token::Ident(name), _)) => name,
                Some((Token::StringLit(body, start), span)) => {
                    let ts = parse_template_string(&body, start, self.file_id)?;
                    match ts.as_literal() {
                        Some(s) => s.to_string(),
                        None => {
                            return Err(self.error_at("dictionary keys cannot be interpolated", span));
                        }
                    }
                }
                Some((_, span)) => return Err(self.error_at("expected dictionary key", span)),
                None => return Err(self.error_here("unclosed dictionary literal")),
            };
            self.expect_token_kind(TokenKind::Colon)?;
            let value = self.parse_expr(0)?;
            entries.push((key, value));

            match self.peek_kind() {
                Some(TokenKind::Comma) => {
                    self.advance();
                }
                Some(TokenKind::RBrace) => {}
                _ => return Err(self.error_here("expected `,` or `}` in dictionary literal")),
            }
        }
    }
}

/// Infix binding powers: returns (left_bp, right_bp) or None if not infix.
fn infix_bp(kind: TokenKind) -> Option<(u8, u8)> {
    match kind {
        TokenKind::Question => Some((BP_CONDITIONAL, BP_CONDITIONAL)),
        TokenKind::QuestionQuestion => Some((BP_COALESCE, BP_COALESCE)),
        TokenKind::PipePipe => Some((BP_OR, BP_OR + 1)),
        TokenKind::AmpAmp => Some((BP_AND, BP_AND + 1)),
        TokenKind::EqEq | TokenKind::BangEq => Some((BP_EQUALITY, BP_EQUALITY + 1)),
        TokenKind::Gt | TokenKind::Lt | TokenKind::GtEq | TokenKind::LtEq => {
            Some((BP_COMPARISON, BP_COMPARISON + 1))
        }
        TokenKind::Plus | TokenKind::Minus => Some((BP_ADDITIVE, BP_ADDITIVE + 1)),
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => {
            Some((BP_MULTIPLICATIVE, BP_MULTIPLICATIVE + 1))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Expr {
        parse_expression(src, 0, 0).unwrap()
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let Expr::BinaryOperation { operator, right, .. } = expr("1 + 2 * 3") else {
            panic!("expected binary operation");
        };
        assert_eq!(operator, BinaryOperator::Addition);
        assert!(matches!(
            *right,
            Expr::BinaryOperation { operator: BinaryOperator::Multiplication, .. }
        ));
    }

    #[test]
    fn units_and_colors() {
        assert!(matches!(expr("12px"), Expr::Float { value, unit: Some(u) } if value == 12.0 && u == "px"));
        assert!(matches!(expr("50%"), Expr::Float { unit: Some(u), .. } if u == "%"));
        assert!(matches!(expr("7 % 2"), Expr::BinaryOperation { operator: BinaryOperator::Modulo, .. }));
        assert!(matches!(expr("#f00"), Expr::Color { r: 255, g: 0, b: 0, a: 255 }));
    }

    #[test]
    fn dashed_and_dotted_identifiers() {
        assert!(matches!(expr("svg-uri(x, {})"), Expr::Call { callee, .. } if callee == "svg-uri"));
        assert!(matches!(expr("item.title"), Expr::Ident(name, _) if name == "item.title"));
        assert!(matches!(expr("a - b"), Expr::BinaryOperation { operator: BinaryOperator::Subtraction, .. }));
    }

    #[test]
    fn declaration_desugars_to_new() {
        let Expr::Call { callee, args, .. } = expr("x := 1 + 1") else {
            panic!("expected call");
        };
        assert_eq!(callee, "new");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn string_interpolation_nests_quotes() {
        let Expr::String(ts) = expr(r#""a {str("b")} c""#) else {
            panic!("expected string");
        };
        assert_eq!(ts.parts.len(), 3);
    }

    #[test]
    fn params_with_defaults() {
        let params = parse_params("title, size = 2, label = \"x\"", 10, 0).unwrap();
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["title", "size", "label"]);
        assert!(params[0].default.is_none());
        assert!(params[1].default.is_some());
        assert_eq!(params[0].span, 10..15);
    }

    #[test]
    fn spans_are_file_absolute() {
        let err = parse_expression("1 + )", 100, 3).unwrap_err();
        assert_eq!(err.span, 104..105);
        assert_eq!(err.file_id, 3);
    }

    #[test]
    fn conditional_and_coalesce() {
        assert!(matches!(expr("a ? 1 : 2"), Expr::Conditional { .. }));
        assert!(matches!(
            expr("a ?? b ?? c"),
            Expr::BinaryOperation { operator: BinaryOperator::NullCoalesce, .. }
        ));
    }

    #[test]
    fn list_dict_and_index() {
        assert!(matches!(expr("[1, 2, 3,]"), Expr::List(items) if items.len() == 3));
        assert!(matches!(expr("{a: 1, \"b c\": 2}"), Expr::Dict(entries) if entries[1].0 == "b c"));
        assert!(matches!(expr("xs[0]"), Expr::Index { .. }));
    }
}
