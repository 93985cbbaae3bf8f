use std::ops::Range;
use std::sync::Arc;

use crate::expr::template_string::{TemplateString, TemplateStringPart};
use crate::parser::error::ParseError;
use crate::parser::expression::{self, find_closing, find_string_end};
use crate::tag::{AttrValue, Attribute, TEXT_TAG, Tag, TagId, TagKind};

/// Elements that never have children and need no closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose content is taken verbatim, without interpolation.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse markup source text into the list of top-level tags.
pub fn parse_tags(source: &str, file_id: usize) -> Result<Vec<Tag>, Vec<ParseError>> {
    let mut state = MarkupParser {
        src: source,
        bytes: source.as_bytes(),
        pos: 0,
        file_id,
        next_index: 0,
    };
    state.parse_children(None).map_err(|e| vec![e])
}

// ---------------------------------------------------------------------------
// Parse state
// ---------------------------------------------------------------------------

struct MarkupParser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    file_id: usize,
    next_index: u32,
}

fn is_name_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'-' | b'_' | b'.' | b':')
}

fn is_attr_name_char(c: u8) -> bool {
    is_name_char(c) || matches!(c, b'!' | b'@')
}

impl<'a> MarkupParser<'a> {
    fn fresh_id(&mut self) -> TagId {
        let id = TagId {
            file_id: self.file_id,
            index: self.next_index,
        };
        self.next_index += 1;
        id
    }

    fn error(&self, msg: impl Into<String>, span: Range<usize>) -> ParseError {
        ParseError::error(msg, span, self.file_id)
    }

    fn at(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    /// Parse sibling tags until the closing tag of `parent` (or end of input
    /// at the top level).
    fn parse_children(&mut self, parent: Option<(&str, Range<usize>)>) -> Result<Vec<Tag>, ParseError> {
        let mut children = Vec::new();

        loop {
            if self.pos >= self.bytes.len() {
                if let Some((name, open_span)) = parent {
                    return Err(self
                        .error(format!("unclosed <{name}>"), self.pos..self.pos)
                        .with_related(open_span, "opened here"));
                }
                break;
            }

            if self.at("<!--") {
                let start = self.pos;
                match self.src[self.pos + 4..].find("-->") {
                    Some(offset) => self.pos += 4 + offset + 3,
                    None => return Err(self.error("unterminated comment", start..self.src.len())),
                }
                continue;
            }

            if self.at("</") {
                let start = self.pos;
                self.pos += 2;
                let name = self.read_while(is_name_char);
                self.skip_whitespace();
                if self.peek() != Some(b'>') {
                    return Err(self.error("expected `>` to end closing tag", start..self.pos));
                }
                self.pos += 1;
                return match parent {
                    Some((open, _)) if open == name => group_if_chains(children, self),
                    Some((open, open_span)) => Err(self
                        .error(format!("mismatched closing tag: expected </{open}>, found </{name}>"), start..self.pos)
                        .with_related(open_span, "opened here")),
                    None => Err(self.error(format!("closing tag </{name}> has no opening tag"), start..self.pos)),
                };
            }

            if self.peek() == Some(b'<') && self.bytes.get(self.pos + 1).is_some_and(|c| c.is_ascii_alphabetic()) {
                children.push(self.parse_element()?);
                continue;
            }

            if let Some(text) = self.parse_text()? {
                children.push(text);
            }
        }

        group_if_chains(children, self)
    }

    fn parse_element(&mut self) -> Result<Tag, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let name = self.read_while(is_name_char).to_string();
        let id = self.fresh_id();
        let mut attributes: Vec<Attribute> = Vec::new();

        let self_closing = loop {
            self.skip_whitespace();
            if self.at("/>") {
                self.pos += 2;
                break true;
            }
            match self.peek() {
                Some(b'>') => {
                    self.pos += 1;
                    break false;
                }
                Some(c) if is_attr_name_char(c) => {
                    let attr = self.parse_attribute()?;
                    if let Some(prev) = attributes.iter().find(|a| a.name == attr.name) {
                        return Err(self
                            .error(format!("duplicate attribute `{}`", attr.name), attr.span.clone())
                            .with_related(prev.span.clone(), "first set here"));
                    }
                    attributes.push(attr);
                }
                Some(_) => {
                    return Err(self.error(format!("unexpected character in <{name}>"), self.pos..self.pos + 1));
                }
                None => {
                    return Err(self.error(format!("unterminated <{name}> tag"), start..self.pos));
                }
            }
        };

        let open_span = start..self.pos;
        let children = if self_closing || VOID_ELEMENTS.contains(&name.as_str()) {
            Vec::new()
        } else if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            self.parse_raw_text(&name, open_span.clone())?
        } else {
            self.parse_children(Some((&name, open_span)))?
        };

        Ok(Tag {
            id,
            name,
            kind: TagKind::Element,
            attributes,
            children: children.into(),
            span: start..self.pos,
        })
    }

    fn parse_attribute(&mut self) -> Result<Attribute, ParseError> {
        let start = self.pos;
        let name = self.read_while(is_attr_name_char).to_string();

        let after_name = self.pos;
        self.skip_whitespace();
        if self.peek() != Some(b'=') {
            self.pos = after_name;
            return Ok(Attribute {
                name,
                value: AttrValue::Flag,
                span: start..after_name,
            });
        }
        self.pos += 1;
        self.skip_whitespace();

        let value_start = self.pos;
        let unclosed = |p: &Self, what: &str| {
            p.error(format!("unclosed {what} in value of `{name}`"), value_start..p.src.len())
        };
        let value = match self.peek() {
            Some(b'"') => {
                let end = find_string_end(self.bytes, self.pos).ok_or_else(|| unclosed(self, "string"))?;
                let body = &self.src[self.pos + 1..end];
                self.pos = end + 1;
                AttrValue::Text(expression::parse_template_string(body, value_start + 1, self.file_id)?)
            }
            Some(b'{') => {
                let end = find_closing(self.bytes, self.pos, b'{', b'}').ok_or_else(|| unclosed(self, "`{`"))?;
                let body = &self.src[self.pos + 1..end];
                self.pos = end + 1;
                AttrValue::Expr(expression::parse_expression(body, value_start + 1, self.file_id)?)
            }
            Some(b'(') => {
                let end = find_closing(self.bytes, self.pos, b'(', b')').ok_or_else(|| unclosed(self, "`(`"))?;
                let body = &self.src[self.pos + 1..end];
                self.pos = end + 1;
                AttrValue::Params(expression::parse_params(body, value_start + 1, self.file_id)?)
            }
            _ => {
                return Err(self
                    .error(format!("expected a value for `{name}`"), value_start..value_start + 1)
                    .with_note("values are written \"text\", {expression} or (parameters)"));
            }
        };

        Ok(Attribute {
            name,
            value,
            span: start..self.pos,
        })
    }

    /// A text run up to the next tag. Interpolations may contain `<`.
    fn parse_text(&mut self) -> Result<Option<Tag>, ParseError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b'<' => break,
                b'\\' => self.pos = (self.pos + 2).min(self.bytes.len()),
                b'{' => {
                    let close = find_closing(self.bytes, self.pos, b'{', b'}')
                        .ok_or_else(|| self.error("unclosed `{` in text", self.pos..self.src.len()))?;
                    self.pos = close + 1;
                }
                _ => self.pos += 1,
            }
        }

        let raw = &self.src[start..self.pos];
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let parsed = expression::parse_template_string(raw, start, self.file_id)?;
        Ok(Some(self.text_tag(collapse_whitespace(parsed), start..self.pos)))
    }

    fn parse_raw_text(&mut self, name: &str, open_span: Range<usize>) -> Result<Vec<Tag>, ParseError> {
        let close = format!("</{name}>");
        let start = self.pos;
        let Some(offset) = self.src[start..].find(&close) else {
            return Err(self
                .error(format!("unclosed <{name}>"), start..self.src.len())
                .with_related(open_span, "opened here"));
        };
        self.pos = start + offset + close.len();
        let raw = self.src[start..start + offset].trim();
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![self.text_tag(TemplateString::literal(raw), start..start + offset)])
    }

    fn text_tag(&mut self, content: TemplateString, span: Range<usize>) -> Tag {
        Tag {
            id: self.fresh_id(),
            name: TEXT_TAG.to_string(),
            kind: TagKind::Text(content),
            attributes: Vec::new(),
            children: Arc::from([]),
            span,
        }
    }
}

/// Collapse runs of whitespace in literal parts to one space and trim the ends.
fn collapse_whitespace(ts: TemplateString) -> TemplateString {
    let mut parts: Vec<TemplateStringPart> = ts
        .parts
        .into_iter()
        .map(|part| match part {
            TemplateStringPart::Literal(s) => TemplateStringPart::Literal(collapse(&s)),
            expr => expr,
        })
        .collect();
    if let Some(TemplateStringPart::Literal(s)) = parts.first_mut() {
        *s = s.trim_start().to_string();
    }
    if let Some(TemplateStringPart::Literal(s)) = parts.last_mut() {
        *s = s.trim_end().to_string();
    }
    parts.retain(|p| !matches!(p, TemplateStringPart::Literal(s) if s.is_empty()));
    TemplateString { parts }
}

fn collapse(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending = false;
    for c in s.chars() {
        if c.is_whitespace() {
            pending = true;
        } else {
            if pending {
                out.push(' ');
            }
            pending = false;
            out.push(c);
        }
    }
    if pending {
        out.push(' ');
    }
    out
}

/// Group consecutive `if` / `elseif` / `else` siblings into one synthetic
/// `ifelse` tag.
fn group_if_chains(tags: Vec<Tag>, parser: &mut MarkupParser<'_>) -> Result<Vec<Tag>, ParseError> {
    let mut out: Vec<Tag> = Vec::with_capacity(tags.len());
    let mut chain: Vec<Tag> = Vec::new();

    for tag in tags {
        match tag.name.as_str() {
            "elseif" | "else" => {
                if chain.is_empty() || chain.last().is_some_and(|c| c.name == "else") {
                    return Err(parser
                        .error(format!("<{}> without a preceding <if>", tag.name), tag.head_span())
                        .with_note("<elseif> and <else> must directly follow an <if> or <elseif>"));
                }
                chain.push(tag);
            }
            name => {
                if !chain.is_empty() {
                    out.push(close_chain(std::mem::take(&mut chain), parser));
                }
                if name == "if" {
                    chain.push(tag);
                } else {
                    out.push(tag);
                }
            }
        }
    }
    if !chain.is_empty() {
        out.push(close_chain(chain, parser));
    }

    Ok(out)
}

fn close_chain(chain: Vec<Tag>, parser: &mut MarkupParser<'_>) -> Tag {
    let start = chain.first().map_or(0, |t| t.span.start);
    let end = chain.last().map_or(start, |t| t.span.end);
    Tag {
        id: parser.fresh_id(),
        name: "ifelse".to_string(),
        kind: TagKind::Element,
        attributes: Vec::new(),
        children: chain.into(),
        span: start..end,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(src: &str) -> Vec<Tag> {
        parse_tags(src, 0).unwrap()
    }

    fn names(tags: &[Tag]) -> Vec<&str> {
        tags.iter().map(|t| t.name.as_str()).collect()
    }

    fn literal(tag: &Tag) -> &str {
        match &tag.kind {
            TagKind::Text(ts) => ts.as_literal().unwrap(),
            TagKind::Element => panic!("not a text tag"),
        }
    }

    #[test]
    fn elements_attributes_and_text() {
        let tags = parse(r#"<div class="a {b}" hidden data={1 + 2}>  hello
            world  </div>"#);
        assert_eq!(names(&tags), ["div"]);
        let div = &tags[0];
        assert_eq!(div.attributes.len(), 3);
        assert!(matches!(div.attributes[1].value, AttrValue::Flag));
        assert!(matches!(div.attributes[2].value, AttrValue::Expr(_)));
        assert_eq!(literal(&div.children[0]), "hello world");
    }

    #[test]
    fn interpolated_text_keeps_inner_spaces() {
        let tags = parse("<p> a {x < 1} b </p>");
        let TagKind::Text(ts) = &tags[0].children[0].kind else {
            panic!("expected text");
        };
        assert_eq!(ts.parts.len(), 3);
        assert!(matches!(&ts.parts[0], TemplateStringPart::Literal(s) if s == "a "));
        assert!(matches!(&ts.parts[2], TemplateStringPart::Literal(s) if s == " b"));
    }

    #[test]
    fn params_and_flags() {
        let tags = parse(r#"<template name="card" extends="div" args=(title, size = 2) export .final/>"#);
        let t = &tags[0];
        assert_eq!(t.attribute("name").and_then(Attribute::as_plain_text), Some("card"));
        assert!(matches!(&t.attribute("args").unwrap().value, AttrValue::Params(p) if p.len() == 2));
        assert!(t.has_flag(".final"));
        assert!(t.has_flag("export"));
    }

    #[test]
    fn if_chains_are_grouped() {
        let tags = parse(r#"<if cond={a}>1</if><elseif cond={b}>2</elseif><else>3</else><p/>"#);
        assert_eq!(names(&tags), ["ifelse", "p"]);
        assert_eq!(names(&tags[0].children), ["if", "elseif", "else"]);
    }

    #[test]
    fn else_without_if_is_an_error() {
        let errors = parse_tags("<div><else>x</else></div>", 0).unwrap_err();
        assert!(errors[0].message.contains("without a preceding <if>"));
    }

    #[test]
    fn mismatched_and_unclosed_tags() {
        let errors = parse_tags("<div><span></div>", 0).unwrap_err();
        assert!(errors[0].message.contains("mismatched closing tag"));
        let errors = parse_tags("<div>", 0).unwrap_err();
        assert!(errors[0].message.contains("unclosed <div>"));
    }

    #[test]
    fn void_and_raw_text_elements() {
        let tags = parse("<p>a<br>b</p><style>a { color: red }</style>");
        assert_eq!(names(&tags[0].children), [TEXT_TAG, "br", TEXT_TAG]);
        assert_eq!(literal(&tags[1].children[0]), "a { color: red }");
    }

    #[test]
    fn comments_are_skipped_and_ids_are_unique() {
        let tags = parse("<!-- c --><a/><b><c/></b>");
        assert_eq!(names(&tags), ["a", "b"]);
        assert_ne!(tags[0].id, tags[1].id);
        assert_ne!(tags[1].id, tags[1].children[0].id);
    }

    #[test]
    fn force_suffix_in_attribute_names() {
        let tags = parse(r#"<card class!="x"/>"#);
        assert_eq!(tags[0].attributes[0].name, "class!");
    }
}
