// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tolerant tag scanner for HTML/JSX-like markup fragments.
//!
//! This is not a document parser. It walks the input once and yields every
//! opening and closing tag with byte spans for the tag and each attribute, so
//! callers can splice a single attribute value without re-serializing
//! anything else. Text, comments and stray `<` characters are skipped.
//!
//! Attribute values may be double-quoted, single-quoted, brace-delimited
//! (JSX expressions, nesting-aware) or bare. A `>` inside a quoted or braced
//! value does not terminate the tag. A tag left open at end of input is not
//! reported.

use std::ops::Range;

/// Delimiter used around an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quote {
    /// `"value"`
    Double,
    /// `'value'`
    Single,
    /// `{expression}`
    Brace,
    /// `value` (no delimiter)
    Bare,
}

/// Attribute value: text between the delimiters plus its byte span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrValue<'a> {
    /// Value text without delimiters.
    pub text: &'a str,
    /// Span of `text` in the scanned input.
    pub span: Range<usize>,
    /// Delimiter kind.
    pub quote: Quote,
}

/// One attribute of an opening tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr<'a> {
    /// Attribute name as written.
    pub name: &'a str,
    /// Value, or `None` for a boolean attribute.
    pub value: Option<AttrValue<'a>>,
    /// Span of the whole attribute (`name="value"`).
    pub span: Range<usize>,
}

/// An opening or closing tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag<'a> {
    /// Element name.
    pub name: &'a str,
    /// `true` for `</name>`.
    pub closing: bool,
    /// Span from `<` through `>`.
    pub span: Range<usize>,
    /// Attributes in source order (always empty for closing tags).
    pub attrs: Vec<Attr<'a>>,
}

impl<'a> Tag<'a> {
    /// First attribute whose name matches `pred`.
    pub fn find_attr(&self, pred: impl Fn(&str) -> bool) -> Option<&Attr<'a>> {
        self.attrs.iter().find(|a| pred(a.name))
    }
}

/// Iterate every tag in `input`.
pub fn tags(input: &str) -> Tags<'_> {
    Tags { input, pos: 0 }
}

/// Count opening plus closing tags.
pub fn tag_count(input: &str) -> usize {
    tags(input).count()
}

/// Iterator returned by [`tags`].
#[derive(Debug, Clone)]
pub struct Tags<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Iterator for Tags<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len() {
            let start = self.pos + find_lt(&bytes[self.pos..])?;
            let mut scanner = Scanner {
                input: self.input,
                pos: start + 1,
            };
            match scanner.tag(start) {
                Some(tag) => {
                    self.pos = tag.span.end;
                    return Some(tag);
                }
                None => self.pos = start + 1,
            }
        }
        None
    }
}

fn find_lt(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == b'<')
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b':' | b'.')
}

fn is_attr_name_byte(b: u8) -> bool {
    !(b.is_ascii_whitespace() || matches!(b, b'=' | b'>' | b'/' | b'"' | b'\'' | b'<'))
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.as_bytes().get(self.pos + offset).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> Range<usize> {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        start..self.pos
    }

    /// Parse a tag whose `<` sits at `start`; `self.pos` is just past it.
    fn tag(&mut self, start: usize) -> Option<Tag<'a>> {
        let closing = self.peek() == Some(b'/');
        if closing {
            self.pos += 1;
        }
        if !self.peek().is_some_and(|b| b.is_ascii_alphabetic()) {
            return None;
        }
        let name = self.take_while(is_name_byte);
        let name = &self.input[name];

        if closing {
            let rest = &self.input.as_bytes()[self.pos..];
            let end = self.pos + rest.iter().position(|&b| b == b'>')? + 1;
            return Some(Tag {
                name,
                closing,
                span: start..end,
                attrs: Vec::new(),
            });
        }

        let mut attrs = Vec::new();
        loop {
            self.skip_ws();
            match self.peek()? {
                b'>' => {
                    self.pos += 1;
                    break;
                }
                b'/' if self.peek_at(1) == Some(b'>') => {
                    self.pos += 2;
                    break;
                }
                b'/' => self.pos += 1,
                b if is_attr_name_byte(b) => attrs.push(self.attr()?),
                _ => self.pos += 1,
            }
        }
        Some(Tag {
            name,
            closing,
            span: start..self.pos,
            attrs,
        })
    }

    fn attr(&mut self) -> Option<Attr<'a>> {
        let name_span = self.take_while(is_attr_name_byte);
        let attr_start = name_span.start;
        let name = &self.input[name_span.clone()];
        let after_name = self.pos;
        self.skip_ws();
        if self.peek() != Some(b'=') {
            self.pos = after_name;
            return Some(Attr {
                name,
                value: None,
                span: name_span,
            });
        }
        self.pos += 1;
        self.skip_ws();
        let value = match self.peek()? {
            b'"' => self.delimited(b'"', Quote::Double)?,
            b'\'' => self.delimited(b'\'', Quote::Single)?,
            b'{' => self.braced()?,
            _ => {
                let span = self.take_while(|b| !(b.is_ascii_whitespace() || b == b'>'));
                AttrValue {
                    text: &self.input[span.clone()],
                    span,
                    quote: Quote::Bare,
                }
            }
        };
        Some(Attr {
            name,
            value: Some(value),
            span: attr_start..self.pos,
        })
    }

    fn delimited(&mut self, delim: u8, quote: Quote) -> Option<AttrValue<'a>> {
        self.pos += 1;
        let inner_start = self.pos;
        let rest = &self.input.as_bytes()[self.pos..];
        let len = rest.iter().position(|&b| b == delim)?;
        self.pos = inner_start + len + 1;
        let span = inner_start..inner_start + len;
        Some(AttrValue {
            text: &self.input[span.clone()],
            span,
            quote,
        })
    }

    fn braced(&mut self) -> Option<AttrValue<'a>> {
        self.pos += 1;
        let inner_start = self.pos;
        let mut depth = 1usize;
        let mut in_string: Option<u8> = None;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match (in_string, b) {
                (Some(q), b) if b == q => in_string = None,
                (Some(_), _) => {}
                (None, b'"' | b'\'' | b'`') => in_string = Some(b),
                (None, b'{') => depth += 1,
                (None, b'}') => {
                    depth -= 1;
                    if depth == 0 {
                        let span = inner_start..self.pos - 1;
                        return Some(AttrValue {
                            text: &self.input[span.clone()],
                            span,
                            quote: Quote::Brace,
                        });
                    }
                }
                (None, _) => {}
            }
        }
        None
    }
}
