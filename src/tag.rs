//! # Tag parser
//!
//! Tags annotate IR nodes with operators, type markers, and definition
//! references:
//!
//! ```text
//! tag       := marker head tail?
//! marker    := '!' | '.'
//! head      := ident | '[' refexpr ']'
//! tail      := '(' arg (',' arg)* ')' ('.' head tail?)? | '.' head tail?
//! ```
//!
//! Two views of the same string:
//! - [`tag_args`] is the cheap string-level split into (head, args, rest)
//!   used by operator instantiation.
//! - [`parse_tag`] builds the recursive [`TagTree`], whose [`TagTree::map`]
//!   renames every bare identifier (parameter substitution); serialization
//!   is lossless modulo whitespace.
//!
//! No whitespace is permitted inside a tag. A literal `.` inside an
//! identifier is written `\.` and unescaped during matching.

use std::fmt;

use crate::error::{Error, Result};

/// Splits a non-empty tag string into (head, args, rest).
///
/// The head includes the leading `!` or `.`; `args` is the comma-separated
/// list inside the first `(...)`; `rest` is the substring after the first
/// `.` beyond the head. Bracketed reference heads (`.[name]`) are kept
/// whole.
pub fn tag_args(tag: &str) -> Result<(String, Vec<String>, Option<String>)> {
    if tag.is_empty() {
        return Err(Error::parse("empty tag"));
    }
    if tag.chars().any(char::is_whitespace) {
        return Err(Error::parse(format!("whitespace inside tag {tag:?}")));
    }
    let mut chars: Vec<char> = tag.chars().collect();
    let marker = chars[0];
    if marker != '!' && marker != '.' {
        return Err(Error::parse(format!("tag {tag:?} must begin with '!' or '.'")));
    }

    let mut i = 1;
    let mut head = String::new();
    head.push(marker);

    if i < chars.len() && chars[i] == '[' {
        // Bracketed reference head: consume to the matching ']'.
        let mut depth = 0;
        while i < chars.len() {
            let c = chars[i];
            head.push(c);
            i += 1;
            if c == '[' {
                depth += 1;
            } else if c == ']' {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
        }
        if depth != 0 {
            return Err(Error::parse(format!("unclosed '[' in tag {tag:?}")));
        }
    } else {
        while i < chars.len() {
            let c = chars[i];
            if c == '\\' && i + 1 < chars.len() && chars[i + 1] == '.' {
                head.push('\\');
                head.push('.');
                i += 2;
            } else if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                head.push(c);
                i += 1;
            } else {
                break;
            }
        }
        if head.len() == 1 {
            return Err(Error::parse(format!("tag {tag:?} has an empty head")));
        }
    }

    // Optional argument list.
    let mut args = Vec::new();
    if i < chars.len() && chars[i] == '(' {
        let mut depth = 0;
        let mut current = String::new();
        let open = i;
        loop {
            if i >= chars.len() {
                return Err(Error::parse(format!("unclosed '(' in tag {tag:?}")));
            }
            let c = chars[i];
            i += 1;
            match c {
                '(' => {
                    depth += 1;
                    if depth > 1 {
                        current.push(c);
                    }
                }
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    current.push(c);
                }
                ',' if depth == 1 => {
                    if current.is_empty() {
                        return Err(Error::parse(format!("empty argument in tag {tag:?}")));
                    }
                    args.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            }
        }
        if current.is_empty() && i - open > 2 {
            return Err(Error::parse(format!("empty argument in tag {tag:?}")));
        }
        if !current.is_empty() {
            args.push(current);
        }
    }

    // Optional chained rest.
    let rest = if i < chars.len() {
        if chars[i] != '.' {
            return Err(Error::parse(format!(
                "unexpected {:?} after head in tag {tag:?}",
                chars[i]
            )));
        }
        let r: String = chars[i + 1..].iter().collect();
        if r.is_empty() {
            return Err(Error::parse(format!("trailing '.' in tag {tag:?}")));
        }
        Some(r)
    } else {
        None
    };

    Ok((head, args, rest))
}

/// Strips the leading marker of a head, unescaping `\.`.
pub fn bare_head(head: &str) -> String {
    head.trim_start_matches(['!', '.']).replace("\\.", ".")
}

/// A parsed tag: leading marker plus the head/args/rest tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub marker: char,
    pub tree: TagTree,
}

/// Recursive head + args + dot-chained rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagTree {
    /// Identifier (unescaped) or the inner name of a bracketed reference.
    pub name: String,
    /// True for bracketed reference segments (`[name(args)]`).
    pub is_ref: bool,
    pub args: Vec<TagTree>,
    pub rest: Option<Box<TagTree>>,
}

struct Parser<'a> {
    chars: Vec<char>,
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Parser<'a> {
        Parser { chars: src.chars().collect(), src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn err(&self, what: &str) -> Error {
        Error::parse(format!("{what} at offset {} in tag {:?}", self.pos, self.src))
    }

    fn ident(&mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' && self.chars.get(self.pos + 1) == Some(&'.') {
                out.push('.');
                self.pos += 2;
            } else if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                out.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        if out.is_empty() {
            return Err(self.err("expected identifier"));
        }
        Ok(out)
    }

    fn segment(&mut self) -> Result<TagTree> {
        let (name, is_ref, mut args) = if self.peek() == Some('[') {
            self.bump();
            let name = self.ident()?;
            let args = if self.peek() == Some('(') { self.arg_list()? } else { Vec::new() };
            if self.bump() != Some(']') {
                return Err(self.err("expected ']'"));
            }
            (name, true, args)
        } else {
            (self.ident()?, false, Vec::new())
        };
        if !is_ref && self.peek() == Some('(') {
            args = self.arg_list()?;
        }
        let rest = if self.peek() == Some('.') {
            self.bump();
            Some(Box::new(self.segment()?))
        } else {
            None
        };
        Ok(TagTree { name, is_ref, args, rest })
    }

    fn arg_list(&mut self) -> Result<Vec<TagTree>> {
        self.bump(); // consume '('
        let mut args = Vec::new();
        loop {
            args.push(self.segment()?);
            match self.bump() {
                Some(',') => {}
                Some(')') => break,
                _ => return Err(self.err("expected ',' or ')'")),
            }
        }
        Ok(args)
    }
}

/// Parses a full tag string into a [`Tag`].
pub fn parse_tag(s: &str) -> Result<Tag> {
    if s.chars().any(char::is_whitespace) {
        return Err(Error::parse(format!("whitespace inside tag {s:?}")));
    }
    let mut parser = Parser::new(s);
    let marker = parser
        .bump()
        .filter(|c| *c == '!' || *c == '.')
        .ok_or_else(|| Error::parse(format!("tag {s:?} must begin with '!' or '.'")))?;
    let tree = parser.segment()?;
    if parser.peek().is_some() {
        return Err(parser.err("trailing characters"));
    }
    Ok(Tag { marker, tree })
}

impl TagTree {
    /// Returns a copy with every bare identifier renamed through `f`
    /// (including the inner names of bracketed references).
    pub fn map(&self, f: &impl Fn(&str) -> String) -> TagTree {
        let mut infallible = |s: &str| Ok(f(s));
        match self.try_map(&mut infallible) {
            Ok(tree) => tree,
            Err(_) => unreachable!("infallible tag map"),
        }
    }

    /// Fallible variant of [`TagTree::map`].
    pub fn try_map<F>(&self, f: &mut F) -> Result<TagTree>
    where
        F: FnMut(&str) -> Result<String>,
    {
        let name = f(&self.name)?;
        let args = self.args.iter().map(|a| a.try_map(f)).collect::<Result<Vec<_>>>()?;
        let rest = match &self.rest {
            Some(r) => Some(Box::new(r.try_map(f)?)),
            None => None,
        };
        Ok(TagTree { name, is_ref: self.is_ref, args, rest })
    }

    fn serialize(&self, out: &mut String) {
        let escaped = self.name.replace('.', "\\.");
        if self.is_ref {
            out.push('[');
            out.push_str(&escaped);
            self.serialize_args(out);
            out.push(']');
        } else {
            out.push_str(&escaped);
            self.serialize_args(out);
        }
        if let Some(rest) = &self.rest {
            out.push('.');
            rest.serialize(out);
        }
    }

    fn serialize_args(&self, out: &mut String) {
        if self.args.is_empty() {
            return;
        }
        out.push('(');
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            arg.serialize(out);
        }
        out.push(')');
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        out.push(self.marker);
        self.tree.serialize(&mut out);
        write!(f, "{out}")
    }
}
