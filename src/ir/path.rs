//! Path queries over the IR.
//!
//! Two path dialects:
//! - `get_path` takes the JSON-ish form `a.b[0].c`. A literal `.` inside a
//!   key is escaped as `\.`.
//! - `get_kpath` takes a kinded path: `/`-separated steps where `name` is an
//!   object-field step, `[3]` an array-index step, and `!name` a
//!   tag-qualifier that filters on the current node's tag head without
//!   descending.

use crate::error::{Error, Result};
use crate::ir::Node;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// One step of a kinded path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KStep {
    Field(String),
    Index(usize),
    Tag(String),
}

/// Parses `a.b[0].c` into steps. Rejects empty segments and malformed
/// indices.
pub fn parse_path(path: &str) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    let mut chars = path.chars().peekable();
    let mut current = String::new();
    let mut seen_any = false;

    let flush = |current: &mut String, steps: &mut Vec<Step>, required: bool| -> Result<()> {
        if current.is_empty() {
            if required {
                return Err(Error::path(format!("empty segment in path {path:?}")));
            }
            return Ok(());
        }
        steps.push(Step::Key(std::mem::take(current)));
        Ok(())
    };

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => return Err(Error::path(format!("dangling escape in path {path:?}"))),
            },
            '.' => {
                let required = !seen_any || !matches!(steps.last(), Some(Step::Index(_)));
                flush(&mut current, &mut steps, required)?;
                seen_any = true;
            }
            '[' => {
                flush(&mut current, &mut steps, false)?;
                seen_any = true;
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        Some(other) => {
                            return Err(Error::path(format!(
                                "unexpected {other:?} in index of path {path:?}"
                            )))
                        }
                        None => {
                            return Err(Error::path(format!("unclosed index in path {path:?}")))
                        }
                    }
                }
                let idx: usize = digits
                    .parse()
                    .map_err(|_| Error::path(format!("bad index in path {path:?}")))?;
                steps.push(Step::Index(idx));
            }
            _ => {
                current.push(c);
                seen_any = true;
            }
        }
    }
    flush(&mut current, &mut steps, false)?;
    Ok(steps)
}

/// Resolves a JSON-ish path under `node`. Missing keys and out-of-range
/// indices are absent (`Ok(None)`); keying or indexing the wrong node kind
/// is an error.
pub fn get_path<'a>(node: &'a Node, path: &str) -> Result<Option<&'a Node>> {
    let steps = parse_path(path)?;
    let mut current = node;
    for step in &steps {
        match step {
            Step::Key(k) => match &current.value {
                crate::ir::Value::Object { .. } => match current.get(k) {
                    Some(v) => current = v,
                    None => return Ok(None),
                },
                _ => {
                    return Err(Error::type_error(format!(
                        "cannot take key {k:?} of {} node",
                        current.kind()
                    )))
                }
            },
            Step::Index(i) => match &current.value {
                crate::ir::Value::Array(els) => match els.get(*i) {
                    Some(v) => current = v,
                    None => return Ok(None),
                },
                _ => {
                    return Err(Error::type_error(format!(
                        "cannot index {} node",
                        current.kind()
                    )))
                }
            },
        }
    }
    Ok(Some(current))
}

/// Parses a kinded path (`a/[0]/!tag/b`).
pub fn parse_kpath(path: &str) -> Result<Vec<KStep>> {
    let mut steps = Vec::new();
    for part in path.split('/') {
        if part.is_empty() {
            continue;
        }
        if let Some(rest) = part.strip_prefix('!') {
            if rest.is_empty() {
                return Err(Error::path(format!("empty tag step in kpath {path:?}")));
            }
            steps.push(KStep::Tag(rest.to_string()));
        } else if let Some(inner) = part.strip_prefix('[') {
            let digits = inner
                .strip_suffix(']')
                .ok_or_else(|| Error::path(format!("unclosed index in kpath {path:?}")))?;
            let idx: usize = digits
                .parse()
                .map_err(|_| Error::path(format!("bad index in kpath {path:?}")))?;
            steps.push(KStep::Index(idx));
        } else {
            steps.push(KStep::Field(part.replace("\\.", ".")));
        }
    }
    Ok(steps)
}

/// Resolves a kinded path. Any mismatch (wrong kind, wrong tag, absence)
/// yields `None`.
pub fn get_kpath<'a>(node: &'a Node, path: &str) -> Option<&'a Node> {
    let steps = parse_kpath(path).ok()?;
    let mut current = node;
    for step in &steps {
        match step {
            KStep::Field(k) => current = current.get(k)?,
            KStep::Index(i) => current = current.elements().get(*i)?,
            KStep::Tag(name) => {
                let head = crate::tag::tag_args(&current.tag).ok()?.0;
                let bare = head.trim_start_matches(['!', '.']);
                if bare != name {
                    return None;
                }
            }
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        Node::from_map(vec![
            (
                "users",
                Node::from_slice(vec![
                    Node::from_map(vec![("name", Node::from_string("ada"))]),
                    Node::from_map(vec![("name", Node::from_string("bob"))]),
                ]),
            ),
            ("count", Node::from_int(2)),
        ])
    }

    #[test]
    fn path_resolves_keys_and_indices() {
        let doc = sample();
        let found = get_path(&doc, "users[1].name").expect("valid path");
        assert_eq!(found.and_then(Node::as_str), Some("bob"));
    }

    #[test]
    fn missing_key_is_absent_not_error() {
        let doc = sample();
        assert!(get_path(&doc, "users[0].age").expect("valid path").is_none());
        assert!(get_path(&doc, "users[9]").expect("valid path").is_none());
    }

    #[test]
    fn indexing_a_scalar_is_an_error() {
        let doc = sample();
        assert!(get_path(&doc, "count[0]").is_err());
        assert!(get_path(&doc, "count.x").is_err());
    }

    #[test]
    fn path_parse_errors_carry_the_path_prefix() {
        let doc = sample();
        let err = get_path(&doc, "users[x]").expect_err("malformed");
        assert!(err.to_string().starts_with("!path:"), "{err}");
    }

    #[test]
    fn escaped_dot_is_a_key_character() {
        let doc = Node::from_map(vec![("a.b", Node::from_int(1))]);
        let found = get_path(&doc, "a\\.b").expect("valid path");
        assert_eq!(found.and_then(Node::as_int), Some(1));
    }

    #[test]
    fn kpath_distinguishes_fields_indices_and_tags() {
        let doc = Node::from_map(vec![(
            "list",
            Node::from_slice(vec![Node::from_int(5).with_tag("!version")]),
        )]);
        assert_eq!(
            get_kpath(&doc, "list/[0]/!version").and_then(Node::as_int),
            Some(5)
        );
        assert!(get_kpath(&doc, "list/[0]/!other").is_none());
        assert!(get_kpath(&doc, "list/[1]").is_none());
    }
}
