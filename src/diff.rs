//! # Diff engine
//!
//! Structural diff producing a patch in the operator vocabulary:
//! - objects diff by field name through an LCS over the key sequences;
//! - arrays diff positionally into a sparse `!arraydiff` map keyed by the
//!   application walk (or by an extracted key via [`diff_array_by_key`]);
//! - strings diff through a character diff into a `!strdiff` payload;
//! - scalars and kind changes become `!replace {from, to}`;
//! - tag changes on containers fold into `!insert-tag` / `!delete-tag` /
//!   `!replace-tag` wrappers chained ahead of the content diff.
//!
//! Round-trip law: `patch(a, diff(a, b)) == b` whenever the diff is
//! non-nil; a nil diff means the sides are already equal.

use similar::{capture_diff_slices, Algorithm, ChangeTag, DiffOp, TextDiff};

use crate::error::{Error, Result};
use crate::eval::OpContext;
use crate::ir::path::{parse_path, Step};
use crate::ir::{EqOptions, Node, Value};

fn strict_eq(ctx: &OpContext) -> EqOptions {
    EqOptions { comments: ctx.comments, tags: true }
}

fn make_replace(from: &Node, to: &Node) -> Node {
    Node::from_map(vec![("from", from.detached()), ("to", to.detached())]).with_tag("!replace")
}

fn make_delete() -> Node {
    Node::null().with_tag("!delete")
}

/// Chains `head` ahead of a node's existing tag.
fn chain_tag(head: &str, node_tag: &str) -> String {
    if node_tag.is_empty() {
        format!("!{head}")
    } else if let Some(ref_part) = node_tag.strip_prefix('.') {
        // Re-bracket reference tags so they survive as a chain remainder.
        if ref_part.starts_with('[') {
            format!("!{head}.{ref_part}")
        } else {
            format!("!{head}.[{ref_part}]")
        }
    } else {
        format!("!{head}.{}", &node_tag[1..])
    }
}

fn make_insert(value: &Node) -> Node {
    let mut node = value.detached();
    node.tag = chain_tag("insert", &value.tag);
    node
}

/// Folds a tag difference into a wrapper around the content diff. Returns
/// `None` when there is nothing to patch.
fn wrap_tag(from: &Node, to: &Node, content: Option<Node>) -> Option<Node> {
    if from.tag == to.tag {
        return content;
    }
    if from.tag.starts_with('.') || to.tag.starts_with('.') {
        // Reference tags cannot appear as tag arguments; fall back to a
        // whole-node replacement.
        return Some(make_replace(from, to));
    }
    let head = match (from.tag.is_empty(), to.tag.is_empty()) {
        (true, false) => format!("insert-tag({})", &to.tag[1..]),
        (false, true) => format!("delete-tag({})", &from.tag[1..]),
        _ => format!("replace-tag({},{})", &from.tag[1..], &to.tag[1..]),
    };
    Some(match content {
        Some(mut inner) => {
            inner.tag = chain_tag(&head, &inner.tag);
            inner
        }
        None => Node::null().with_tag(format!("!{head}")),
    })
}

/// Diffs two nodes. `None` means equal (under the context's comment flag,
/// with tags always compared).
pub fn diff(from: &Node, to: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
    if from.structural_eq(to, strict_eq(ctx)) {
        return Ok(None);
    }
    match (&from.value, &to.value) {
        (Value::Object { .. }, Value::Object { .. }) => {
            let content = diff_objects(from, to, ctx)?;
            Ok(wrap_tag(from, to, content))
        }
        (Value::Array(_), Value::Array(_)) => {
            let content = diff_arrays(from, to, ctx)?;
            Ok(wrap_tag(from, to, content))
        }
        (Value::String(a), Value::String(b)) => {
            let content = if a == b { None } else { Some(diff_strings(a, b)) };
            Ok(wrap_tag(from, to, content))
        }
        _ => Ok(Some(make_replace(from, to))),
    }
}

fn diff_objects(from: &Node, to: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
    let from_entries: Vec<(&str, &Node)> = from.entries().collect();
    let to_entries: Vec<(&str, &Node)> = to.entries().collect();
    let from_keys: Vec<&str> = from_entries.iter().map(|(k, _)| *k).collect();
    let to_keys: Vec<&str> = to_entries.iter().map(|(k, _)| *k).collect();

    let mut pairs: Vec<(String, Node)> = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, &from_keys, &to_keys) {
        match op {
            DiffOp::Equal { old_index, new_index, len } => {
                for k in 0..len {
                    let (key, from_value) = from_entries[old_index + k];
                    let (_, to_value) = to_entries[new_index + k];
                    if let Some(d) = diff(from_value, to_value, ctx)? {
                        pairs.push((key.to_string(), d));
                    }
                }
            }
            DiffOp::Delete { old_index, old_len, .. } => {
                for k in 0..old_len {
                    pairs.push((from_entries[old_index + k].0.to_string(), make_delete()));
                }
            }
            DiffOp::Insert { new_index, new_len, .. } => {
                for k in 0..new_len {
                    let (key, value) = to_entries[new_index + k];
                    pairs.push((key.to_string(), make_insert(value)));
                }
            }
            DiffOp::Replace { old_index, old_len, new_index, new_len } => {
                for k in 0..old_len {
                    pairs.push((from_entries[old_index + k].0.to_string(), make_delete()));
                }
                for k in 0..new_len {
                    let (key, value) = to_entries[new_index + k];
                    pairs.push((key.to_string(), make_insert(value)));
                }
            }
        }
    }
    if pairs.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Node::from_map(pairs)))
    }
}

/// Interns elements by structural equality so the LCS runs over small ids.
fn intern_elements<'a>(pool: &mut Vec<&'a Node>, elements: &'a [Node], eq: EqOptions) -> Vec<usize> {
    elements
        .iter()
        .map(|el| {
            if let Some(i) = pool.iter().position(|p| p.structural_eq(el, eq)) {
                i
            } else {
                pool.push(el);
                pool.len() - 1
            }
        })
        .collect()
}

fn diff_arrays(from: &Node, to: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
    let a = from.elements();
    let b = to.elements();
    let eq = strict_eq(ctx);
    let mut pool: Vec<&Node> = Vec::new();
    let a_ids = intern_elements(&mut pool, a, eq);
    let b_ids = intern_elements(&mut pool, b, eq);

    // Entry keys index the application walk: every copied, deleted,
    // inserted, or patched element advances the walk by one.
    let mut entries: Vec<(u64, Node)> = Vec::new();
    let mut walk: u64 = 0;
    for op in capture_diff_slices(Algorithm::Myers, &a_ids, &b_ids) {
        match op {
            DiffOp::Equal { len, .. } => walk += len as u64,
            DiffOp::Delete { old_len, .. } => {
                for _ in 0..old_len {
                    entries.push((walk, make_delete()));
                    walk += 1;
                }
            }
            DiffOp::Insert { new_index, new_len, .. } => {
                for k in 0..new_len {
                    entries.push((walk, make_insert(&b[new_index + k])));
                    walk += 1;
                }
            }
            DiffOp::Replace { old_index, old_len, new_index, new_len } => {
                let paired = old_len.min(new_len);
                for k in 0..paired {
                    let from_el = &a[old_index + k];
                    let to_el = &b[new_index + k];
                    let d = diff(from_el, to_el, ctx)?
                        .unwrap_or_else(|| make_replace(from_el, to_el));
                    entries.push((walk, d));
                    walk += 1;
                }
                for _ in paired..old_len {
                    entries.push((walk, make_delete()));
                    walk += 1;
                }
                for k in paired..new_len {
                    entries.push((walk, make_insert(&b[new_index + k])));
                    walk += 1;
                }
            }
        }
    }
    if entries.is_empty() {
        Ok(None)
    } else {
        Ok(Some(Node::from_int_keys_map(entries).with_tag("!arraydiff")))
    }
}

/// Character-level string diff, encoded as `[[op, text], ...]` chunks with
/// op -1 = delete, 0 = equal, 1 = insert.
pub fn diff_strings(from: &str, to: &str) -> Node {
    let text_diff = TextDiff::from_chars(from, to);
    let mut chunks: Vec<(i64, String)> = Vec::new();
    for change in text_diff.iter_all_changes() {
        let op = match change.tag() {
            ChangeTag::Equal => 0,
            ChangeTag::Delete => -1,
            ChangeTag::Insert => 1,
        };
        match chunks.last_mut() {
            Some((last_op, text)) if *last_op == op => text.push_str(change.value()),
            _ => chunks.push((op, change.value().to_string())),
        }
    }
    Node::from_slice(
        chunks
            .into_iter()
            .map(|(op, text)| {
                Node::from_slice(vec![Node::from_int(op), Node::from_string(text)])
            })
            .collect(),
    )
    .with_tag("!strdiff")
}

/// Splices the key value back into a per-key patch element so the `!key`
/// operator can locate its target.
fn splice_key(element: &mut Node, steps: &[Step], key: &str) -> Result<()> {
    let Some((Step::Key(first), rest)) = steps.split_first() else {
        return Err(Error::path("keyed diff requires a field path".to_string()));
    };
    if rest.is_empty() {
        if element.get(first).is_none() {
            element.set_field(first, Node::from_string(key))?;
        }
        return Ok(());
    }
    if element.get(first).is_none() {
        element.set_field(first, Node::from_map(Vec::<(String, Node)>::new()))?;
    }
    let inner = element
        .get_mut(first)
        .ok_or_else(|| Error::path(format!("cannot splice key into field {first:?}")))?;
    splice_key(inner, rest, key)
}

/// Diffs two arrays element-wise by a key extracted from each element,
/// yielding a `!key(path)` patch whose elements carry the key.
pub fn diff_array_by_key(
    from: &Node,
    to: &Node,
    key_path: &str,
    ctx: &mut OpContext,
) -> Result<Option<Node>> {
    let steps = parse_path(key_path)?;
    let keyed = |node: &Node| -> Result<Node> {
        let mut pairs = Vec::new();
        for el in node.elements() {
            let key = crate::ir::path::get_path(el, key_path)?
                .ok_or_else(|| {
                    Error::structural(key_path, format!("element {el} has no key"))
                })?
                .key_string();
            pairs.push((key, el.detached()));
        }
        Ok(Node::from_map(pairs))
    };
    let keyed_from = keyed(from)?;
    let keyed_to = keyed(to)?;
    let Some(content) = diff_objects(&keyed_from, &keyed_to, ctx)? else {
        return Ok(None);
    };

    let mut elements = Vec::new();
    for (key, payload) in content.entries() {
        let mut element = payload.detached();
        if element.kind() != crate::ir::Kind::Object && !element.is_null() {
            return Err(Error::structural(
                key_path,
                format!("keyed element patch for {key:?} is not an object"),
            ));
        }
        if element.is_null() {
            // A bare `!delete`; give it the key so the target resolves.
            let chain = element.tag.clone();
            element = Node::from_map(Vec::<(String, Node)>::new());
            element.tag = chain;
        }
        splice_key(&mut element, &steps, key)?;
        elements.push(element);
    }
    Ok(Some(Node::from_slice(elements).with_tag(format!("!key({key_path})"))))
}
