//! # Tony IR
//!
//! Tagged tree representation of a Tony document. Every node carries an
//! optional tag (`!name(args).rest` or `.ref`), an optional comment node,
//! and back-pointer metadata (`parent_field`, `parent_index`) maintained by
//! the constructors and rebuilt by path-sensitive mutations.
//!
//! Invariants:
//! - Objects keep `fields` (String-kind key nodes) and `values` in lockstep.
//! - A Number holds either an int or a float payload, never both.
//! - Tags are empty or begin with `!` (operator / type marker) or `.`
//!   (definition reference).
//! - `detached` produces a deep copy with the root back-pointers cleared.
//! - Structural equality ignores back-pointers; comment and tag comparison
//!   are controlled by [`EqOptions`].

pub mod path;

use std::fmt;

use crate::error::{Error, Result};

/// IR node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Comment,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Array => "array",
            Kind::Object => "object",
            Kind::Comment => "comment",
        };
        write!(f, "{name}")
    }
}

/// Node payload. The enum makes the int/float exclusivity of Numbers a
/// construction-time invariant.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Node>),
    Object { fields: Vec<Node>, values: Vec<Node> },
    Comment { lines: Vec<String> },
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

/// Flags for structural equality.
#[derive(Debug, Clone, Copy)]
pub struct EqOptions {
    /// Compare attached comments.
    pub comments: bool,
    /// Compare tags.
    pub tags: bool,
}

impl Default for EqOptions {
    fn default() -> Self {
        EqOptions { comments: false, tags: true }
    }
}

/// A Tony IR node.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub value: Value,
    /// Empty, or begins with `!` or `.`.
    pub tag: String,
    /// Attached decoration (`Kind::Comment`).
    pub comment: Option<Box<Node>>,
    /// Key of the object field this node sits under, if any.
    pub parent_field: Option<String>,
    /// Index of this node in its parent array or object, if any.
    pub parent_index: Option<usize>,
}

impl Node {
    fn with_value(value: Value) -> Node {
        Node { value, tag: String::new(), comment: None, parent_field: None, parent_index: None }
    }

    pub fn null() -> Node {
        Node::with_value(Value::Null)
    }

    pub fn from_bool(b: bool) -> Node {
        Node::with_value(Value::Bool(b))
    }

    pub fn from_int(i: i64) -> Node {
        Node::with_value(Value::Int(i))
    }

    pub fn from_float(f: f64) -> Node {
        Node::with_value(Value::Float(f))
    }

    pub fn from_string(s: impl Into<String>) -> Node {
        Node::with_value(Value::String(s.into()))
    }

    pub fn from_comment(lines: Vec<String>) -> Node {
        Node::with_value(Value::Comment { lines })
    }

    /// Array constructor; assigns element back-pointers.
    pub fn from_slice(elements: Vec<Node>) -> Node {
        let mut node = Node::with_value(Value::Array(elements));
        node.relink();
        node
    }

    /// Object constructor from (key, value) pairs; field order matches
    /// insertion order.
    pub fn from_map<K: Into<String>>(pairs: Vec<(K, Node)>) -> Node {
        let mut fields = Vec::with_capacity(pairs.len());
        let mut values = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            fields.push(Node::from_string(k));
            values.push(v);
        }
        let mut node = Node::with_value(Value::Object { fields, values });
        node.relink();
        node
    }

    /// Object constructor from explicit key nodes (keys keep their own tags
    /// and comments).
    pub fn from_keyvals(pairs: Vec<(Node, Node)>) -> Node {
        let mut fields = Vec::with_capacity(pairs.len());
        let mut values = Vec::with_capacity(pairs.len());
        for (k, v) in pairs {
            fields.push(k);
            values.push(v);
        }
        let mut node = Node::with_value(Value::Object { fields, values });
        node.relink();
        node
    }

    /// Object constructor keyed by integers, ascending-numeric field order.
    pub fn from_int_keys_map(pairs: impl IntoIterator<Item = (u64, Node)>) -> Node {
        let mut sorted: Vec<(u64, Node)> = pairs.into_iter().collect();
        sorted.sort_by_key(|(k, _)| *k);
        Node::from_map(sorted.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    pub fn kind(&self) -> Kind {
        match &self.value {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) | Value::Float(_) => Kind::Number,
            Value::String(_) => Kind::String,
            Value::Array(_) => Kind::Array,
            Value::Object { .. } => Kind::Object,
            Value::Comment { .. } => Kind::Comment,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.value, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match &self.value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match &self.value {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Replaces the tag, fluently.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Node {
        self.tag = tag.into();
        self
    }

    pub fn with_comment(mut self, comment: Node) -> Node {
        self.comment = Some(Box::new(comment));
        self
    }

    /// Deep copy with the root back-pointers cleared.
    pub fn detached(&self) -> Node {
        let mut copy = self.clone();
        copy.parent_field = None;
        copy.parent_index = None;
        copy
    }

    /// Overwrites this node in place with a copy of `src`, preserving this
    /// node's own parent links.
    pub fn clone_to(&mut self, src: &Node) {
        let pf = self.parent_field.take();
        let pi = self.parent_index.take();
        *self = src.clone();
        self.parent_field = pf;
        self.parent_index = pi;
    }

    /// Object lookup by key string. Missing keys are absent, not an error.
    pub fn get(&self, key: &str) -> Option<&Node> {
        match &self.value {
            Value::Object { fields, values } => fields
                .iter()
                .position(|f| f.as_str() == Some(key))
                .and_then(|i| values.get(i)),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Node> {
        match &mut self.value {
            Value::Object { fields, values } => {
                let idx = fields.iter().position(|f| f.as_str() == Some(key))?;
                values.get_mut(idx)
            }
            _ => None,
        }
    }

    /// Array elements; empty for non-arrays.
    pub fn elements(&self) -> &[Node] {
        match &self.value {
            Value::Array(els) => els,
            _ => &[],
        }
    }

    /// Iterates (key, value) pairs of an object in field order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Node)> {
        let (fields, values) = match &self.value {
            Value::Object { fields, values } => (fields.as_slice(), values.as_slice()),
            _ => (&[][..], &[][..]),
        };
        fields
            .iter()
            .zip(values.iter())
            .filter_map(|(f, v)| f.as_str().map(|k| (k, v)))
    }

    /// Appends or replaces an object field, fixing back-pointers.
    pub fn set_field(&mut self, key: &str, value: Node) -> Result<()> {
        match &mut self.value {
            Value::Object { fields, values } => {
                if let Some(i) = fields.iter().position(|f| f.as_str() == Some(key)) {
                    values[i] = value;
                } else {
                    fields.push(Node::from_string(key));
                    values.push(value);
                }
                self.relink();
                Ok(())
            }
            _ => Err(Error::type_error(format!(
                "cannot set field {key:?} on {} node",
                self.kind()
            ))),
        }
    }

    /// Removes an object field, fixing back-pointers of the survivors.
    pub fn remove_field(&mut self, key: &str) -> Option<Node> {
        match &mut self.value {
            Value::Object { fields, values } => {
                let idx = fields.iter().position(|f| f.as_str() == Some(key))?;
                fields.remove(idx);
                let mut removed = values.remove(idx);
                removed.parent_field = None;
                removed.parent_index = None;
                self.relink();
                Some(removed)
            }
            _ => None,
        }
    }

    /// Renames an object field in place.
    pub fn rename_field(&mut self, from: &str, to: &str) -> Result<()> {
        match &mut self.value {
            Value::Object { fields, values } => {
                let idx = fields
                    .iter()
                    .position(|f| f.as_str() == Some(from))
                    .ok_or_else(|| {
                        Error::structural(from, format!("no field {from:?} to rename"))
                    })?;
                fields[idx] = Node::from_string(to);
                values[idx].parent_field = Some(to.to_string());
                Ok(())
            }
            _ => Err(Error::type_error(format!(
                "cannot rename field on {} node",
                self.kind()
            ))),
        }
    }

    /// Rebuilds the back-pointers of direct children. Operators that
    /// synthesize new objects or arrays call this before returning.
    pub fn relink(&mut self) {
        match &mut self.value {
            Value::Array(els) => {
                for (i, el) in els.iter_mut().enumerate() {
                    el.parent_field = None;
                    el.parent_index = Some(i);
                }
            }
            Value::Object { fields, values } => {
                for i in 0..fields.len().min(values.len()) {
                    fields[i].parent_field = None;
                    fields[i].parent_index = Some(i);
                    let key = fields[i].as_str().map(str::to_string);
                    values[i].parent_field = key;
                    values[i].parent_index = Some(i);
                }
            }
            _ => {}
        }
    }

    /// Structural equality under explicit flags. Back-pointers never
    /// participate.
    pub fn structural_eq(&self, other: &Node, opts: EqOptions) -> bool {
        if opts.tags && self.tag != other.tag {
            return false;
        }
        if opts.comments {
            match (&self.comment, &other.comment) {
                (None, None) => {}
                (Some(a), Some(b)) => {
                    if !a.structural_eq(b, opts) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        match (&self.value, &other.value) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y, opts))
            }
            (Value::Object { fields: af, .. }, Value::Object { fields: bf, .. }) => {
                // Objects compare by key, not by field position, so that
                // field-name diffs round-trip through apply.
                af.len() == bf.len()
                    && self.entries().all(|(key, v)| {
                        other.get(key).is_some_and(|ov| v.structural_eq(ov, opts))
                    })
            }
            (Value::Comment { lines: a }, Value::Comment { lines: b }) => a == b,
            _ => false,
        }
    }

    /// Preorder/postorder traversal. The callback is invoked with
    /// `is_post = false` before children and `is_post = true` after;
    /// returning `false` from the pre call skips the subtree.
    pub fn visit<F>(&self, f: &mut F) -> Result<()>
    where
        F: FnMut(&Node, bool) -> Result<bool>,
    {
        if !f(self, false)? {
            return Ok(());
        }
        match &self.value {
            Value::Array(els) => {
                for el in els {
                    el.visit(f)?;
                }
            }
            Value::Object { fields, values } => {
                for (k, v) in fields.iter().zip(values.iter()) {
                    k.visit(f)?;
                    v.visit(f)?;
                }
            }
            _ => {}
        }
        f(self, true)?;
        Ok(())
    }

    /// Mutable preorder walk. The callback runs on the parent before its
    /// children, so splices are seen by the recursion.
    pub fn walk_mut<F>(&mut self, f: &mut F) -> Result<()>
    where
        F: FnMut(&mut Node) -> Result<()>,
    {
        f(self)?;
        match &mut self.value {
            Value::Array(els) => {
                for el in els {
                    el.walk_mut(f)?;
                }
            }
            Value::Object { fields, values } => {
                for (k, v) in fields.iter_mut().zip(values.iter_mut()) {
                    k.walk_mut(f)?;
                    v.walk_mut(f)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Canonical string key for keyed-list diffing: the raw string for
    /// String nodes, the JSON encoding otherwise.
    pub fn key_string(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            _ => crate::codec::encode(self),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.structural_eq(other, EqOptions::default())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tag.is_empty() {
            write!(f, "{} ", self.tag)?;
        }
        match &self.value {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Array(els) => {
                write!(f, "[")?;
                for (i, el) in els.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{el}")?;
                }
                write!(f, "]")
            }
            Value::Object { fields, values } => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().zip(values.iter()).enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {v}", k.as_str().unwrap_or("?"))?;
                }
                write!(f, "}}")
            }
            Value::Comment { lines } => write!(f, "# {}", lines.join(" # ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_constructor_preserves_order_and_links() {
        let node = Node::from_map(vec![
            ("b", Node::from_int(1)),
            ("a", Node::from_int(2)),
        ]);
        let keys: Vec<&str> = node.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(node.get("a").and_then(Node::as_int), Some(2));
        assert_eq!(node.get("a").and_then(|n| n.parent_field.as_deref()), Some("a"));
        assert_eq!(node.get("a").and_then(|n| n.parent_index), Some(1));
        assert!(node.get("missing").is_none());
    }

    #[test]
    fn int_keys_map_sorts_ascending() {
        let node = Node::from_int_keys_map(vec![
            (10, Node::null()),
            (2, Node::null()),
            (1, Node::null()),
        ]);
        let keys: Vec<&str> = node.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["1", "2", "10"]);
    }

    #[test]
    fn detached_clone_is_equal_and_independent() {
        let original = Node::from_map(vec![(
            "inner",
            Node::from_slice(vec![Node::from_int(1), Node::from_string("x")]),
        )])
        .with_tag("!foo");
        let mut copy = original.detached();
        assert_eq!(copy, original);
        assert!(copy.parent_field.is_none());

        copy.set_field("inner", Node::null()).expect("object");
        assert_ne!(copy, original);
        assert_eq!(original.get("inner").map(|n| n.elements().len()), Some(2));
    }

    #[test]
    fn structural_eq_respects_flags() {
        let a = Node::from_int(1).with_tag("!x");
        let b = Node::from_int(1).with_tag("!y");
        assert!(!a.structural_eq(&b, EqOptions::default()));
        assert!(a.structural_eq(&b, EqOptions { comments: false, tags: false }));
    }

    #[test]
    fn int_and_float_payloads_are_distinct() {
        assert_ne!(Node::from_int(1), Node::from_float(1.0));
        assert_eq!(Node::from_int(1).kind(), Node::from_float(1.0).kind());
    }

    #[test]
    fn rename_field_updates_links() {
        let mut node = Node::from_map(vec![("old", Node::from_int(7))]);
        node.rename_field("old", "new").expect("field exists");
        assert!(node.get("old").is_none());
        assert_eq!(node.get("new").and_then(Node::as_int), Some(7));
        assert_eq!(node.get("new").and_then(|n| n.parent_field.as_deref()), Some("new"));
        assert!(node.rename_field("gone", "x").is_err());
    }

    #[test]
    fn visit_preorder_can_prune() {
        let tree = Node::from_map(vec![
            ("a", Node::from_slice(vec![Node::from_int(1)])),
            ("b", Node::from_int(2)),
        ]);
        let mut kinds = Vec::new();
        tree.visit(&mut |n, post| {
            if !post {
                kinds.push(n.kind());
                return Ok(n.kind() != Kind::Array);
            }
            Ok(true)
        })
        .expect("no errors");
        // The array was reported but its element pruned; "b" still visited.
        assert!(kinds.contains(&Kind::Array));
        assert_eq!(kinds.iter().filter(|k| **k == Kind::Number).count(), 1);
    }
}
