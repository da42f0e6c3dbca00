//! # Operator registry
//!
//! Global symbol table of named operators. Each symbol declares its context
//! (match, patch, or both) and an `instance` factory that validates
//! arguments and builds the operator from the tag-stripped child node.
//!
//! Chained tags instantiate by consuming the leading head: for
//! `!all.has-path "x"` the registry yields `all` wrapping a child whose tag
//! is `!has-path`; the driver recursion instantiates the inner operator in
//! turn.

pub mod matchers;
pub mod patchers;

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::eval::OpContext;
use crate::ir::Node;
use crate::tag::{bare_head, tag_args};

/// Operator context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Match,
    Patch,
    Both,
}

impl OpKind {
    pub fn supports_match(self) -> bool {
        matches!(self, OpKind::Match | OpKind::Both)
    }

    pub fn supports_patch(self) -> bool {
        matches!(self, OpKind::Patch | OpKind::Both)
    }
}

/// An instantiated operator. The default bodies are unreachable when the
/// driver honors the symbol's [`OpKind`] at instantiation.
pub trait Op: std::fmt::Debug {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        let _ = (doc, ctx);
        Err(Error::type_error("operator does not support matching"))
    }

    /// Applies the operator; `None` removes the node from its container.
    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        let _ = (doc, ctx);
        Err(Error::type_error("operator does not support patching"))
    }

    /// Value to materialize when the patch target is absent. Only `!insert`
    /// provides one; everything else leaves absent fields absent.
    fn insert_value(&self) -> Option<&Node> {
        None
    }
}

/// A registered operator symbol.
#[derive(Clone, Copy)]
pub struct Symbol {
    pub name: &'static str,
    pub kind: OpKind,
    pub instance: fn(child: Node, args: Vec<String>) -> Result<Box<dyn Op>>,
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Symbol")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

static REGISTRY: Lazy<RwLock<BTreeMap<String, Symbol>>> = Lazy::new(|| {
    let mut table = BTreeMap::new();
    for sym in matchers::symbols().into_iter().chain(patchers::symbols()) {
        table.insert(sym.name.to_string(), sym);
    }
    RwLock::new(table)
});

/// Registers an operator; duplicate names are rejected.
pub fn register(symbol: Symbol) -> Result<()> {
    let mut table = REGISTRY.write();
    if table.contains_key(symbol.name) {
        return Err(Error::reference(format!(
            "operator {:?} is already registered",
            symbol.name
        )));
    }
    table.insert(symbol.name.to_string(), symbol);
    Ok(())
}

/// Looks up an operator by bare name.
pub fn lookup(name: &str) -> Option<Symbol> {
    REGISTRY.read().get(name).copied()
}

/// All registered operator names, sorted.
pub fn symbol_names() -> Vec<String> {
    REGISTRY.read().keys().cloned().collect()
}

/// Splits the leading head off a tagged node. If the head names a
/// registered operator, returns the symbol, its tag arguments, and the
/// child node carrying the remainder of the tag chain.
pub fn split_child(node: &Node) -> Result<Option<(Symbol, Vec<String>, Node)>> {
    if node.tag.is_empty() || node.tag.starts_with('.') {
        return Ok(None);
    }
    let (head, args, rest) = tag_args(&node.tag)?;
    let name = bare_head(&head);
    let Some(symbol) = lookup(&name) else {
        return Ok(None);
    };
    let mut child = node.detached();
    child.tag = match rest {
        None => String::new(),
        // A bracketed remainder is a definition reference; anything else
        // continues the operator chain.
        Some(r) if r.starts_with('[') => format!(".{r}"),
        Some(r) => format!("!{r}"),
    };
    Ok(Some((symbol, args, child)))
}

/// Strips the leading head of a tag chain without consulting the registry;
/// used by the driver to skip schema-tag decorations.
pub fn strip_head(node: &Node) -> Result<(String, Node)> {
    let (head, _args, rest) = tag_args(&node.tag)?;
    let mut stripped = node.detached();
    stripped.tag = match rest {
        None => String::new(),
        Some(r) if r.starts_with('[') => format!(".{r}"),
        Some(r) => format!("!{r}"),
    };
    Ok((bare_head(&head), stripped))
}

/// Arity guard shared by the factories.
pub(crate) fn expect_args(op: &str, args: &[String], want: usize) -> Result<()> {
    if args.len() == want {
        Ok(())
    } else {
        Err(Error::instantiation(
            op,
            format!("expected {want} argument(s), got {}", args.len()),
        ))
    }
}
