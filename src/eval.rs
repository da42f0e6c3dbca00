//! # Match/patch driver
//!
//! Recursive evaluator dispatching by leading tag through the operator
//! registry, threading an [`OpContext`] that carries the definition
//! environment, the expansion guard, and the behavioral flags.
//!
//! Dispatch per node:
//! 1. a `.`-tag is a definition reference: expand and recurse;
//! 2. a `!`-tag naming a registered operator instantiates it;
//! 3. a `!`-tag naming a schema tag is decoration: strip and continue;
//! 4. otherwise match/patch structurally (objects field-wise, arrays
//!    positionally, scalars by equality under the context flags).
//!
//! The `expanding` guard prevents immediate re-expansion of a definition
//! with no structural progress; descending into document structure resets
//! it, so recursive definitions expand once per document level.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::trace;

use crate::config;
use crate::defs::{self, DefEnv};
use crate::error::{Error, Result};
use crate::ir::{EqOptions, Node, Value};
use crate::ops;
use crate::schema::{registry::SchemaRegistry, Schema};

/// Per-call evaluation state. Owned by the caller; forked contexts clear
/// the expansion guard.
#[derive(Debug, Clone)]
pub struct OpContext {
    /// Definition environment (base defs plus the schema's `define`).
    pub defs: DefEnv,
    /// Definitions currently being expanded with no structural progress.
    pub expanding: HashSet<String>,
    /// Compare comments during structural equality.
    pub comments: bool,
    /// Compare tags during structural equality.
    pub tags_strict: bool,
    /// Registry for `!schema(...)` / `!from(...)` resolution.
    pub registry: Option<Arc<SchemaRegistry>>,
    /// Schema tag names treated as decoration by the driver.
    pub tag_names: BTreeSet<String>,
}

impl Default for OpContext {
    fn default() -> Self {
        OpContext {
            defs: defs::base_env(),
            expanding: HashSet::new(),
            comments: false,
            tags_strict: false,
            registry: None,
            tag_names: BTreeSet::new(),
        }
    }
}

impl OpContext {
    pub fn new() -> Self {
        OpContext::default()
    }

    /// Context for validating against a schema: its definitions, its tag
    /// names, and the given registry.
    pub fn for_schema(schema: &Schema, registry: Option<Arc<SchemaRegistry>>) -> Result<Self> {
        Ok(OpContext {
            defs: defs::load_env(&schema.define)?,
            expanding: HashSet::new(),
            comments: false,
            tags_strict: false,
            registry,
            tag_names: schema.tags.keys().cloned().collect(),
        })
    }

    /// Clone with the expansion guard cleared.
    pub fn fork(&self) -> Self {
        let mut copy = self.clone();
        copy.expanding.clear();
        copy
    }

    pub fn eq_options(&self) -> EqOptions {
        EqOptions { comments: self.comments, tags: self.tags_strict }
    }

    /// Runs `f` with the expansion guard reset; structural progress into
    /// the document allows definitions to expand again.
    pub fn descend<T>(&mut self, f: impl FnOnce(&mut OpContext) -> T) -> T {
        let saved = std::mem::take(&mut self.expanding);
        let out = f(self);
        self.expanding = saved;
        out
    }
}

/// Matches `doc` against `pattern`. Errors are reserved for malformed
/// patterns; a failed match is `Ok(false)`.
pub fn match_nodes(doc: &Node, pattern: &Node, ctx: &mut OpContext) -> Result<bool> {
    if config::debug().matches {
        trace!(doc = %doc, pattern = %pattern, "match");
    }
    if pattern.tag.is_empty() {
        return match_structural(doc, pattern, ctx);
    }

    // Definition reference in tag position.
    if let Some(expr) = defs::tag_ref_expr(&pattern.tag) {
        let (base, _) = defs::parse_def_call(&expr)?;
        if ctx.expanding.contains(&base) {
            // Re-entry with no structural progress cannot bottom out.
            return Ok(false);
        }
        let expanded = defs::expand_ref(&expr, ctx)?;
        ctx.expanding.insert(base.clone());
        let result = match_nodes(doc, &expanded, ctx);
        ctx.expanding.remove(&base);
        return result;
    }

    // Operator dispatch.
    if let Some((symbol, args, child)) = ops::split_child(pattern)? {
        if !symbol.kind.supports_match() {
            return Err(Error::instantiation(
                symbol.name,
                "patch-only operator used in a match",
            ));
        }
        if config::debug().op {
            trace!(op = symbol.name, "instantiate");
        }
        let op = (symbol.instance)(child, args)?;
        return op.matches(doc, ctx);
    }

    // Schema-tag decoration, else an unknown head.
    let (head, stripped) = ops::strip_head(pattern)?;
    if ctx.tag_names.contains(&head) {
        return match_nodes(doc, &stripped, ctx);
    }
    Err(Error::reference(format!("unknown tag head {head:?} in pattern")))
}

fn match_structural(doc: &Node, pattern: &Node, ctx: &mut OpContext) -> Result<bool> {
    // String-leaf definition reference.
    if let Some(expr) = pattern.as_str().and_then(defs::ref_expr).map(str::to_string) {
        let (base, _) = defs::parse_def_call(&expr)?;
        if ctx.expanding.contains(&base) {
            return Ok(false);
        }
        let expanded = defs::expand_ref(&expr, ctx)?;
        ctx.expanding.insert(base.clone());
        let result = match_nodes(doc, &expanded, ctx);
        ctx.expanding.remove(&base);
        return result;
    }

    if ctx.tags_strict && doc.tag != pattern.tag {
        return Ok(false);
    }

    match (&pattern.value, &doc.value) {
        (Value::Object { .. }, Value::Object { .. }) => {
            for (key, pattern_value) in pattern.entries() {
                let Some(doc_value) = doc.get(key) else {
                    return Ok(false);
                };
                if !ctx.descend(|ctx| match_nodes(doc_value, pattern_value, ctx))? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Array(pattern_els), Value::Array(doc_els)) => {
            // Every pattern element must match positionally; a longer doc
            // is allowed, a shorter one fails.
            if doc_els.len() < pattern_els.len() {
                return Ok(false);
            }
            for (i, pattern_value) in pattern_els.iter().enumerate() {
                if !ctx.descend(|ctx| match_nodes(&doc_els[i], pattern_value, ctx))? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(doc.structural_eq(pattern, ctx.eq_options())),
    }
}

/// Applies `patch` to `doc`, returning the new document. A removal at the
/// root yields a null document.
pub fn patch_nodes(doc: &Node, patch: &Node, ctx: &mut OpContext) -> Result<Node> {
    if config::debug().patch {
        trace!(doc = %doc, patch = %patch, "patch");
    }
    Ok(patch_inner(doc, patch, ctx)?.unwrap_or_else(Node::null))
}

/// Driver recursion for patches; `None` removes the node from its
/// container.
pub fn patch_inner(doc: &Node, patch: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
    if config::debug().patches {
        trace!(doc = %doc, patch = %patch, "patch step");
    }
    if patch.tag.is_empty() {
        return patch_structural(doc, patch, ctx);
    }

    if let Some(expr) = defs::tag_ref_expr(&patch.tag) {
        let (base, _) = defs::parse_def_call(&expr)?;
        if ctx.expanding.contains(&base) {
            return Ok(Some(doc.detached()));
        }
        let expanded = defs::expand_ref(&expr, ctx)?;
        ctx.expanding.insert(base.clone());
        let result = patch_inner(doc, &expanded, ctx);
        ctx.expanding.remove(&base);
        return result;
    }

    if let Some((symbol, args, child)) = ops::split_child(patch)? {
        if !symbol.kind.supports_patch() {
            return Err(Error::instantiation(
                symbol.name,
                "match-only operator used in a patch",
            ));
        }
        if config::debug().op {
            trace!(op = symbol.name, "instantiate");
        }
        let op = (symbol.instance)(child, args)?;
        return op.patch(doc, ctx);
    }

    let (head, stripped) = ops::strip_head(patch)?;
    if ctx.tag_names.contains(&head) {
        return patch_inner(doc, &stripped, ctx);
    }
    Err(Error::reference(format!("unknown tag head {head:?} in patch")))
}

/// Patch applied where the target is absent. Only `!insert` materializes a
/// value; everything else leaves the field absent.
pub fn patch_absent(patch: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
    if patch.tag.is_empty() || patch.tag.starts_with('.') {
        return Ok(None);
    }
    if let Some((symbol, args, child)) = ops::split_child(patch)? {
        let op = (symbol.instance)(child, args)?;
        return Ok(op.insert_value().map(Node::detached));
    }
    let (head, stripped) = ops::strip_head(patch)?;
    if ctx.tag_names.contains(&head) {
        return patch_absent(&stripped, ctx);
    }
    Ok(None)
}

fn patch_structural(doc: &Node, patch: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
    // String-leaf definition reference.
    if let Some(expr) = patch.as_str().and_then(defs::ref_expr).map(str::to_string) {
        let (base, _) = defs::parse_def_call(&expr)?;
        if ctx.expanding.contains(&base) {
            return Ok(Some(doc.detached()));
        }
        let expanded = defs::expand_ref(&expr, ctx)?;
        ctx.expanding.insert(base.clone());
        let result = patch_inner(doc, &expanded, ctx);
        ctx.expanding.remove(&base);
        return result;
    }

    match (&doc.value, &patch.value) {
        (Value::Object { .. }, Value::Object { .. }) => {
            let mut out = doc.detached();
            for (key, patch_value) in patch.entries() {
                match out.get(key).map(Node::detached) {
                    Some(existing) => {
                        match ctx.descend(|ctx| patch_inner(&existing, patch_value, ctx))? {
                            Some(updated) => out.set_field(key, updated)?,
                            None => {
                                out.remove_field(key);
                            }
                        }
                    }
                    None => {
                        // Absent fields are left unchanged unless inserted.
                        if let Some(inserted) = ctx.descend(|ctx| patch_absent(patch_value, ctx))? {
                            out.set_field(key, inserted)?;
                        }
                    }
                }
            }
            Ok(Some(out))
        }
        (Value::Array(doc_els), Value::Array(patch_els)) => {
            let mut out = Vec::with_capacity(doc_els.len().max(patch_els.len()));
            for (i, doc_el) in doc_els.iter().enumerate() {
                match patch_els.get(i) {
                    Some(patch_el) => {
                        if let Some(updated) =
                            ctx.descend(|ctx| patch_inner(doc_el, patch_el, ctx))?
                        {
                            out.push(updated);
                        }
                    }
                    None => out.push(doc_el.detached()),
                }
            }
            // Extra patch elements append.
            for patch_el in patch_els.iter().skip(doc_els.len()) {
                match ctx.descend(|ctx| patch_absent(patch_el, ctx))? {
                    Some(inserted) => out.push(inserted),
                    None => out.push(patch_el.detached()),
                }
            }
            let mut node = Node::from_slice(out);
            node.tag = doc.tag.clone();
            node.comment = doc.comment.clone();
            Ok(Some(node))
        }
        _ => {
            // Scalar (or kind-changing) replacement; an untagged patch
            // value keeps the document's tag and comment.
            let mut out = patch.detached();
            if out.tag.is_empty() {
                out.tag = doc.tag.clone();
            }
            if out.comment.is_none() {
                out.comment = doc.comment.clone();
            }
            Ok(Some(out))
        }
    }
}

/// Validates a document against a schema's accept constraint.
pub fn validate(
    doc: &Node,
    schema: &Schema,
    registry: Option<Arc<SchemaRegistry>>,
) -> Result<bool> {
    let mut ctx = OpContext::for_schema(schema, registry)?;
    let outcome = match &schema.accept {
        Some(accept) => match_nodes(doc, accept, &mut ctx),
        None => Ok(true),
    };
    if config::debug().match_ {
        trace!(schema = %schema.signature.name, ok = ?outcome.as_ref().ok(), "validate");
    }
    outcome
}
