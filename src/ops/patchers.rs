//! Built-in patch operators, including the tag-rewrite vocabulary emitted
//! by the diff engine (`!insert-tag`, `!delete-tag`, `!replace-tag`).

use std::collections::BTreeMap;

use crate::codec;
use crate::error::{Error, Result};
use crate::eval::{patch_inner, OpContext};
use crate::ir::{Kind, Node, Value};
use crate::ops::{expect_args, strip_head, Op, OpKind, Symbol};

pub(crate) fn symbols() -> Vec<Symbol> {
    vec![
        Symbol { name: "nullify", kind: OpKind::Patch, instance: nullify_instance },
        Symbol { name: "replace", kind: OpKind::Patch, instance: replace_instance },
        Symbol { name: "insert", kind: OpKind::Patch, instance: insert_instance },
        Symbol { name: "delete", kind: OpKind::Patch, instance: delete_instance },
        Symbol { name: "rename", kind: OpKind::Patch, instance: rename_instance },
        Symbol { name: "retag", kind: OpKind::Patch, instance: retag_instance },
        Symbol { name: "addtag", kind: OpKind::Patch, instance: addtag_instance },
        Symbol { name: "rmtag", kind: OpKind::Patch, instance: rmtag_instance },
        Symbol { name: "embed", kind: OpKind::Patch, instance: embed_instance },
        Symbol { name: "dive", kind: OpKind::Patch, instance: dive_instance },
        Symbol { name: "json-patch", kind: OpKind::Patch, instance: json_patch_instance },
        Symbol { name: "unquote", kind: OpKind::Patch, instance: unquote_instance },
        Symbol { name: "arraydiff", kind: OpKind::Patch, instance: arraydiff_instance },
        Symbol { name: "strdiff", kind: OpKind::Patch, instance: strdiff_instance },
        Symbol { name: "insert-tag", kind: OpKind::Patch, instance: insert_tag_instance },
        Symbol { name: "delete-tag", kind: OpKind::Patch, instance: delete_tag_instance },
        Symbol { name: "replace-tag", kind: OpKind::Patch, instance: replace_tag_instance },
    ]
}

fn path_hint(doc: &Node) -> String {
    match (&doc.parent_field, doc.parent_index) {
        (Some(field), _) => field.clone(),
        (None, Some(i)) => format!("[{i}]"),
        (None, None) => String::new(),
    }
}

/// Re-dispatches through the driver after a tag rewrite; an untagged null
/// child means "no content patch".
fn continue_patch(doc: Node, child: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
    if child.is_null() && child.tag.is_empty() {
        Ok(Some(doc))
    } else {
        patch_inner(&doc, child, ctx)
    }
}

// ---------------------------------------------------------------------------
// Whole-node replacement
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct NullifyOp;

fn nullify_instance(_child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("nullify", &args, 0)?;
    Ok(Box::new(NullifyOp))
}

impl Op for NullifyOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        Ok(Some(Node::null().with_tag(doc.tag.clone())))
    }
}

#[derive(Debug)]
struct ReplaceOp {
    from: Node,
    to: Node,
}

fn replace_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("replace", &args, 0)?;
    let from = child
        .get("from")
        .ok_or_else(|| Error::instantiation("replace", "child must carry `from`"))?
        .detached();
    let to = child
        .get("to")
        .ok_or_else(|| Error::instantiation("replace", "child must carry `to`"))?
        .detached();
    Ok(Box::new(ReplaceOp { from, to }))
}

impl Op for ReplaceOp {
    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        if !doc.structural_eq(&self.from, ctx.eq_options()) {
            let divergence = crate::diff::diff(&self.from, doc, ctx)?
                .map_or_else(|| "(equal under different flags)".to_string(), |d| d.to_string());
            return Err(Error::structural(
                path_hint(doc),
                format!("!replace expected {} but found {doc}; divergence: {divergence}", self.from),
            ));
        }
        Ok(Some(self.to.detached()))
    }
}

// ---------------------------------------------------------------------------
// Container edits
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct InsertOp {
    child: Node,
}

fn insert_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("insert", &args, 0)?;
    Ok(Box::new(InsertOp { child }))
}

impl Op for InsertOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        Err(Error::structural(
            path_hint(doc),
            "!insert target already present".to_string(),
        ))
    }

    fn insert_value(&self) -> Option<&Node> {
        Some(&self.child)
    }
}

#[derive(Debug)]
struct DeleteOp;

fn delete_instance(_child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("delete", &args, 0)?;
    Ok(Box::new(DeleteOp))
}

impl Op for DeleteOp {
    fn patch(&self, _doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        Ok(None)
    }
}

#[derive(Debug)]
struct RenameOp {
    from: String,
    to: String,
}

fn rename_instance(_child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("rename", &args, 2)?;
    Ok(Box::new(RenameOp { from: args[0].clone(), to: args[1].clone() }))
}

impl Op for RenameOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        let mut out = doc.detached();
        out.rename_field(&self.from, &self.to)?;
        Ok(Some(out))
    }
}

// ---------------------------------------------------------------------------
// Tag rewrites
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RetagOp {
    from: String,
    to: String,
}

fn retag_instance(_child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("retag", &args, 2)?;
    Ok(Box::new(RetagOp { from: args[0].clone(), to: args[1].clone() }))
}

impl Op for RetagOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        let expected = format!("!{}", self.from);
        if doc.tag != expected {
            return Err(Error::structural(
                path_hint(doc),
                format!("!retag expected tag {expected:?} but found {:?}", doc.tag),
            ));
        }
        Ok(Some(doc.detached().with_tag(format!("!{}", self.to))))
    }
}

#[derive(Debug)]
struct AddTagOp {
    tag: String,
}

fn addtag_instance(_child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("addtag", &args, 1)?;
    Ok(Box::new(AddTagOp { tag: args[0].clone() }))
}

impl Op for AddTagOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        Ok(Some(doc.detached().with_tag(format!("!{}", self.tag))))
    }
}

#[derive(Debug)]
struct RmTagOp {
    tag: String,
}

fn rmtag_instance(_child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("rmtag", &args, 1)?;
    Ok(Box::new(RmTagOp { tag: args[0].clone() }))
}

impl Op for RmTagOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        let expected = format!("!{}", self.tag);
        if doc.tag != expected {
            return Err(Error::structural(
                path_hint(doc),
                format!("!rmtag expected tag {expected:?} but found {:?}", doc.tag),
            ));
        }
        Ok(Some(doc.detached().with_tag("")))
    }
}

#[derive(Debug)]
struct InsertTagOp {
    tag: String,
    child: Node,
}

fn insert_tag_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("insert-tag", &args, 1)?;
    Ok(Box::new(InsertTagOp { tag: args[0].clone(), child }))
}

impl Op for InsertTagOp {
    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        if !doc.tag.is_empty() {
            return Err(Error::structural(
                path_hint(doc),
                format!("!insert-tag expected an untagged node but found {:?}", doc.tag),
            ));
        }
        let retagged = doc.detached().with_tag(format!("!{}", self.tag));
        continue_patch(retagged, &self.child, ctx)
    }
}

#[derive(Debug)]
struct DeleteTagOp {
    tag: String,
    child: Node,
}

fn delete_tag_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("delete-tag", &args, 1)?;
    Ok(Box::new(DeleteTagOp { tag: args[0].clone(), child }))
}

impl Op for DeleteTagOp {
    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        let expected = format!("!{}", self.tag);
        if doc.tag != expected {
            return Err(Error::structural(
                path_hint(doc),
                format!("!delete-tag expected tag {expected:?} but found {:?}", doc.tag),
            ));
        }
        let retagged = doc.detached().with_tag("");
        continue_patch(retagged, &self.child, ctx)
    }
}

#[derive(Debug)]
struct ReplaceTagOp {
    from: String,
    to: String,
    child: Node,
}

fn replace_tag_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("replace-tag", &args, 2)?;
    Ok(Box::new(ReplaceTagOp { from: args[0].clone(), to: args[1].clone(), child }))
}

impl Op for ReplaceTagOp {
    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        let expected = format!("!{}", self.from);
        if doc.tag != expected {
            return Err(Error::structural(
                path_hint(doc),
                format!("!replace-tag expected tag {expected:?} but found {:?}", doc.tag),
            ));
        }
        let retagged = doc.detached().with_tag(format!("!{}", self.to));
        continue_patch(retagged, &self.child, ctx)
    }
}

// ---------------------------------------------------------------------------
// Structural splices
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct EmbedOp {
    key: String,
    child: Node,
}

fn embed_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("embed", &args, 1)?;
    Ok(Box::new(EmbedOp { key: args[0].clone(), child }))
}

impl Op for EmbedOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        let embedded = doc.detached();
        let mut out = self.child.detached();
        out.walk_mut(&mut |node| {
            if node.as_str() == Some(self.key.as_str()) {
                let own_tag = node.tag.clone();
                node.value = embedded.value.clone();
                if embedded.tag.is_empty() {
                    node.tag = own_tag;
                } else {
                    node.tag = embedded.tag.clone();
                }
            }
            Ok(())
        })?;
        Ok(Some(out))
    }
}

#[derive(Debug)]
struct DiveOp {
    child: Node,
}

fn dive_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("dive", &args, 0)?;
    Ok(Box::new(DiveOp { child }))
}

fn merge(doc: &Node, overlay: &Node) -> Node {
    match (&doc.value, &overlay.value) {
        (Value::Object { .. }, Value::Object { .. }) => {
            let mut out = doc.detached();
            for (key, over_value) in overlay.entries() {
                let merged = match out.get(key) {
                    Some(existing) => merge(existing, over_value),
                    None => over_value.detached(),
                };
                // set_field on an object cannot fail
                let _ = out.set_field(key, merged);
            }
            out
        }
        (Value::Array(doc_els), Value::Array(over_els)) => {
            let mut out = Vec::with_capacity(doc_els.len().max(over_els.len()));
            for i in 0..doc_els.len().max(over_els.len()) {
                match (doc_els.get(i), over_els.get(i)) {
                    (Some(d), Some(o)) => out.push(merge(d, o)),
                    (Some(d), None) => out.push(d.detached()),
                    (None, Some(o)) => out.push(o.detached()),
                    (None, None) => {}
                }
            }
            let mut node = Node::from_slice(out);
            node.tag = doc.tag.clone();
            node.comment = doc.comment.clone();
            node
        }
        _ => overlay.detached(),
    }
}

impl Op for DiveOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        Ok(Some(merge(doc, &self.child)))
    }
}

// ---------------------------------------------------------------------------
// External formats
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct JsonPatchOp {
    ops: json_patch::Patch,
}

fn json_patch_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("json-patch", &args, 0)?;
    let ops: json_patch::Patch = serde_json::from_value(codec::to_json(&child))
        .map_err(|e| Error::instantiation("json-patch", format!("bad RFC-6902 payload: {e}")))?;
    Ok(Box::new(JsonPatchOp { ops }))
}

impl Op for JsonPatchOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        let mut value = codec::to_json(doc);
        json_patch::patch(&mut value, &self.ops).map_err(|e| {
            Error::structural(path_hint(doc), format!("json-patch failed: {e}"))
        })?;
        // Serialize/apply/reparse; the root tag survives, inner tags do not.
        Ok(Some(codec::from_json(&value).with_tag(doc.tag.clone())))
    }
}

#[derive(Debug)]
struct UnquoteOp;

fn unquote_instance(_child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("unquote", &args, 0)?;
    Ok(Box::new(UnquoteOp))
}

impl Op for UnquoteOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        let text = doc.as_str().ok_or_else(|| {
            Error::type_error(format!("!unquote applied to {} node", doc.kind()))
        })?;
        let mut parsed = codec::parse(text)?;
        parsed.comment = doc.comment.clone();
        Ok(Some(parsed))
    }
}

// ---------------------------------------------------------------------------
// Diff payload application
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ArrayDiffOp {
    child: Node,
}

fn arraydiff_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("arraydiff", &args, 0)?;
    if child.kind() != Kind::Object {
        return Err(Error::instantiation(
            "arraydiff",
            "child must be an object keyed by array indices",
        ));
    }
    Ok(Box::new(ArrayDiffOp { child }))
}

impl Op for ArrayDiffOp {
    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        if doc.kind() != Kind::Array {
            return Err(Error::type_error(format!(
                "!arraydiff applied to {} node",
                doc.kind()
            )));
        }
        let mut entries: BTreeMap<u64, &Node> = BTreeMap::new();
        for (key, value) in self.child.entries() {
            let index: u64 = key.parse().map_err(|_| {
                Error::structural(path_hint(doc), format!("non-numeric arraydiff key {key:?}"))
            })?;
            entries.insert(index, value);
        }

        let elements = doc.elements();
        let mut out: Vec<Node> = Vec::with_capacity(elements.len());
        let mut from_index = 0usize;
        let mut walk: u64 = 0;
        loop {
            if let Some(entry) = entries.remove(&walk) {
                let (head, stripped) = strip_head(entry)?;
                if head == "insert" {
                    out.push(stripped);
                } else {
                    let Some(current) = elements.get(from_index) else {
                        return Err(Error::structural(
                            format!("[{walk}]"),
                            "arraydiff entry beyond end of array".to_string(),
                        ));
                    };
                    if let Some(patched) = patch_inner(current, entry, ctx)? {
                        out.push(patched);
                    }
                    from_index += 1;
                }
                walk += 1;
                continue;
            }
            if let Some(current) = elements.get(from_index) {
                out.push(current.detached());
                from_index += 1;
                walk += 1;
                continue;
            }
            break;
        }
        if let Some((stray, _)) = entries.iter().next() {
            return Err(Error::structural(
                format!("[{stray}]"),
                "arraydiff key out of range".to_string(),
            ));
        }
        let mut node = Node::from_slice(out);
        node.tag = doc.tag.clone();
        node.comment = doc.comment.clone();
        Ok(Some(node))
    }
}

#[derive(Debug)]
struct StrDiffOp {
    child: Node,
}

fn strdiff_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("strdiff", &args, 0)?;
    if child.kind() != Kind::Array {
        return Err(Error::instantiation("strdiff", "child must be an array of (op, text) pairs"));
    }
    Ok(Box::new(StrDiffOp { child }))
}

impl Op for StrDiffOp {
    fn patch(&self, doc: &Node, _ctx: &mut OpContext) -> Result<Option<Node>> {
        let text = doc.as_str().ok_or_else(|| {
            Error::type_error(format!("!strdiff applied to {} node", doc.kind()))
        })?;
        let mut rest = text;
        let mut out = String::with_capacity(text.len());
        for pair in self.child.elements() {
            let op = pair.elements().first().and_then(Node::as_int).ok_or_else(|| {
                Error::structural(path_hint(doc), "strdiff chunk missing op".to_string())
            })?;
            let chunk = pair.elements().get(1).and_then(Node::as_str).ok_or_else(|| {
                Error::structural(path_hint(doc), "strdiff chunk missing text".to_string())
            })?;
            match op {
                0 | -1 => {
                    let Some(remaining) = rest.strip_prefix(chunk) else {
                        return Err(Error::structural(
                            path_hint(doc),
                            format!("strdiff expected {chunk:?} at {rest:?}"),
                        ));
                    };
                    rest = remaining;
                    if op == 0 {
                        out.push_str(chunk);
                    }
                }
                1 => out.push_str(chunk),
                other => {
                    return Err(Error::structural(
                        path_hint(doc),
                        format!("strdiff op {other} is not one of -1, 0, 1"),
                    ))
                }
            }
        }
        if !rest.is_empty() {
            return Err(Error::structural(
                path_hint(doc),
                format!("strdiff left unconsumed text {rest:?}"),
            ));
        }
        let mut node = Node::from_string(out).with_tag(doc.tag.clone());
        node.comment = doc.comment.clone();
        Ok(Some(node))
    }
}
