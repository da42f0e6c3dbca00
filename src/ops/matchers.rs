//! Built-in match operators, plus the operators available in both contexts
//! (`all`, `field`, `key`, `if`, `bracket`).

use crate::defs::{self, DefValue};
use crate::error::{Error, Result};
use crate::eval::{match_nodes, patch_absent, patch_inner, OpContext};
use crate::ir::path::get_path;
use crate::ir::{Kind, Node, Value};
use crate::ops::{expect_args, Op, OpKind, Symbol};

pub(crate) fn symbols() -> Vec<Symbol> {
    let mut table = vec![
        Symbol { name: "or", kind: OpKind::Match, instance: or_instance },
        Symbol { name: "and", kind: OpKind::Match, instance: and_instance },
        Symbol { name: "not", kind: OpKind::Match, instance: not_instance },
        Symbol { name: "all", kind: OpKind::Both, instance: all_instance },
        Symbol { name: "irtype", kind: OpKind::Match, instance: irtype_instance },
        Symbol { name: "glob", kind: OpKind::Match, instance: glob_instance },
        Symbol { name: "has-path", kind: OpKind::Match, instance: has_path_instance },
        Symbol { name: "field", kind: OpKind::Both, instance: field_instance },
        Symbol { name: "tag", kind: OpKind::Match, instance: tag_instance },
        Symbol { name: "key", kind: OpKind::Both, instance: key_instance },
        Symbol { name: "subtree", kind: OpKind::Match, instance: subtree_instance },
        Symbol { name: "let", kind: OpKind::Match, instance: let_instance },
        Symbol { name: "if", kind: OpKind::Both, instance: if_instance },
        Symbol { name: "bracket", kind: OpKind::Both, instance: bracket_instance },
        Symbol { name: "schema", kind: OpKind::Match, instance: schema_instance },
        Symbol { name: "from", kind: OpKind::Match, instance: from_instance },
    ];
    // Built-in type tags share one implementation.
    for (name, pred) in [
        ("null", TypePred::Null),
        ("bool", TypePred::Bool),
        ("number", TypePred::Number),
        ("int", TypePred::Int),
        ("float", TypePred::Float),
        ("string", TypePred::String),
        ("array", TypePred::Array),
        ("sparsearray", TypePred::SparseArray),
        ("object", TypePred::Object),
    ] {
        table.push(Symbol { name, kind: OpKind::Match, instance: type_instance_for(pred) });
    }
    table
}

// ---------------------------------------------------------------------------
// Boolean combinators
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct OrOp {
    child: Node,
}

fn or_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("or", &args, 0)?;
    Ok(Box::new(OrOp { child }))
}

impl Op for OrOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        match &self.child.value {
            Value::Array(branches) => {
                for branch in branches {
                    if match_nodes(doc, branch, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Object { .. } => {
                // Any field key present in both sides with a matching value.
                for (key, branch) in self.child.entries() {
                    if let Some(doc_value) = doc.get(key) {
                        if match_nodes(doc_value, branch, ctx)? {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
            _ => {
                if doc.kind() == Kind::Null {
                    Ok(false)
                } else {
                    match_nodes(doc, &self.child, ctx)
                }
            }
        }
    }
}

#[derive(Debug)]
struct AndOp {
    child: Node,
}

fn and_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("and", &args, 0)?;
    Ok(Box::new(AndOp { child }))
}

impl Op for AndOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        match &self.child.value {
            Value::Array(branches) => {
                for branch in branches {
                    if !match_nodes(doc, branch, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            _ => match_nodes(doc, &self.child, ctx),
        }
    }
}

#[derive(Debug)]
struct NotOp {
    child: Node,
}

fn not_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("not", &args, 0)?;
    Ok(Box::new(NotOp { child }))
}

impl Op for NotOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        Ok(!match_nodes(doc, &self.child, ctx)?)
    }
}

#[derive(Debug)]
struct BracketOp {
    child: Node,
}

fn bracket_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("bracket", &args, 0)?;
    Ok(Box::new(BracketOp { child }))
}

impl Op for BracketOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        match_nodes(doc, &self.child, ctx)
    }

    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        patch_inner(doc, &self.child, ctx)
    }
}

// ---------------------------------------------------------------------------
// Collection traversal
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AllOp {
    child: Node,
}

fn all_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("all", &args, 0)?;
    Ok(Box::new(AllOp { child }))
}

impl Op for AllOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        match &doc.value {
            Value::Array(els) => ctx.descend(|ctx| {
                for el in els {
                    if !match_nodes(el, &self.child, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }),
            Value::Object { values, .. } => ctx.descend(|ctx| {
                for v in values {
                    if !match_nodes(v, &self.child, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }),
            _ => match_nodes(doc, &self.child, ctx),
        }
    }

    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        match &doc.value {
            Value::Array(els) => ctx.descend(|ctx| {
                let mut out = Vec::with_capacity(els.len());
                for el in els {
                    if let Some(patched) = patch_inner(el, &self.child, ctx)? {
                        out.push(patched);
                    }
                }
                let mut node = Node::from_slice(out);
                node.tag = doc.tag.clone();
                node.comment = doc.comment.clone();
                Ok(Some(node))
            }),
            Value::Object { fields, values } => ctx.descend(|ctx| {
                let mut pairs = Vec::with_capacity(fields.len());
                for (k, v) in fields.iter().zip(values.iter()) {
                    if let Some(patched) = patch_inner(v, &self.child, ctx)? {
                        pairs.push((k.clone(), patched));
                    }
                }
                let mut node = Node::from_keyvals(pairs);
                node.tag = doc.tag.clone();
                node.comment = doc.comment.clone();
                Ok(Some(node))
            }),
            _ => patch_inner(doc, &self.child, ctx),
        }
    }
}

#[derive(Debug)]
struct SubtreeOp {
    child: Node,
}

fn subtree_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("subtree", &args, 0)?;
    Ok(Box::new(SubtreeOp { child }))
}

impl Op for SubtreeOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        let mut found = false;
        ctx.descend(|ctx| {
            doc.visit(&mut |node, is_post| {
                if is_post || found {
                    return Ok(true);
                }
                if match_nodes(node, &self.child, ctx)? {
                    found = true;
                    return Ok(false);
                }
                Ok(true)
            })
        })?;
        Ok(found)
    }
}

// ---------------------------------------------------------------------------
// Type and tag inspection
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct IrTypeOp {
    child: Node,
}

fn irtype_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("irtype", &args, 0)?;
    Ok(Box::new(IrTypeOp { child }))
}

impl Op for IrTypeOp {
    fn matches(&self, doc: &Node, _ctx: &mut OpContext) -> Result<bool> {
        Ok(doc.kind() == self.child.kind())
    }
}

#[derive(Debug, Clone, Copy)]
enum TypePred {
    Null,
    Bool,
    Number,
    Int,
    Float,
    String,
    Array,
    SparseArray,
    Object,
}

#[derive(Debug)]
struct TypeOp {
    pred: TypePred,
}

fn type_instance_for(pred: TypePred) -> fn(Node, Vec<String>) -> Result<Box<dyn Op>> {
    match pred {
        TypePred::Null => |_, _| Ok(Box::new(TypeOp { pred: TypePred::Null })),
        TypePred::Bool => |_, _| Ok(Box::new(TypeOp { pred: TypePred::Bool })),
        TypePred::Number => |_, _| Ok(Box::new(TypeOp { pred: TypePred::Number })),
        TypePred::Int => |_, _| Ok(Box::new(TypeOp { pred: TypePred::Int })),
        TypePred::Float => |_, _| Ok(Box::new(TypeOp { pred: TypePred::Float })),
        TypePred::String => |_, _| Ok(Box::new(TypeOp { pred: TypePred::String })),
        TypePred::Array => |_, _| Ok(Box::new(TypeOp { pred: TypePred::Array })),
        TypePred::SparseArray => |_, _| Ok(Box::new(TypeOp { pred: TypePred::SparseArray })),
        TypePred::Object => |_, _| Ok(Box::new(TypeOp { pred: TypePred::Object })),
    }
}

fn numeric_keys(node: &Node) -> bool {
    node.entries().all(|(k, _)| k.parse::<u64>().is_ok())
}

impl Op for TypeOp {
    fn matches(&self, doc: &Node, _ctx: &mut OpContext) -> Result<bool> {
        Ok(match self.pred {
            TypePred::Null => doc.kind() == Kind::Null,
            TypePred::Bool => doc.kind() == Kind::Bool,
            TypePred::Number => doc.kind() == Kind::Number,
            TypePred::Int => matches!(doc.value, Value::Int(_)),
            TypePred::Float => matches!(doc.value, Value::Float(_)),
            TypePred::String => doc.kind() == Kind::String,
            TypePred::Array => doc.kind() == Kind::Array,
            TypePred::SparseArray => {
                doc.kind() == Kind::Array || (doc.kind() == Kind::Object && numeric_keys(doc))
            }
            TypePred::Object => doc.kind() == Kind::Object,
        })
    }
}

#[derive(Debug)]
struct TagMatchOp {
    child: Node,
}

fn tag_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("tag", &args, 0)?;
    Ok(Box::new(TagMatchOp { child }))
}

impl Op for TagMatchOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        let lifted = if doc.tag.is_empty() {
            Node::null()
        } else {
            let (head, tag_arguments, _rest) = crate::tag::tag_args(&doc.tag)?;
            let name = crate::tag::bare_head(&head);
            if tag_arguments.is_empty() {
                // Bare form: the whole chain without its marker.
                Node::from_string(&doc.tag[1..])
            } else {
                Node::from_map(vec![
                    ("name", Node::from_string(name)),
                    (
                        "args",
                        Node::from_slice(
                            tag_arguments.into_iter().map(Node::from_string).collect(),
                        ),
                    ),
                ])
            }
        };
        match_nodes(&lifted, &self.child, ctx)
    }
}

// ---------------------------------------------------------------------------
// String and path predicates
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct GlobOp {
    pattern: glob::Pattern,
}

fn glob_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("glob", &args, 0)?;
    let text = child
        .as_str()
        .ok_or_else(|| Error::instantiation("glob", "child must be a string pattern"))?;
    let pattern = glob::Pattern::new(text)
        .map_err(|e| Error::instantiation("glob", format!("bad pattern {text:?}: {e}")))?;
    Ok(Box::new(GlobOp { pattern }))
}

impl Op for GlobOp {
    fn matches(&self, doc: &Node, _ctx: &mut OpContext) -> Result<bool> {
        let text = doc.as_str().ok_or_else(|| {
            Error::type_error(format!("!glob applied to {} node", doc.kind()))
        })?;
        Ok(self.pattern.matches(text))
    }
}

#[derive(Debug)]
struct HasPathOp {
    path: String,
}

fn has_path_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("has-path", &args, 0)?;
    let path = child
        .as_str()
        .ok_or_else(|| Error::instantiation("has-path", "child must be a path string"))?;
    Ok(Box::new(HasPathOp { path: path.to_string() }))
}

impl Op for HasPathOp {
    fn matches(&self, doc: &Node, _ctx: &mut OpContext) -> Result<bool> {
        match get_path(doc, &self.path) {
            Ok(found) => Ok(found.is_some()),
            // A path that cannot apply to this shape does not resolve.
            Err(Error::Type { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Field access
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct FieldOp {
    child: Node,
    rename: Option<(String, String)>,
}

fn field_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    let rename = match args.len() {
        0 => None,
        2 => Some((args[0].clone(), args[1].clone())),
        n => {
            return Err(Error::instantiation(
                "field",
                format!("expected 0 or 2 arguments, got {n}"),
            ))
        }
    };
    Ok(Box::new(FieldOp { child, rename }))
}

impl Op for FieldOp {
    fn matches(&self, doc: &Node, _ctx: &mut OpContext) -> Result<bool> {
        let expected = self.child.as_str().ok_or_else(|| {
            Error::type_error("!field match child must be a field-name string")
        })?;
        Ok(doc.parent_field.as_deref() == Some(expected))
    }

    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        let Some((from, to)) = &self.rename else {
            return Err(Error::instantiation("field", "patch form requires (from,to) arguments"));
        };
        let mut out = doc.detached();
        out.rename_field(from, to)?;
        if self.child.is_null() && self.child.tag.is_empty() {
            return Ok(Some(out));
        }
        patch_inner(&out, &self.child, ctx)
    }
}

// ---------------------------------------------------------------------------
// Keyed lists
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct KeyOp {
    path: String,
    child: Node,
}

fn key_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("key", &args, 1)?;
    if child.kind() != Kind::Array {
        return Err(Error::instantiation("key", "child must be an array of keyed elements"));
    }
    Ok(Box::new(KeyOp { path: args[0].clone(), child }))
}

impl KeyOp {
    fn element_key(&self, element: &Node) -> Result<String> {
        match get_path(element, &self.path)? {
            Some(node) => Ok(node.key_string()),
            None => Err(Error::structural(
                self.path.clone(),
                format!("keyed element {element} has no key at {:?}", self.path),
            )),
        }
    }
}

impl Op for KeyOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        if doc.kind() != Kind::Array {
            return Err(Error::type_error(format!("!key applied to {} node", doc.kind())));
        }
        ctx.descend(|ctx| {
            for pattern in self.child.elements() {
                let want = self.element_key(pattern)?;
                let mut matched = false;
                for el in doc.elements() {
                    if self.element_key(el)? == want {
                        matched = match_nodes(el, pattern, ctx)?;
                        break;
                    }
                }
                if !matched {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }

    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        if doc.kind() != Kind::Array {
            return Err(Error::type_error(format!("!key applied to {} node", doc.kind())));
        }
        ctx.descend(|ctx| {
            let mut used = vec![false; self.child.elements().len()];
            let mut out = Vec::with_capacity(doc.elements().len());
            for el in doc.elements() {
                let key = self.element_key(el)?;
                let mut slot = None;
                for (i, candidate) in self.child.elements().iter().enumerate() {
                    if !used[i] && self.element_key(candidate)? == key {
                        slot = Some(i);
                        break;
                    }
                }
                match slot {
                    Some(i) => {
                        used[i] = true;
                        let entry = &self.child.elements()[i];
                        if is_delete_entry(entry) {
                            continue;
                        }
                        if let Some(patched) = patch_inner(el, entry, ctx)? {
                            out.push(patched);
                        }
                    }
                    None => out.push(el.detached()),
                }
            }
            // Unmatched patch keys append in sorted key order.
            let mut pending: Vec<(String, &Node)> = Vec::new();
            for (i, candidate) in self.child.elements().iter().enumerate() {
                if !used[i] && !is_delete_entry(candidate) {
                    pending.push((self.element_key(candidate)?, candidate));
                }
            }
            pending.sort_by(|a, b| a.0.cmp(&b.0));
            for (_, candidate) in pending {
                out.push(new_keyed_element(candidate, ctx)?);
            }
            let mut node = Node::from_slice(out);
            node.tag = doc.tag.clone();
            node.comment = doc.comment.clone();
            Ok(Some(node))
        })
    }
}

fn is_delete_entry(node: &Node) -> bool {
    node.tag == "!delete" || node.tag.starts_with("!delete.")
}

fn new_keyed_element(node: &Node, ctx: &mut OpContext) -> Result<Node> {
    // A freshly appended element may itself be an `!insert`-tagged payload.
    if node.tag == "!insert" || node.tag.starts_with("!insert.") {
        return patch_absent(node, ctx)?.ok_or_else(|| {
            Error::structural("", "!insert produced no element".to_string())
        });
    }
    Ok(node.detached())
}

// ---------------------------------------------------------------------------
// Bindings and conditionals
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LetOp {
    bindings: Vec<(String, Node)>,
    body: Node,
}

fn let_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("let", &args, 0)?;
    let lets = child
        .get("let")
        .ok_or_else(|| Error::instantiation("let", "child must carry a `let` list"))?;
    let body = child
        .get("in")
        .ok_or_else(|| Error::instantiation("let", "child must carry an `in` body"))?
        .detached();
    let mut bindings = Vec::new();
    for entry in lets.elements() {
        let mut pairs = entry.entries();
        let Some((name, value)) = pairs.next() else {
            return Err(Error::instantiation("let", "binding must be a single-field object"));
        };
        if pairs.next().is_some() {
            return Err(Error::instantiation("let", "binding must be a single-field object"));
        }
        bindings.push((name.to_string(), value.detached()));
    }
    Ok(Box::new(LetOp { bindings, body }))
}

impl Op for LetOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        let mut scoped = ctx.fork();
        for (name, value) in &self.bindings {
            scoped.defs.insert(name.clone(), DefValue::Value(value.clone()));
        }
        let expanded = defs::expand_env(&self.body, &mut scoped)?;
        match_nodes(doc, &expanded, &mut scoped)
    }
}

#[derive(Debug)]
pub(crate) struct IfOp {
    cond: Node,
    then_branch: Option<Node>,
    else_branch: Option<Node>,
}

fn if_instance(child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("if", &args, 0)?;
    let cond = child
        .get("if")
        .ok_or_else(|| Error::instantiation("if", "child must carry an `if` condition"))?
        .detached();
    Ok(Box::new(IfOp {
        cond,
        then_branch: child.get("then").map(Node::detached),
        else_branch: child.get("else").map(Node::detached),
    }))
}

impl Op for IfOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        let branch = if match_nodes(doc, &self.cond, ctx)? {
            &self.then_branch
        } else {
            &self.else_branch
        };
        match branch {
            Some(pattern) => match_nodes(doc, pattern, ctx),
            None => Ok(true),
        }
    }

    fn patch(&self, doc: &Node, ctx: &mut OpContext) -> Result<Option<Node>> {
        let branch = if match_nodes(doc, &self.cond, ctx)? {
            &self.then_branch
        } else {
            &self.else_branch
        };
        match branch {
            Some(patch) => patch_inner(doc, patch, ctx),
            None => Ok(Some(doc.detached())),
        }
    }
}

// ---------------------------------------------------------------------------
// Cross-schema references
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SchemaRefOp {
    name: String,
}

fn schema_instance(_child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("schema", &args, 1)?;
    Ok(Box::new(SchemaRefOp { name: args[0].clone() }))
}

impl Op for SchemaRefOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        let registry = ctx.registry.clone().ok_or_else(|| {
            Error::reference("!schema used without a schema registry".to_string())
        })?;
        let schema = registry.resolve_schema(&self.name).ok_or_else(|| {
            Error::reference(format!("unknown schema {:?}", self.name))
        })?;
        let mut scoped = OpContext::for_schema(&schema, Some(registry))?;
        match schema.accept.as_ref() {
            Some(accept) => match_nodes(doc, accept, &mut scoped),
            None => Ok(true),
        }
    }
}

#[derive(Debug)]
struct FromOp {
    schema: String,
    def: String,
}

fn from_instance(_child: Node, args: Vec<String>) -> Result<Box<dyn Op>> {
    expect_args("from", &args, 2)?;
    Ok(Box::new(FromOp { schema: args[0].clone(), def: args[1].clone() }))
}

impl Op for FromOp {
    fn matches(&self, doc: &Node, ctx: &mut OpContext) -> Result<bool> {
        let registry = ctx.registry.clone().ok_or_else(|| {
            Error::reference("!from used without a schema registry".to_string())
        })?;
        let schema = registry.resolve_schema(&self.schema).ok_or_else(|| {
            Error::reference(format!("unknown schema {:?}", self.schema))
        })?;
        let mut scoped = OpContext::for_schema(&schema, Some(registry))?;
        let expanded = defs::expand_ref(&self.def, &scoped)?;
        scoped.expanding.insert(self.def.clone());
        let result = match_nodes(doc, &expanded, &mut scoped);
        scoped.expanding.remove(&self.def);
        result
    }
}
