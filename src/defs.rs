//! # Definition environment
//!
//! Schema `define` entries bind names to IR bodies. A bare `foo: X` binds
//! the IR itself; a parameterized `foo(p1,...,pn): body` binds a template
//! instantiated by substituting each parameter inside tags and string
//! leaves. `.[name]` and `.[name(args)]` leaves (and `.name` tags) are
//! definition references expanded against the environment.
//!
//! Substitution hygiene: a leaf of the form `.[...]` is a reference
//! expression and is never touched by parameter substitution.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

use crate::config;
use crate::error::{Error, Result};
use crate::eval::OpContext;
use crate::ir::{Node, Value};
use crate::tag::{parse_tag, Tag};

/// A definition binding: a plain IR value or a parameterized template.
#[derive(Debug, Clone)]
pub enum DefValue {
    Value(Node),
    Template { params: Vec<String>, body: Node },
}

/// Definition environment, sorted for deterministic iteration.
pub type DefEnv = BTreeMap<String, DefValue>;

static DEF_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_\-]*)(?:\((.*)\))?$").expect("definition name pattern")
});

/// Built-in parameterized type constructors. Always inhabitable: the empty
/// or null instance suffices.
pub const BUILTIN_CTORS: &[&str] = &["array", "sparsearray", "object", "nullable", "key"];

fn type_node(tag: &str) -> Node {
    Node::null().with_tag(tag)
}

fn op_array(tag: &str, elements: Vec<Node>) -> Node {
    Node::from_slice(elements).with_tag(tag)
}

/// The base environment every context starts from: primitive type defs.
/// The built-in parameterized constructors of [`BUILTIN_CTORS`] are
/// resolved on demand by [`expand_ref`] so that `.[array]` (the primitive)
/// and `.[array(t)]` (the constructor) coexist.
pub fn base_env() -> DefEnv {
    let mut env = DefEnv::new();
    env.insert("null".to_string(), DefValue::Value(Node::null()));
    for prim in ["bool", "int", "float", "number", "string", "array", "sparsearray", "object"] {
        env.insert(prim.to_string(), DefValue::Value(type_node(&format!("!{prim}"))));
    }
    env
}

/// The template behind a built-in constructor call.
fn ctor_template(name: &str) -> Option<(Vec<String>, Node)> {
    let params = vec!["t".to_string()];
    let all_t = type_node("!all.[t]");
    let body = match name {
        "array" | "key" => op_array("!and", vec![type_node("!array"), all_t]),
        "sparsearray" => op_array("!and", vec![type_node("!sparsearray"), all_t]),
        "object" => op_array("!and", vec![type_node("!object"), all_t]),
        "nullable" => op_array("!or", vec![Node::null(), type_node(".[t]")]),
        _ => return None,
    };
    Some((params, body))
}

/// Parses a `define` key: `foo` or `foo(p1,p2)`.
pub fn parse_def_name(key: &str) -> Result<(String, Vec<String>)> {
    let caps = DEF_NAME_RE
        .captures(key)
        .ok_or_else(|| Error::parse(format!("bad definition name {key:?}")))?;
    let name = caps[1].to_string();
    let params = match caps.get(2) {
        Some(list) if !list.as_str().is_empty() => split_call_args(list.as_str()),
        _ => Vec::new(),
    };
    for p in &params {
        if !DEF_NAME_RE.is_match(p) || p.contains('(') {
            return Err(Error::parse(format!("bad parameter {p:?} in definition {key:?}")));
        }
    }
    Ok((name, params))
}

/// Parses a reference call expression: `name` or `name(a1,...)`. Argument
/// tokens are returned raw.
pub fn parse_def_call(expr: &str) -> Result<(String, Vec<String>)> {
    let caps = DEF_NAME_RE
        .captures(expr)
        .ok_or_else(|| Error::reference(format!("bad definition reference {expr:?}")))?;
    let name = caps[1].to_string();
    let args = match caps.get(2) {
        Some(list) if !list.as_str().is_empty() => split_call_args(list.as_str()),
        _ => Vec::new(),
    };
    Ok((name, args))
}

/// Splits a comma-separated argument list at paren-balanced top level.
pub fn split_call_args(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in s.chars() {
        match c {
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Evaluates a raw argument token to an IR scalar: int, float, bool, null,
/// else string.
pub fn literal_arg(token: &str) -> Node {
    match token {
        "null" => Node::null(),
        "true" => Node::from_bool(true),
        "false" => Node::from_bool(false),
        _ => {
            if let Ok(i) = token.parse::<i64>() {
                Node::from_int(i)
            } else if let Ok(f) = token.parse::<f64>() {
                Node::from_float(f)
            } else {
                Node::from_string(token)
            }
        }
    }
}

/// The lexical form of a scalar argument, for substitution inside tags.
/// Complex arguments are forbidden there.
pub fn lexical_form(node: &Node) -> Result<String> {
    match &node.value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::String(s) => Ok(s.clone()),
        _ => Err(Error::type_error(format!(
            "complex argument of kind {} cannot appear inside a tag",
            node.kind()
        ))),
    }
}

/// Reference expression inside a string leaf: `.[name]` / `.[name(args)]`.
pub fn ref_expr(s: &str) -> Option<&str> {
    s.strip_prefix(".[").and_then(|rest| rest.strip_suffix(']'))
}

/// Reference expression carried by a tag: `.name`, `.[name]`, or
/// `.[name(args)]`.
pub fn tag_ref_expr(tag: &str) -> Option<String> {
    let content = tag.strip_prefix('.')?;
    if content.is_empty() {
        return None;
    }
    let inner = content
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(content);
    Some(inner.to_string())
}

/// Loads a schema `define` map on top of the base environment.
pub fn load_env(define: &BTreeMap<String, Node>) -> Result<DefEnv> {
    let mut env = base_env();
    for (key, body) in define {
        let (name, params) = parse_def_name(key)?;
        if config::debug().load_env {
            trace!(def = %name, params = params.len(), "load_env");
        }
        let value = if params.is_empty() {
            DefValue::Value(body.detached())
        } else {
            DefValue::Template { params, body: body.detached() }
        };
        env.insert(name, value);
    }
    Ok(env)
}

/// Instantiates a template body with argument IRs, substituting each
/// parameter inside tags and whole-value string leaves. Leaves of the form
/// `.[...]` are reference expressions and are left for env expansion.
pub fn instantiate(params: &[String], body: &Node, args: &[Node]) -> Result<Node> {
    if params.len() != args.len() {
        return Err(Error::reference(format!(
            "definition expects {} argument(s), got {}",
            params.len(),
            args.len()
        )));
    }
    let mut out = body.detached();
    subst(&mut out, params, args, false)?;
    Ok(out)
}

fn subst(node: &mut Node, params: &[String], args: &[Node], is_key: bool) -> Result<()> {
    if !node.tag.is_empty() {
        // Tags that do not fit the strict grammar are left untouched.
        if let Ok(parsed) = parse_tag(&node.tag) {
            let tree = parsed.tree.try_map(&mut |name| {
                match params.iter().position(|p| p == name) {
                    Some(i) => lexical_form(&args[i]),
                    None => Ok(name.to_string()),
                }
            })?;
            node.tag = Tag { marker: parsed.marker, tree }.to_string();
        }
    }

    let leaf_param = match &node.value {
        Value::String(s) if ref_expr(s).is_none() => {
            params.iter().position(|p| p == s.as_str())
        }
        _ => None,
    };
    if let Some(i) = leaf_param {
        let arg = &args[i];
        if is_key {
            // Object keys stay String nodes.
            node.value = Value::String(lexical_form(arg)?);
        } else {
            node.value = arg.value.clone();
            if !arg.tag.is_empty() {
                node.tag = arg.tag.clone();
            }
        }
        return Ok(());
    }

    match &mut node.value {
        Value::Array(els) => {
            for el in els {
                subst(el, params, args, false)?;
            }
        }
        Value::Object { fields, values } => {
            for f in fields.iter_mut() {
                subst(f, params, args, true)?;
            }
            for v in values.iter_mut() {
                subst(v, params, args, false)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Resolves a reference expression against the environment, instantiating
/// templates with their evaluated arguments. The caller drives the
/// `expanding` guard.
pub fn expand_ref(expr: &str, ctx: &OpContext) -> Result<Node> {
    let (base, raw_args) = parse_def_call(expr)?;
    if config::debug().expand_env {
        trace!(def = %base, args = raw_args.len(), "expand_ref");
    }
    let args: Vec<Node> = raw_args.iter().map(|t| literal_arg(t)).collect();
    match ctx.defs.get(&base) {
        // A schema-defined template shadows the built-in constructor.
        Some(DefValue::Template { params, body }) => instantiate(params, body, &args),
        Some(DefValue::Value(node)) if raw_args.is_empty() => Ok(node.detached()),
        Some(DefValue::Value(_)) => match ctor_template(&base) {
            Some((params, body)) => instantiate(&params, &body, &args),
            None => Err(Error::reference(format!("definition {base:?} takes no arguments"))),
        },
        None => match ctor_template(&base) {
            Some((params, body)) if !raw_args.is_empty() => instantiate(&params, &body, &args),
            _ => Err(Error::reference(format!("undefined definition {base:?}"))),
        },
    }
}

/// Eager env-expansion pass: rewrites every `.[name]` leaf and `.name` tag
/// in a copy of `node`. Re-entering a definition already being expanded
/// leaves the reference node untouched.
pub fn expand_env(node: &Node, ctx: &mut OpContext) -> Result<Node> {
    let mut out = node.detached();
    expand_env_mut(&mut out, ctx)?;
    Ok(out)
}

fn expand_env_mut(node: &mut Node, ctx: &mut OpContext) -> Result<()> {
    // Tag-position reference.
    if let Some(expr) = tag_ref_expr(&node.tag) {
        let (base, _) = parse_def_call(&expr)?;
        if ctx.expanding.contains(&base) {
            return Ok(());
        }
        let mut expanded = expand_ref(&expr, ctx)?;
        ctx.expanding.insert(base.clone());
        let nested = expand_env_mut(&mut expanded, ctx);
        ctx.expanding.remove(&base);
        nested?;
        node.clone_to(&expanded);
        return Ok(());
    }

    // String-leaf reference.
    let leaf_expr = node.as_str().and_then(ref_expr).map(str::to_string);
    if let Some(expr) = leaf_expr {
        let (base, _) = parse_def_call(&expr)?;
        if ctx.expanding.contains(&base) {
            return Ok(());
        }
        let mut expanded = expand_ref(&expr, ctx)?;
        ctx.expanding.insert(base.clone());
        let nested = expand_env_mut(&mut expanded, ctx);
        ctx.expanding.remove(&base);
        nested?;
        let own_tag = node.tag.clone();
        node.clone_to(&expanded);
        if node.tag.is_empty() {
            node.tag = own_tag;
        }
        return Ok(());
    }

    match &mut node.value {
        Value::Array(els) => {
            for el in els {
                expand_env_mut(el, ctx)?;
            }
        }
        Value::Object { values, .. } => {
            for v in values {
                expand_env_mut(v, ctx)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn def_names_parse_with_and_without_params() {
        assert_eq!(parse_def_name("node").expect("ok"), ("node".to_string(), vec![]));
        let (name, params) = parse_def_name("pair(a,b)").expect("ok");
        assert_eq!(name, "pair");
        assert_eq!(params, vec!["a", "b"]);
        assert!(parse_def_name("3bad").is_err());
    }

    #[test]
    fn instantiation_renames_tags_and_splices_leaves() {
        // array(t): !and [!array null, !all.[t] null]
        let body = op_array("!and", vec![type_node("!array"), type_node("!all.[t]")]);
        let out = instantiate(&["t".to_string()], &body, &[Node::from_string("int")])
            .expect("instantiate");
        assert_eq!(out.elements()[1].tag, "!all.[int]");
    }

    #[test]
    fn instantiation_replaces_whole_string_leaves() {
        let body = Node::from_map(vec![("value", Node::from_string("t"))]);
        let arg = Node::from_int(42).with_tag("!answer");
        let out = instantiate(&["t".to_string()], &body, &[arg]).expect("instantiate");
        let spliced = out.get("value").expect("field");
        assert_eq!(spliced.as_int(), Some(42));
        assert_eq!(spliced.tag, "!answer");
    }

    #[test]
    fn leaf_tag_is_kept_when_argument_is_untagged() {
        let body = Node::from_map(vec![("value", Node::from_string("t").with_tag("!keep"))]);
        let out = instantiate(&["t".to_string()], &body, &[Node::from_int(1)])
            .expect("instantiate");
        assert_eq!(out.get("value").map(|n| n.tag.as_str()), Some("!keep"));
    }

    #[test]
    fn reference_leaves_are_hygienic() {
        let body = Node::from_map(vec![("child", Node::from_string(".[t]"))]);
        let out = instantiate(&["t".to_string()], &body, &[Node::from_string("int")])
            .expect("instantiate");
        // The reference expression is not a substitution site.
        assert_eq!(out.get("child").and_then(Node::as_str), Some(".[t]"));
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let body = Node::from_string("t");
        assert!(instantiate(&["t".to_string()], &body, &[]).is_err());
    }

    #[test]
    fn literal_args_reduce_to_scalars() {
        assert_eq!(literal_arg("12").as_int(), Some(12));
        assert_eq!(literal_arg("true").as_bool(), Some(true));
        assert!(literal_arg("null").is_null());
        assert_eq!(literal_arg("int").as_str(), Some("int"));
    }

    #[test]
    fn ref_expressions_are_recognized() {
        assert_eq!(ref_expr(".[node]"), Some("node"));
        assert_eq!(ref_expr(".[array(int)]"), Some("array(int)"));
        assert_eq!(ref_expr("plain"), None);
        assert_eq!(tag_ref_expr(".node"), Some("node".to_string()));
        assert_eq!(tag_ref_expr(".[node(1)]"), Some("node(1)".to_string()));
        assert_eq!(tag_ref_expr("!op"), None);
    }
}
