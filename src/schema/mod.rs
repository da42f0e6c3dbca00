//! # Schema parsing
//!
//! A schema document is an IR object carrying:
//!
//! ```text
//! context: <string|object|array>            # optional
//! signature:
//!   name: <ident>
//!   args: [ { name: <ident>, match?: <IR> }, ... ]
//! tags:
//!   <tag-name>: { contexts: [...], schema: <ref>, description: <string> }
//! define:
//!   <def-name-or-template>: <IR>
//! accept: <IR>
//! ```
//!
//! A tag entry named after the signature is auto-injected when absent and
//! elided again on re-encode when it carries no extra fields.

pub mod registry;

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::ir::{Kind, Node, Value};

/// Context declaration reconciled into bidirectional maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextDecl {
    pub short_to_uri: BTreeMap<String, String>,
    pub uri_to_shorts: BTreeMap<String, BTreeSet<String>>,
}

impl ContextDecl {
    fn bind(&mut self, short: &str, uri: &str) -> Result<()> {
        if let Some(existing) = self.short_to_uri.get(short) {
            if existing != uri {
                return Err(Error::parse(format!(
                    "context short name {short:?} maps to both {existing:?} and {uri:?}"
                )));
            }
        }
        self.short_to_uri.insert(short.to_string(), uri.to_string());
        self.uri_to_shorts
            .entry(uri.to_string())
            .or_default()
            .insert(short.to_string());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.short_to_uri.is_empty()
    }
}

/// One signature argument, with an optional match constraint.
#[derive(Debug, Clone)]
pub struct SigArg {
    pub name: String,
    pub match_pattern: Option<Node>,
}

/// Schema signature: the schema's name plus its argument declarations.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    pub name: String,
    pub args: Vec<SigArg>,
}

/// One `tags` entry.
#[derive(Debug, Clone, Default)]
pub struct TagDef {
    pub contexts: Vec<String>,
    pub schema: Option<String>,
    pub description: Option<String>,
}

impl TagDef {
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty() && self.schema.is_none() && self.description.is_none()
    }
}

/// A parsed schema. Read-only after registration.
#[derive(Debug, Clone)]
pub struct Schema {
    pub context: ContextDecl,
    pub signature: Signature,
    pub tags: BTreeMap<String, TagDef>,
    pub define: BTreeMap<String, Node>,
    pub accept: Option<Node>,
}

fn parse_context(decl: &mut ContextDecl, node: &Node) -> Result<()> {
    match &node.value {
        Value::String(uri) => decl.bind("", uri),
        Value::Object { .. } => {
            for (short, uri_node) in node.entries() {
                let uri = uri_node.as_str().ok_or_else(|| {
                    Error::parse(format!("context entry {short:?} must map to a URI string"))
                })?;
                decl.bind(short, uri)?;
            }
            Ok(())
        }
        Value::Array(entries) => {
            for entry in entries {
                parse_context(decl, entry)?;
            }
            Ok(())
        }
        _ => Err(Error::parse(format!(
            "context must be a string, object, or array, not {}",
            node.kind()
        ))),
    }
}

fn parse_signature(node: &Node) -> Result<Signature> {
    match &node.value {
        Value::String(name) => Ok(Signature { name: name.clone(), args: Vec::new() }),
        Value::Object { .. } => {
            let name = node
                .get("name")
                .and_then(Node::as_str)
                .ok_or_else(|| Error::parse("signature must carry a name".to_string()))?
                .to_string();
            let mut args = Vec::new();
            if let Some(list) = node.get("args") {
                for entry in list.elements() {
                    match &entry.value {
                        Value::String(arg_name) => {
                            args.push(SigArg { name: arg_name.clone(), match_pattern: None });
                        }
                        Value::Object { .. } => {
                            let arg_name = entry
                                .get("name")
                                .and_then(Node::as_str)
                                .ok_or_else(|| {
                                    Error::parse("signature arg must carry a name".to_string())
                                })?
                                .to_string();
                            args.push(SigArg {
                                name: arg_name,
                                match_pattern: entry.get("match").map(Node::detached),
                            });
                        }
                        _ => {
                            return Err(Error::parse(format!(
                                "signature arg must be a string or object, not {}",
                                entry.kind()
                            )))
                        }
                    }
                }
            }
            Ok(Signature { name, args })
        }
        _ => Err(Error::parse(format!(
            "signature must be a string or object, not {}",
            node.kind()
        ))),
    }
}

fn parse_tag_def(node: &Node) -> Result<TagDef> {
    match &node.value {
        Value::Null => Ok(TagDef::default()),
        Value::String(description) => Ok(TagDef {
            description: Some(description.clone()),
            ..TagDef::default()
        }),
        Value::Object { .. } => {
            let mut def = TagDef::default();
            if let Some(contexts) = node.get("contexts") {
                for ctx in contexts.elements() {
                    let uri = ctx.as_str().ok_or_else(|| {
                        Error::parse("tag contexts must be URI strings".to_string())
                    })?;
                    def.contexts.push(uri.to_string());
                }
            }
            def.schema = node.get("schema").and_then(Node::as_str).map(str::to_string);
            def.description = node.get("description").and_then(Node::as_str).map(str::to_string);
            Ok(def)
        }
        _ => Err(Error::parse(format!(
            "tag entry must be null, a string, or an object, not {}",
            node.kind()
        ))),
    }
}

/// Parses a schema IR into its parts and auto-injects the signature tag.
pub fn parse_schema(ir: &Node) -> Result<Schema> {
    if ir.kind() != Kind::Object {
        return Err(Error::parse(format!("schema must be an object, not {}", ir.kind())));
    }

    let mut context = ContextDecl::default();
    for key in ["@context", "context", "contexts"] {
        if let Some(node) = ir.get(key) {
            parse_context(&mut context, node)?;
        }
    }

    let signature = match ir.get("signature") {
        Some(node) => parse_signature(node)?,
        None => return Err(Error::parse("schema must carry a signature".to_string())),
    };

    let mut tags = BTreeMap::new();
    if let Some(tags_node) = ir.get("tags") {
        for (name, def_node) in tags_node.entries() {
            tags.insert(name.to_string(), parse_tag_def(def_node)?);
        }
    }
    tags.entry(signature.name.clone()).or_default();

    let mut define = BTreeMap::new();
    if let Some(define_node) = ir.get("define") {
        if define_node.kind() != Kind::Object {
            return Err(Error::parse(format!(
                "define must be an object, not {}",
                define_node.kind()
            )));
        }
        for (key, body) in define_node.entries() {
            define.insert(key.to_string(), body.detached());
        }
    }

    Ok(Schema {
        context,
        signature,
        tags,
        define,
        accept: ir.get("accept").map(Node::detached),
    })
}

impl Schema {
    /// Re-encodes the schema to IR, eliding the auto-injected signature tag
    /// when it carries no extra fields.
    pub fn encode(&self) -> Node {
        let mut pairs: Vec<(String, Node)> = Vec::new();

        if !self.context.is_empty() {
            pairs.push((
                "context".to_string(),
                Node::from_map(
                    self.context
                        .short_to_uri
                        .iter()
                        .map(|(short, uri)| (short.clone(), Node::from_string(uri.clone())))
                        .collect(),
                ),
            ));
        }

        let signature = if self.signature.args.is_empty() {
            Node::from_string(self.signature.name.clone())
        } else {
            Node::from_map(vec![
                ("name".to_string(), Node::from_string(self.signature.name.clone())),
                (
                    "args".to_string(),
                    Node::from_slice(
                        self.signature
                            .args
                            .iter()
                            .map(|arg| match &arg.match_pattern {
                                None => Node::from_string(arg.name.clone()),
                                Some(pattern) => Node::from_map(vec![
                                    ("name".to_string(), Node::from_string(arg.name.clone())),
                                    ("match".to_string(), pattern.detached()),
                                ]),
                            })
                            .collect(),
                    ),
                ),
            ])
        };
        pairs.push(("signature".to_string(), signature));

        let mut tag_pairs: Vec<(String, Node)> = Vec::new();
        for (name, def) in &self.tags {
            if *name == self.signature.name && def.is_empty() {
                continue;
            }
            let mut entry: Vec<(String, Node)> = Vec::new();
            if !def.contexts.is_empty() {
                entry.push((
                    "contexts".to_string(),
                    Node::from_slice(
                        def.contexts.iter().map(|c| Node::from_string(c.clone())).collect(),
                    ),
                ));
            }
            if let Some(schema) = &def.schema {
                entry.push(("schema".to_string(), Node::from_string(schema.clone())));
            }
            if let Some(description) = &def.description {
                entry.push(("description".to_string(), Node::from_string(description.clone())));
            }
            tag_pairs.push((name.clone(), Node::from_map(entry)));
        }
        if !tag_pairs.is_empty() {
            pairs.push(("tags".to_string(), Node::from_map(tag_pairs)));
        }

        if !self.define.is_empty() {
            pairs.push((
                "define".to_string(),
                Node::from_map(
                    self.define.iter().map(|(k, v)| (k.clone(), v.detached())).collect(),
                ),
            ));
        }

        if let Some(accept) = &self.accept {
            pairs.push(("accept".to_string(), accept.detached()));
        }

        Node::from_map(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_ir() -> Node {
        Node::from_map(vec![
            ("context", Node::from_map(vec![("t", Node::from_string("https://example.com/tony"))])),
            ("signature", Node::from_string("sample")),
            (
                "define",
                Node::from_map(vec![("leaf", Node::null().with_tag("!string"))]),
            ),
            ("accept", Node::from_string(".[leaf]")),
        ])
    }

    #[test]
    fn parses_the_standard_layout() {
        let schema = parse_schema(&schema_ir()).expect("parse");
        assert_eq!(schema.signature.name, "sample");
        assert_eq!(schema.context.short_to_uri.get("t").map(String::as_str),
                   Some("https://example.com/tony"));
        assert!(schema.define.contains_key("leaf"));
        assert!(schema.accept.is_some());
        // Signature tag auto-injected.
        assert!(schema.tags.contains_key("sample"));
    }

    #[test]
    fn conflicting_context_shorts_are_rejected() {
        let ir = Node::from_map(vec![
            (
                "context",
                Node::from_slice(vec![
                    Node::from_map(vec![("t", Node::from_string("https://a"))]),
                    Node::from_map(vec![("t", Node::from_string("https://b"))]),
                ]),
            ),
            ("signature", Node::from_string("sample")),
        ]);
        assert!(parse_schema(&ir).is_err());
    }

    #[test]
    fn encode_elides_the_injected_signature_tag() {
        let schema = parse_schema(&schema_ir()).expect("parse");
        let encoded = schema.encode();
        assert!(encoded.get("tags").is_none());
        assert_eq!(encoded.get("signature").and_then(Node::as_str), Some("sample"));

        let reparsed = parse_schema(&encoded).expect("reparse");
        assert_eq!(reparsed.signature.name, "sample");
        assert_eq!(reparsed.define.len(), 1);
    }

    #[test]
    fn signature_args_parse_with_match_constraints() {
        let ir = Node::from_map(vec![(
            "signature",
            Node::from_map(vec![
                ("name", Node::from_string("param")),
                (
                    "args",
                    Node::from_slice(vec![
                        Node::from_string("plain"),
                        Node::from_map(vec![
                            ("name", Node::from_string("checked")),
                            ("match", Node::null().with_tag("!string")),
                        ]),
                    ]),
                ),
            ]),
        )]);
        let schema = parse_schema(&ir).expect("parse");
        assert_eq!(schema.signature.args.len(), 2);
        assert!(schema.signature.args[0].match_pattern.is_none());
        assert!(schema.signature.args[1].match_pattern.is_some());
    }
}
