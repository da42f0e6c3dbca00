//! Dependency-edge graph for satisfiability diagnostics.
//!
//! A syntactic pass derives edges between definitions, annotated with the
//! escape hatches the reference passes through (array context, nullable
//! alternative, optional field). The SAT result is authoritative; this
//! graph only localizes the failure for the error message.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::trace;

use crate::config;
use crate::defs;
use crate::ir::{Node, Value};
use crate::schema::Schema;
use crate::tag::{parse_tag, TagTree};

/// One reference from definition `from` to definition `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    /// Object field the reference sits under, if any.
    pub field: String,
    /// Reference passes through an array/collection constructor.
    pub in_array: bool,
    /// Reference sits under a nullable alternative.
    pub in_nullable: bool,
    /// Field is marked optional.
    pub optional: bool,
}

impl Edge {
    fn has_escape(&self) -> bool {
        self.in_array || self.in_nullable || self.optional
    }
}

#[derive(Clone, Copy)]
struct Flags {
    in_array: bool,
    in_nullable: bool,
    optional: bool,
}

struct Walker<'a> {
    from: &'a str,
    defined: &'a BTreeSet<String>,
    edges: Vec<Edge>,
}

/// Constructors whose arguments live inside a growable collection.
fn is_collection_ctor(name: &str) -> bool {
    matches!(name, "array" | "sparsearray" | "object" | "key" | "all")
}

impl Walker<'_> {
    fn push(&mut self, to: &str, field: &str, flags: Flags) {
        if !self.defined.contains(to) || to == "null" {
            return;
        }
        self.edges.push(Edge {
            from: self.from.to_string(),
            to: to.to_string(),
            field: field.to_string(),
            in_array: flags.in_array,
            in_nullable: flags.in_nullable,
            optional: flags.optional,
        });
    }

    fn call_refs(&mut self, expr: &str, field: &str, flags: Flags) {
        let Ok((base, args)) = defs::parse_def_call(expr) else {
            return;
        };
        self.push(&base, field, flags);
        let arg_flags = Flags {
            in_array: flags.in_array || is_collection_ctor(&base),
            in_nullable: flags.in_nullable || base == "nullable",
            optional: flags.optional,
        };
        for arg in args {
            self.call_refs(&arg, field, arg_flags);
        }
    }

    fn tag_refs(&mut self, tag: &str, field: &str, flags: Flags) {
        fn walk(
            walker: &mut Walker<'_>,
            seg: &TagTree,
            field: &str,
            flags: Flags,
            in_ref: bool,
        ) {
            let here = in_ref || seg.is_ref;
            if here {
                walker.push(&seg.name, field, flags);
            }
            let next = Flags {
                in_array: flags.in_array || is_collection_ctor(&seg.name),
                in_nullable: flags.in_nullable || seg.name == "nullable",
                optional: flags.optional,
            };
            for arg in &seg.args {
                walk(walker, arg, field, next, here);
            }
            if let Some(rest) = &seg.rest {
                walk(walker, rest, field, next, in_ref);
            }
        }
        if let Ok(parsed) = parse_tag(tag) {
            walk(self, &parsed.tree, field, flags, parsed.marker == '.');
        }
    }

    fn node(&mut self, node: &Node, field: &str, flags: Flags) {
        if !node.tag.is_empty() {
            self.tag_refs(&node.tag, field, flags);
        }
        if let Some(expr) = node.as_str().and_then(defs::ref_expr) {
            self.call_refs(expr, field, flags);
        }
        match &node.value {
            Value::Array(els) => {
                // An !or with a null-ish branch makes its alternatives
                // nullable; a plain array is a fixed tuple, not an escape.
                let nullable_here = flags.in_nullable
                    || (tag_head_is(&node.tag, "or") && els.iter().any(is_nullish));
                let child_flags = Flags { in_nullable: nullable_here, ..flags };
                for el in els {
                    self.node(el, field, child_flags);
                }
            }
            Value::Object { .. } => {
                for (key, value) in node.entries() {
                    let child_flags = Flags {
                        optional: flags.optional || key.ends_with('?'),
                        ..flags
                    };
                    self.node(value, key, child_flags);
                }
            }
            _ => {}
        }
    }
}

fn tag_head_is(tag: &str, name: &str) -> bool {
    crate::tag::tag_args(tag)
        .map(|(head, _, _)| crate::tag::bare_head(&head) == name)
        .unwrap_or(false)
}

fn is_nullish(node: &Node) -> bool {
    (node.is_null() && node.tag.is_empty())
        || node.tag == "!null"
        || node.tag == ".null"
        || node.as_str() == Some(".[null]")
}

/// Derives every definition-to-definition reference edge in the schema.
pub fn dependency_edges(schema: &Schema) -> Vec<Edge> {
    let defined: BTreeSet<String> = schema
        .define
        .keys()
        .filter_map(|key| defs::parse_def_name(key).ok().map(|(name, _)| name))
        .collect();
    let mut edges = Vec::new();
    for (key, body) in &schema.define {
        let Ok((from, _)) = defs::parse_def_name(key) else {
            continue;
        };
        let mut walker = Walker { from: &from, defined: &defined, edges: Vec::new() };
        walker.node(
            body,
            "",
            Flags { in_array: false, in_nullable: false, optional: false },
        );
        edges.extend(walker.edges);
    }
    if config::debug().nullability {
        for edge in &edges {
            trace!(
                from = %edge.from,
                to = %edge.to,
                nullable = edge.in_nullable,
                array = edge.in_array,
                optional = edge.optional,
                "dependency edge"
            );
        }
    }
    edges
}

/// Finds a cycle over escape-free edges, starting the search at `from`.
fn find_hard_cycle<'a>(edges: &'a [Edge], from: &'a str) -> Option<Vec<&'a Edge>> {
    let mut adjacency: HashMap<&str, Vec<&Edge>> = HashMap::new();
    for edge in edges.iter().filter(|e| !e.has_escape()) {
        adjacency.entry(edge.from.as_str()).or_default().push(edge);
    }
    // Deterministic traversal order.
    for list in adjacency.values_mut() {
        list.sort_by(|a, b| (&a.to, &a.field).cmp(&(&b.to, &b.field)));
    }

    fn dfs<'a>(
        node: &'a str,
        adjacency: &HashMap<&str, Vec<&'a Edge>>,
        stack: &mut Vec<&'a Edge>,
        on_stack: &mut Vec<&'a str>,
        done: &mut BTreeSet<String>,
    ) -> Option<Vec<&'a Edge>> {
        if done.contains(node) {
            return None;
        }
        on_stack.push(node);
        for edge in adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(start) = on_stack.iter().position(|n| *n == edge.to) {
                let mut cycle: Vec<&Edge> = stack[start..].to_vec();
                cycle.push(edge);
                return Some(cycle);
            }
            stack.push(edge);
            if let Some(cycle) = dfs(edge.to.as_str(), adjacency, stack, on_stack, done) {
                return Some(cycle);
            }
            stack.pop();
        }
        on_stack.pop();
        done.insert(node.to_string());
        None
    }

    let mut done = BTreeSet::new();
    dfs(from, &adjacency, &mut Vec::new(), &mut Vec::new(), &mut done)
}

/// Rotates a cycle so the lexicographically smallest definition leads.
fn normalize(cycle: Vec<&Edge>) -> Vec<&Edge> {
    let Some(smallest) = cycle.iter().enumerate().min_by_key(|(_, e)| &e.from).map(|(i, _)| i)
    else {
        return cycle;
    };
    let mut rotated = Vec::with_capacity(cycle.len());
    rotated.extend_from_slice(&cycle[smallest..]);
    rotated.extend_from_slice(&cycle[..smallest]);
    rotated
}

/// Formats the registration-time failure for a definition.
pub fn diagnose(schema: &Schema, failing: &str) -> String {
    let edges = dependency_edges(schema);
    match find_hard_cycle(&edges, failing) {
        Some(cycle) => {
            let cycle = normalize(cycle);
            let mut names: Vec<&str> = cycle.iter().map(|e| e.from.as_str()).collect();
            names.push(cycle[0].from.as_str());
            let path = names.join(" -> ");
            let edge_list: Vec<String> = cycle
                .iter()
                .map(|e| {
                    if e.field.is_empty() {
                        format!("{} -> {}", e.from, e.to)
                    } else {
                        format!("{}.{} -> {}", e.from, e.field, e.to)
                    }
                })
                .collect();
            format!(
                "impossible cycle detected: {path} (edges: {}); no escape hatches \
                 (make fields nullable, use array types, or make fields optional)",
                edge_list.join(", ")
            )
        }
        None => format!(
            "impossible cycle / contradictory constraint in definition {failing:?}"
        ),
    }
}

/// Formats the registration-time failure for the accept constraint itself.
pub fn diagnose_accept(schema: &Schema) -> String {
    format!(
        "impossible cycle / contradictory constraint in accept of schema {:?}",
        schema.signature.name
    )
}

/// Sorted dependency summary, useful for tooling output.
pub fn dependency_summary(schema: &Schema) -> BTreeMap<String, Vec<String>> {
    let mut summary: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for edge in dependency_edges(schema) {
        summary.entry(edge.from.clone()).or_default().push(edge.to.clone());
    }
    for targets in summary.values_mut() {
        targets.sort();
        targets.dedup();
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;

    fn schema_with_defs(defs: Vec<(&str, Node)>) -> Schema {
        parse_schema(&Node::from_map(vec![
            ("signature", Node::from_string("g")),
            ("define", Node::from_map(defs)),
            ("accept", Node::from_string(".[a]")),
        ]))
        .expect("schema parses")
    }

    #[test]
    fn plain_field_reference_is_a_hard_edge() {
        let schema = schema_with_defs(vec![(
            "a",
            Node::from_map(vec![("next", Node::from_string(".[b]"))]),
        ), ("b", Node::null().with_tag("!string"))]);
        let edges = dependency_edges(&schema);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].to, "b");
        assert_eq!(edges[0].field, "next");
        assert!(!edges[0].has_escape());
    }

    #[test]
    fn nullable_and_array_references_carry_escapes() {
        let schema = schema_with_defs(vec![
            (
                "a",
                Node::from_map(vec![
                    ("maybe", Node::from_string(".[nullable(b)]")),
                    ("many", Node::from_string(".[array(b)]")),
                ]),
            ),
            ("b", Node::null().with_tag("!string")),
        ]);
        let edges = dependency_edges(&schema);
        let maybe = edges.iter().find(|e| e.field == "maybe").expect("edge");
        assert!(maybe.in_nullable);
        let many = edges.iter().find(|e| e.field == "many").expect("edge");
        assert!(many.in_array);
    }

    #[test]
    fn or_with_null_branch_is_nullable() {
        let schema = schema_with_defs(vec![(
            "a",
            Node::from_map(vec![(
                "parent",
                Node::from_slice(vec![Node::null(), Node::from_string(".[a]")]).with_tag("!or"),
            )]),
        )]);
        let edges = dependency_edges(&schema);
        assert!(edges[0].in_nullable);
    }

    #[test]
    fn cycle_message_is_normalized_and_names_edges() {
        let schema = schema_with_defs(vec![
            ("c", Node::from_map(vec![("next", Node::from_string(".[a]"))])),
            ("a", Node::from_map(vec![("next", Node::from_string(".[c]"))])),
        ]);
        let message = diagnose(&schema, "c");
        assert!(message.starts_with("impossible cycle detected: a -> c -> a"), "{message}");
        assert!(message.contains("a.next -> c"), "{message}");
        assert!(message.contains("c.next -> a"), "{message}");
        assert!(message.contains("no escape hatches"), "{message}");
    }

    #[test]
    fn optional_fields_break_the_hard_cycle() {
        let schema = schema_with_defs(vec![(
            "a",
            Node::from_map(vec![("next?", Node::from_string(".[a]"))]),
        )]);
        let edges = dependency_edges(&schema);
        assert!(edges[0].optional);
        let message = diagnose(&schema, "a");
        assert!(message.contains("contradictory constraint"), "{message}");
    }
}
