//! Property-based tests (proptest) for the quantified invariants: clone
//! equality, tag round-trip, diff/apply round-trip, idempotent matching,
//! and sampled satisfiability soundness.

use std::collections::BTreeSet;

use proptest::prelude::*;

use tony::{
    check_schema, diff, match_nodes, parse_schema, parse_tag, patch_nodes, validate, Kind, Node,
    OpContext, Value,
};

fn leaf_strategy() -> impl Strategy<Value = Node> {
    prop_oneof![
        Just(Node::null()),
        any::<bool>().prop_map(Node::from_bool),
        (-1000i64..1000).prop_map(Node::from_int),
        "[a-z]{0,8}".prop_map(Node::from_string),
    ]
}

fn tag_strategy() -> impl Strategy<Value = String> + Clone {
    prop_oneof![
        Just(String::new()),
        Just("!v1".to_string()),
        Just("!v2".to_string()),
    ]
}

fn node_strategy() -> impl Strategy<Value = Node> {
    leaf_strategy().prop_recursive(3, 32, 4, |inner| {
        let tagged = (inner.clone(), tag_strategy())
            .prop_map(|(node, tag)| if tag.is_empty() { node } else { node.with_tag(tag) });
        prop_oneof![
            prop::collection::vec(tagged.clone(), 0..4).prop_map(Node::from_slice),
            prop::collection::vec(("[a-z]{1,5}", tagged), 0..4).prop_map(|pairs| {
                let mut seen = BTreeSet::new();
                Node::from_map(
                    pairs
                        .into_iter()
                        .filter(|(key, _)| seen.insert(key.clone()))
                        .collect(),
                )
            }),
        ]
    })
}

fn untagged(doc: &Node) -> Node {
    let mut out = doc.detached();
    let _ = out.walk_mut(&mut |n| {
        n.tag.clear();
        Ok(())
    });
    out
}

proptest! {
    #[test]
    fn clone_is_equal_and_mutation_does_not_leak(node in node_strategy()) {
        let copy = node.detached();
        prop_assert_eq!(&copy, &node);

        // Mutating the clone leaves the original untouched.
        let mut mutated = copy.detached();
        mutated.tag = "!mutated".to_string();
        prop_assert_eq!(&copy, &node);
        prop_assert_ne!(&mutated, &node);
    }

    #[test]
    fn diff_apply_round_trips(a in node_strategy(), b in node_strategy()) {
        let mut ctx = OpContext::new();
        match diff(&a, &b, &mut ctx).expect("diff computes") {
            Some(patch) => {
                let applied = patch_nodes(&a, &patch, &mut ctx).expect("patch applies");
                prop_assert!(
                    applied.structural_eq(&b, tony::EqOptions { comments: false, tags: true }),
                    "patch {patch} over {a} gave {applied}, wanted {b}"
                );
            }
            None => {
                let eq_opts = tony::EqOptions { comments: false, tags: true };
                prop_assert!(a.structural_eq(&b, eq_opts));
            }
        }
    }

    #[test]
    fn nil_diff_means_equal(a in node_strategy()) {
        let mut ctx = OpContext::new();
        prop_assert!(diff(&a, &a.detached(), &mut ctx).expect("diff computes").is_none());
    }

    #[test]
    fn matching_is_deterministic(doc in node_strategy(), pattern in node_strategy()) {
        let mut ctx = OpContext::new();
        let first = match_nodes(&doc, &pattern, &mut ctx);
        let second = match_nodes(&doc, &pattern, &mut ctx);
        match (first, second) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
            (Err(_), Err(_)) => {}
            other => prop_assert!(false, "divergent outcomes: {other:?}"),
        }
    }

    #[test]
    fn every_doc_matches_itself(doc in node_strategy()) {
        // Tags in pattern position dispatch as operators, so self-matching
        // is stated over untagged documents.
        let doc = untagged(&doc);
        let mut ctx = OpContext::new();
        ctx.tags_strict = true;
        prop_assert!(match_nodes(&doc, &doc.detached(), &mut ctx).expect("match evaluates"));
    }
}

/// A schema accepting exactly the shape of `doc`: scalars project to their
/// type tags, containers recurse.
fn shape_of(doc: &Node) -> Node {
    match &doc.value {
        Value::Null => Node::null(),
        Value::Bool(_) => Node::null().with_tag("!bool"),
        Value::Int(_) | Value::Float(_) => Node::null().with_tag("!number"),
        Value::String(_) => Node::null().with_tag("!string"),
        Value::Array(els) => Node::from_slice(els.iter().map(shape_of).collect()),
        Value::Object { .. } => {
            Node::from_map(doc.entries().map(|(k, v)| (k.to_string(), shape_of(v))).collect())
        }
        Value::Comment { .. } => Node::null(),
    }
}

proptest! {
    /// Sampled soundness: a schema whose accept is the shape of an
    /// existing document must pass the satisfiability gate, and the
    /// document must validate against it.
    #[test]
    fn inhabited_shapes_are_satisfiable(doc in node_strategy()) {
        let doc = untagged(&doc);
        prop_assume!(doc.kind() != Kind::Comment);
        let ir = Node::from_map(vec![
            ("signature", Node::from_string("shape")),
            ("accept", shape_of(&doc)),
        ]);
        let schema = parse_schema(&ir).expect("schema parses");
        check_schema(&schema).expect("an inhabited shape is satisfiable");
        prop_assert!(validate(&doc, &schema, None).expect("validates"));
    }
}

proptest! {
    #[test]
    fn tags_round_trip_through_the_parser(
        head in "[a-z][a-z0-9_]{0,5}",
        arg in prop::option::of("[a-z][a-z0-9_]{0,5}"),
        rest in prop::option::of("[a-z][a-z0-9_]{0,5}"),
    ) {
        let mut text = format!("!{head}");
        if let Some(arg) = &arg {
            text.push_str(&format!("({arg})"));
        }
        if let Some(rest) = &rest {
            text.push_str(&format!(".{rest}"));
        }
        let parsed = parse_tag(&text).expect("grammatical tag parses");
        prop_assert_eq!(parsed.to_string(), text);
    }
}
