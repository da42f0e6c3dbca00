//! Operator-level match and patch behavior through the public driver.

use tony::{match_nodes, patch_nodes, Error, Node, OpContext};

/// Honors RUST_LOG so the O_DEBUG_* traces are visible under --nocapture.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn obj(pairs: Vec<(&str, Node)>) -> Node {
    Node::from_map(pairs)
}

fn arr(elements: Vec<Node>) -> Node {
    Node::from_slice(elements)
}

fn matches(doc: &Node, pattern: &Node) -> bool {
    init_tracing();
    let mut ctx = OpContext::new();
    match_nodes(doc, pattern, &mut ctx).expect("match evaluates")
}

fn apply(doc: &Node, patch: &Node) -> Node {
    init_tracing();
    let mut ctx = OpContext::new();
    patch_nodes(doc, patch, &mut ctx).expect("patch applies")
}

// ---------------------------------------------------------------------------
// Structural matching
// ---------------------------------------------------------------------------

#[test]
fn object_patterns_match_field_wise() {
    let doc = obj(vec![("name", Node::from_string("ada")), ("age", Node::from_int(36))]);
    assert!(matches(&doc, &obj(vec![("name", Node::from_string("ada"))])));
    assert!(!matches(&doc, &obj(vec![("name", Node::from_string("bob"))])));
    assert!(!matches(&doc, &obj(vec![("missing", Node::null())])));
}

#[test]
fn array_patterns_match_positionally_with_longer_doc_allowed() {
    let doc = arr(vec![Node::from_int(1), Node::from_int(2), Node::from_int(3)]);
    assert!(matches(&doc, &arr(vec![Node::from_int(1), Node::from_int(2)])));
    assert!(!matches(&doc, &arr(vec![Node::from_int(2)])));
    // A pattern longer than the doc fails.
    let short = arr(vec![Node::from_int(1)]);
    assert!(!matches(&short, &arr(vec![Node::from_int(1), Node::from_int(2)])));
}

#[test]
fn matching_is_idempotent() {
    let doc = obj(vec![("x", Node::from_int(1))]);
    let pattern = obj(vec![("x", Node::null().with_tag("!number"))]);
    let first = matches(&doc, &pattern);
    let second = matches(&doc, &pattern);
    assert_eq!(first, second);
    assert!(first);
}

// ---------------------------------------------------------------------------
// Boolean operators
// ---------------------------------------------------------------------------

#[test]
fn or_over_array_matches_any_branch() {
    let pattern = arr(vec![Node::null(), Node::null().with_tag("!string")]).with_tag("!or");
    assert!(matches(&Node::null(), &pattern));
    assert!(matches(&Node::from_string("x"), &pattern));
    assert!(!matches(&Node::from_int(1), &pattern));
}

#[test]
fn or_over_object_matches_any_shared_key() {
    let pattern = obj(vec![("a", Node::from_int(1)), ("b", Node::from_int(2))]).with_tag("!or");
    assert!(matches(&obj(vec![("b", Node::from_int(2))]), &pattern));
    assert!(!matches(&obj(vec![("b", Node::from_int(9))]), &pattern));
    assert!(!matches(&obj(vec![("c", Node::from_int(1))]), &pattern));
}

#[test]
fn and_is_conjunction_with_empty_true() {
    let both = arr(vec![
        Node::null().with_tag("!number"),
        Node::null().with_tag("!int"),
    ])
    .with_tag("!and");
    assert!(matches(&Node::from_int(3), &both));
    assert!(!matches(&Node::from_float(3.0), &both));
    assert!(matches(&Node::from_string("anything"), &arr(vec![]).with_tag("!and")));
}

#[test]
fn not_chains_onto_the_remaining_tag() {
    let pattern = arr(vec![Node::from_int(1), Node::from_int(2)]).with_tag("!not.or");
    assert!(matches(&Node::from_int(3), &pattern));
    assert!(!matches(&Node::from_int(1), &pattern));
}

// ---------------------------------------------------------------------------
// Type and content predicates
// ---------------------------------------------------------------------------

#[test]
fn irtype_compares_kinds_only() {
    let pattern = arr(vec![]).with_tag("!irtype");
    assert!(matches(&arr(vec![Node::from_int(1)]), &pattern));
    assert!(!matches(&obj(vec![]), &pattern));
}

#[test]
fn type_tags_classify_scalars() {
    assert!(matches(&Node::from_int(1), &Node::null().with_tag("!int")));
    assert!(!matches(&Node::from_float(1.5), &Node::null().with_tag("!int")));
    assert!(matches(&Node::from_float(1.5), &Node::null().with_tag("!number")));
    assert!(matches(&Node::null(), &Node::null().with_tag("!null")));
    assert!(!matches(&Node::from_string("s"), &Node::null().with_tag("!bool")));
}

#[test]
fn glob_matches_shell_patterns_and_rejects_non_strings() {
    let pattern = Node::from_string("ba*").with_tag("!glob");
    assert!(matches(&Node::from_string("banana"), &pattern));
    assert!(!matches(&Node::from_string("apple"), &pattern));

    let mut ctx = OpContext::new();
    assert!(matches!(
        match_nodes(&Node::from_int(1), &pattern, &mut ctx),
        Err(Error::Type { .. })
    ));
}

#[test]
fn has_path_resolves_under_the_doc() {
    let doc = obj(vec![(
        "users",
        arr(vec![obj(vec![("name", Node::from_string("ada"))])]),
    )]);
    assert!(matches(&doc, &Node::from_string("users[0].name").with_tag("!has-path")));
    assert!(!matches(&doc, &Node::from_string("users[1]").with_tag("!has-path")));
    assert!(!matches(&doc, &Node::from_string("users.name").with_tag("!has-path")));
}

#[test]
fn all_composes_with_inner_operators() {
    let doc = arr(vec![
        obj(vec![("a", Node::from_int(1))]),
        obj(vec![("a", Node::from_int(2))]),
    ]);
    let pattern = Node::from_string("a").with_tag("!all.has-path");
    assert!(matches(&doc, &pattern));

    let partial = arr(vec![obj(vec![("a", Node::from_int(1))]), obj(vec![])]);
    assert!(!matches(&partial, &pattern));
}

#[test]
fn all_over_scalar_applies_the_child_once() {
    assert!(matches(&Node::from_int(1), &Node::null().with_tag("!all.number")));
}

#[test]
fn field_matches_the_parent_field_name() {
    let doc = obj(vec![("name", Node::from_string("ada"))]);
    let pattern = obj(vec![("name", Node::from_string("name").with_tag("!field"))]);
    assert!(matches(&doc, &pattern));
    let wrong = obj(vec![("name", Node::from_string("other").with_tag("!field"))]);
    assert!(!matches(&doc, &wrong));
}

#[test]
fn tag_lifts_the_doc_tag_for_matching() {
    let doc = Node::from_int(1).with_tag("!version");
    assert!(matches(&doc, &Node::from_string("version").with_tag("!tag")));
    assert!(!matches(&doc, &Node::from_string("other").with_tag("!tag")));

    let with_args = Node::null().with_tag("!key(name)");
    let pattern = obj(vec![("name", Node::from_string("key"))]).with_tag("!tag");
    assert!(matches(&with_args, &pattern));
}

#[test]
fn subtree_searches_the_whole_doc() {
    let doc = obj(vec![(
        "deep",
        arr(vec![obj(vec![("needle", Node::from_string("found"))])]),
    )]);
    assert!(matches(&doc, &Node::from_string("found").with_tag("!subtree")));
    assert!(!matches(&doc, &Node::from_string("absent").with_tag("!subtree")));
}

#[test]
fn let_binds_names_for_the_body() {
    let pattern = obj(vec![
        ("let", arr(vec![obj(vec![("x", Node::from_int(5))])])),
        ("in", Node::from_string(".[x]")),
    ])
    .with_tag("!let");
    assert!(matches(&Node::from_int(5), &pattern));
    assert!(!matches(&Node::from_int(6), &pattern));
}

#[test]
fn if_selects_a_branch_for_matching() {
    let pattern = obj(vec![
        ("if", Node::null().with_tag("!number")),
        ("then", Node::from_int(1)),
        ("else", Node::from_string("fallback")),
    ])
    .with_tag("!if");
    assert!(matches(&Node::from_int(1), &pattern));
    assert!(!matches(&Node::from_int(2), &pattern));
    assert!(matches(&Node::from_string("fallback"), &pattern));
}

#[test]
fn key_matches_elements_by_extracted_key() {
    let doc = arr(vec![
        obj(vec![("name", Node::from_string("b")), ("v", Node::from_int(0))]),
        obj(vec![("name", Node::from_string("c")), ("v", Node::from_int(3))]),
    ]);
    let pattern = arr(vec![obj(vec![
        ("name", Node::from_string("c")),
        ("v", Node::from_int(3)),
    ])])
    .with_tag("!key(name)");
    assert!(matches(&doc, &pattern));

    let wrong = arr(vec![obj(vec![
        ("name", Node::from_string("c")),
        ("v", Node::from_int(4)),
    ])])
    .with_tag("!key(name)");
    assert!(!matches(&doc, &wrong));
}

#[test]
fn patch_only_operators_error_in_match_position() {
    let mut ctx = OpContext::new();
    let pattern = Node::null().with_tag("!nullify");
    assert!(matches!(
        match_nodes(&Node::null(), &pattern, &mut ctx),
        Err(Error::Instantiation { .. })
    ));
}

#[test]
fn unknown_tags_are_reference_errors() {
    let mut ctx = OpContext::new();
    let pattern = Node::null().with_tag("!no-such-thing");
    assert!(matches!(
        match_nodes(&Node::null(), &pattern, &mut ctx),
        Err(Error::Reference { .. })
    ));
}

// ---------------------------------------------------------------------------
// Patching
// ---------------------------------------------------------------------------

#[test]
fn structural_patch_updates_fields_and_leaves_absent_alone() {
    let doc = obj(vec![("keep", Node::from_int(1)), ("edit", Node::from_int(2))]);
    let patch = obj(vec![("edit", Node::from_int(9)), ("absent", Node::from_int(7))]);
    let out = apply(&doc, &patch);
    assert_eq!(out.get("keep").and_then(Node::as_int), Some(1));
    assert_eq!(out.get("edit").and_then(Node::as_int), Some(9));
    // A plain value never materializes a missing field.
    assert!(out.get("absent").is_none());
}

#[test]
fn insert_and_delete_edit_object_fields() {
    let doc = obj(vec![("drop", Node::from_int(1)), ("keep", Node::from_int(2))]);
    let patch = obj(vec![
        ("add", Node::from_int(5).with_tag("!insert")),
        ("drop", Node::null().with_tag("!delete")),
    ]);
    let out = apply(&doc, &patch);
    assert!(out.get("drop").is_none());
    assert_eq!(out.get("keep").and_then(Node::as_int), Some(2));
    assert_eq!(out.get("add").and_then(Node::as_int), Some(5));
}

#[test]
fn insert_on_existing_field_is_a_structural_error() {
    let doc = obj(vec![("x", Node::from_int(1))]);
    let patch = obj(vec![("x", Node::from_int(2).with_tag("!insert"))]);
    let mut ctx = OpContext::new();
    assert!(matches!(
        patch_nodes(&doc, &patch, &mut ctx),
        Err(Error::Structural { .. })
    ));
}

#[test]
fn nullify_preserves_the_tag() {
    let doc = obj(vec![("x", Node::from_int(1))]).with_tag("!versioned");
    let out = apply(&doc, &Node::null().with_tag("!nullify"));
    assert!(out.is_null());
    assert_eq!(out.tag, "!versioned");
}

#[test]
fn replace_demands_the_expected_from_value() {
    let patch = obj(vec![("from", Node::from_int(1)), ("to", Node::from_int(2))])
        .with_tag("!replace");
    assert_eq!(apply(&Node::from_int(1), &patch).as_int(), Some(2));

    let mut ctx = OpContext::new();
    let err = patch_nodes(&Node::from_int(3), &patch, &mut ctx).expect_err("diverges");
    assert!(matches!(err, Error::Structural { .. }));
    assert!(err.to_string().contains("divergence"), "{err}");
}

#[test]
fn rename_moves_an_object_field() {
    let doc = obj(vec![("old", Node::from_int(1))]);
    let out = apply(&doc, &Node::null().with_tag("!rename(old,new)"));
    assert!(out.get("old").is_none());
    assert_eq!(out.get("new").and_then(Node::as_int), Some(1));
}

#[test]
fn field_patch_renames_then_repatches() {
    let doc = obj(vec![("old", Node::from_int(1))]);
    let patch = obj(vec![("new", Node::from_int(2))]).with_tag("!field(old,new)");
    let out = apply(&doc, &patch);
    assert_eq!(out.get("new").and_then(Node::as_int), Some(2));
}

#[test]
fn retag_mismatch_is_a_structural_error_naming_the_tag() {
    let doc = Node::from_int(1).with_tag("!baz");
    let mut ctx = OpContext::new();
    let err = patch_nodes(&doc, &Node::null().with_tag("!retag(foo,bar)"), &mut ctx)
        .expect_err("tag mismatch");
    let message = err.to_string();
    assert!(message.contains("!foo"), "{message}");
    assert!(message.contains("!baz"), "{message}");

    let ok = apply(&Node::from_int(1).with_tag("!foo"), &Node::null().with_tag("!retag(foo,bar)"));
    assert_eq!(ok.tag, "!bar");
}

#[test]
fn addtag_and_rmtag_respect_the_prefix_convention() {
    let tagged = apply(&Node::from_int(1), &Node::null().with_tag("!addtag(v2)"));
    assert_eq!(tagged.tag, "!v2");

    let cleared = apply(&tagged, &Node::null().with_tag("!rmtag(v2)"));
    assert_eq!(cleared.tag, "");

    let mut ctx = OpContext::new();
    assert!(patch_nodes(&Node::from_int(1).with_tag("!other"),
                        &Node::null().with_tag("!rmtag(v2)"), &mut ctx).is_err());
}

#[test]
fn embed_splices_the_doc_into_the_template() {
    let doc = obj(vec![("value", Node::from_int(42))]);
    let template = obj(vec![
        ("wrapped", Node::from_string("SELF")),
        ("label", Node::from_string("unrelated")),
    ])
    .with_tag("!embed(SELF)");
    let out = apply(&doc, &template);
    assert_eq!(
        out.get("wrapped").and_then(|n| n.get("value")).and_then(Node::as_int),
        Some(42)
    );
    assert_eq!(out.get("label").and_then(Node::as_str), Some("unrelated"));
}

#[test]
fn dive_merges_structurally() {
    let doc = obj(vec![("a", obj(vec![("b", Node::from_int(1))])), ("keep", Node::from_int(0))]);
    let overlay = obj(vec![("a", obj(vec![("c", Node::from_int(2))])), ("d", Node::from_int(3))])
        .with_tag("!dive");
    let out = apply(&doc, &overlay);
    assert_eq!(out.get("a").and_then(|n| n.get("b")).and_then(Node::as_int), Some(1));
    assert_eq!(out.get("a").and_then(|n| n.get("c")).and_then(Node::as_int), Some(2));
    assert_eq!(out.get("d").and_then(Node::as_int), Some(3));
    assert_eq!(out.get("keep").and_then(Node::as_int), Some(0));
}

#[test]
fn json_patch_applies_rfc6902_operations() {
    let doc = obj(vec![("a", Node::from_int(1))]);
    let ops = arr(vec![obj(vec![
        ("op", Node::from_string("add")),
        ("path", Node::from_string("/b")),
        ("value", Node::from_int(2)),
    ])])
    .with_tag("!json-patch");
    let out = apply(&doc, &ops);
    assert_eq!(out.get("a").and_then(Node::as_int), Some(1));
    assert_eq!(out.get("b").and_then(Node::as_int), Some(2));
}

#[test]
fn unquote_parses_the_string_payload() {
    let doc = Node::from_string(r#"{"a": 1}"#);
    let out = apply(&doc, &Node::null().with_tag("!unquote"));
    assert_eq!(out.get("a").and_then(Node::as_int), Some(1));

    let mut ctx = OpContext::new();
    assert!(patch_nodes(&Node::from_int(1), &Node::null().with_tag("!unquote"), &mut ctx).is_err());
}

#[test]
fn if_patch_dispatches_then_and_else() {
    let patch = obj(vec![
        ("if", Node::null().with_tag("!number")),
        ("then", Node::from_string("was-number")),
    ])
    .with_tag("!if");
    assert_eq!(apply(&Node::from_int(1), &patch).as_str(), Some("was-number"));
    // No else branch: non-matching docs pass through unchanged.
    assert_eq!(apply(&Node::from_string("s"), &patch).as_str(), Some("s"));
}

#[test]
fn arraydiff_walks_indices_in_lockstep() {
    let doc = arr(vec![Node::from_int(1), Node::from_int(2), Node::from_int(3)]);
    let payload = Node::from_int_keys_map(vec![
        (1, obj(vec![("from", Node::from_int(2)), ("to", Node::from_int(9))]).with_tag("!replace")),
        (3, Node::from_int(4).with_tag("!insert")),
    ])
    .with_tag("!arraydiff");
    let out = apply(&doc, &payload);
    let values: Vec<i64> = out.elements().iter().filter_map(Node::as_int).collect();
    assert_eq!(values, vec![1, 9, 3, 4]);
}

#[test]
fn arraydiff_delete_consumes_the_from_index() {
    let doc = arr(vec![Node::from_int(1), Node::from_int(2), Node::from_int(3)]);
    let payload = Node::from_int_keys_map(vec![(0, Node::null().with_tag("!delete"))])
        .with_tag("!arraydiff");
    let out = apply(&doc, &payload);
    let values: Vec<i64> = out.elements().iter().filter_map(Node::as_int).collect();
    assert_eq!(values, vec![2, 3]);
}

#[test]
fn strdiff_verifies_and_rebuilds_the_string() {
    let chunk = |op: i64, text: &str| {
        arr(vec![Node::from_int(op), Node::from_string(text)])
    };
    let payload = arr(vec![chunk(0, "he"), chunk(-1, "llo"), chunk(1, "y")]).with_tag("!strdiff");
    assert_eq!(apply(&Node::from_string("hello"), &payload).as_str(), Some("hey"));

    let mut ctx = OpContext::new();
    assert!(patch_nodes(&Node::from_string("other"), &payload, &mut ctx).is_err());
}

#[test]
fn keyed_merge_appends_unmatched_keys_in_sorted_order() {
    let doc = arr(vec![
        obj(vec![("name", Node::from_string("b")), ("v", Node::from_int(0))]),
        obj(vec![("name", Node::from_string("c")), ("v", Node::from_int(3))]),
    ]);
    let patch = arr(vec![
        obj(vec![("name", Node::from_string("a")), ("v", Node::from_int(2))]),
        obj(vec![("name", Node::from_string("b")), ("v", Node::from_int(1))]),
    ])
    .with_tag("!key(name)");
    let out = apply(&doc, &patch);
    let names: Vec<&str> = out
        .elements()
        .iter()
        .filter_map(|el| el.get("name").and_then(Node::as_str))
        .collect();
    assert_eq!(names, vec!["b", "c", "a"]);
    let values: Vec<i64> = out
        .elements()
        .iter()
        .filter_map(|el| el.get("v").and_then(Node::as_int))
        .collect();
    assert_eq!(values, vec![1, 3, 2]);
}

#[test]
fn bracket_groups_without_changing_semantics() {
    assert!(matches(&Node::from_int(1), &Node::null().with_tag("!bracket.number")));
}
