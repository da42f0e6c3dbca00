//! Schema registration and document validation end to end: the
//! satisfiability gate at registration, recursive definitions, and
//! parameterized templates.

use std::sync::Arc;

use tony::{parse_schema, validate, Error, Node, SchemaRegistry};

fn obj(pairs: Vec<(&str, Node)>) -> Node {
    Node::from_map(pairs)
}

fn arr(elements: Vec<Node>) -> Node {
    Node::from_slice(elements)
}

fn schema_ir(name: &str, define: Vec<(&str, Node)>, accept: Node) -> Node {
    obj(vec![
        ("signature", Node::from_string(name)),
        ("define", obj(define)),
        ("accept", accept),
    ])
}

#[test]
fn impossible_self_reference_is_rejected_at_registration() {
    let schema = parse_schema(&schema_ir(
        "node",
        vec![("node", obj(vec![("parent", Node::from_string(".[node]"))]))],
        Node::from_string(".[node]"),
    ))
    .expect("parses");

    let registry = SchemaRegistry::new();
    let err = registry.register(schema).expect_err("unsatisfiable");
    assert!(matches!(err, Error::Cycle { .. }));
    assert!(err.to_string().contains("impossible cycle"), "{err}");
}

#[test]
fn nullable_cycle_registers_and_validates() -> anyhow::Result<()> {
    let schema = parse_schema(&schema_ir(
        "node",
        vec![(
            "node",
            obj(vec![(
                "parent",
                arr(vec![Node::null(), Node::from_string(".[node]")]).with_tag("!or"),
            )]),
        )],
        Node::from_string(".[node]"),
    ))?;

    let registry = Arc::new(SchemaRegistry::new());
    registry.register(schema.clone())?;

    let flat = obj(vec![("parent", Node::null())]);
    assert!(validate(&flat, &schema, Some(registry.clone()))?);

    let nested = obj(vec![("parent", obj(vec![("parent", Node::null())]))]);
    assert!(validate(&nested, &schema, Some(registry.clone()))?);

    let broken = obj(vec![("parent", Node::from_int(3))]);
    assert!(!validate(&broken, &schema, Some(registry))?);
    Ok(())
}

#[test]
fn parameterized_template_classifies_typed_arrays() -> anyhow::Result<()> {
    // array(t): !and [!irtype [], !all.[t] null]
    let template = arr(vec![
        arr(vec![]).with_tag("!irtype"),
        Node::null().with_tag("!all.[t]"),
    ])
    .with_tag("!and");
    let schema = parse_schema(&schema_ir(
        "ints",
        vec![("array(t)", template)],
        Node::from_string(".[array(int)]"),
    ))?;

    let registry = Arc::new(SchemaRegistry::new());
    registry.register(schema.clone())?;

    let good = arr(vec![Node::from_int(1), Node::from_int(2)]);
    assert!(validate(&good, &schema, Some(registry.clone()))?);

    let bad = arr(vec![Node::from_int(1), Node::from_string("x")]);
    assert!(!validate(&bad, &schema, Some(registry.clone()))?);

    let not_an_array = obj(vec![]);
    assert!(!validate(&not_an_array, &schema, Some(registry))?);
    Ok(())
}

#[test]
fn builtin_constructors_validate_without_user_definitions() {
    let schema = parse_schema(&schema_ir(
        "list",
        vec![],
        Node::from_string(".[array(string)]"),
    ))
    .expect("parses");

    let registry = Arc::new(SchemaRegistry::new());
    registry.register(schema.clone()).expect("satisfiable");

    let good = arr(vec![Node::from_string("a")]);
    assert!(validate(&good, &schema, Some(registry.clone())).expect("validates"));
    let empty = arr(vec![]);
    assert!(validate(&empty, &schema, Some(registry.clone())).expect("validates"));
    let bad = arr(vec![Node::from_int(1)]);
    assert!(!validate(&bad, &schema, Some(registry)).expect("evaluates"));
}

#[test]
fn nullable_constructor_accepts_null_and_the_inner_type() {
    let schema = parse_schema(&schema_ir(
        "opt",
        vec![],
        Node::from_string(".[nullable(int)]"),
    ))
    .expect("parses");
    let registry = Arc::new(SchemaRegistry::new());
    registry.register(schema.clone()).expect("satisfiable");

    assert!(validate(&Node::null(), &schema, Some(registry.clone())).expect("validates"));
    assert!(validate(&Node::from_int(1), &schema, Some(registry.clone())).expect("validates"));
    assert!(!validate(&Node::from_string("s"), &schema, Some(registry)).expect("evaluates"));
}

#[test]
fn schema_operator_references_a_registered_schema() {
    let registry = Arc::new(SchemaRegistry::new());
    let inner = parse_schema(&schema_ir(
        "inner",
        vec![],
        Node::null().with_tag("!string"),
    ))
    .expect("parses");
    registry.register(inner).expect("registers");

    let outer = parse_schema(&schema_ir(
        "outer",
        vec![],
        obj(vec![("payload", Node::null().with_tag("!schema(inner)"))]),
    ))
    .expect("parses");
    registry.register(outer.clone()).expect("registers");

    let good = obj(vec![("payload", Node::from_string("text"))]);
    assert!(validate(&good, &outer, Some(registry.clone())).expect("validates"));
    let bad = obj(vec![("payload", Node::from_int(1))]);
    assert!(!validate(&bad, &outer, Some(registry)).expect("evaluates"));
}

#[test]
fn from_operator_pulls_a_definition_across_schemas() {
    let registry = Arc::new(SchemaRegistry::new());
    let lib = parse_schema(&schema_ir(
        "shapes",
        vec![(
            "point",
            obj(vec![
                ("x", Node::null().with_tag("!number")),
                ("y", Node::null().with_tag("!number")),
            ]),
        )],
        Node::from_string(".[point]"),
    ))
    .expect("parses");
    registry.register(lib).expect("registers");

    let user = parse_schema(&schema_ir(
        "canvas",
        vec![],
        obj(vec![("origin", Node::null().with_tag("!from(shapes,point)"))]),
    ))
    .expect("parses");
    registry.register(user.clone()).expect("registers");

    let good = obj(vec![(
        "origin",
        obj(vec![("x", Node::from_int(0)), ("y", Node::from_int(0))]),
    )]);
    assert!(validate(&good, &user, Some(registry.clone())).expect("validates"));

    let bad = obj(vec![("origin", obj(vec![("x", Node::from_int(0))]))]);
    assert!(!validate(&bad, &user, Some(registry)).expect("evaluates"));
}

#[test]
fn schema_tags_are_transparent_decoration() {
    let ir = obj(vec![
        ("signature", Node::from_string("doc")),
        (
            "tags",
            obj(vec![("doc", obj(vec![("description", Node::from_string("top-level"))]))]),
        ),
        ("accept", Node::null().with_tag("!doc.string")),
    ]);
    let schema = parse_schema(&ir).expect("parses");
    let registry = Arc::new(SchemaRegistry::new());
    registry.register(schema.clone()).expect("registers");

    assert!(validate(&Node::from_string("hello"), &schema, Some(registry.clone())).expect("validates"));
    assert!(!validate(&Node::from_int(1), &schema, Some(registry)).expect("evaluates"));
}

#[test]
fn validation_without_accept_is_vacuously_true() {
    let schema = parse_schema(&obj(vec![("signature", Node::from_string("open"))]))
        .expect("parses");
    assert!(validate(&Node::from_int(1), &schema, None).expect("validates"));
}

#[test]
fn mutually_recursive_defs_with_array_escape_register() {
    let schema = parse_schema(&schema_ir(
        "tree",
        vec![
            (
                "node",
                obj(vec![
                    ("label", Node::null().with_tag("!string")),
                    ("children", Node::from_string(".[array(node)]")),
                ]),
            ),
        ],
        Node::from_string(".[node]"),
    ))
    .expect("parses");
    let registry = Arc::new(SchemaRegistry::new());
    registry.register(schema.clone()).expect("array escape registers");

    let doc = obj(vec![
        ("label", Node::from_string("root")),
        (
            "children",
            arr(vec![obj(vec![
                ("label", Node::from_string("leaf")),
                ("children", arr(vec![])),
            ])]),
        ),
    ]);
    assert!(validate(&doc, &schema, Some(registry)).expect("validates"));
}
