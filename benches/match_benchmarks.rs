//! Criterion benchmarks for the match driver and the diff engine on
//! synthetic trees.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tony::{diff, match_nodes, Node, OpContext};

fn wide_doc(width: usize) -> Node {
    Node::from_map(
        (0..width)
            .map(|i| {
                (
                    format!("field{i}"),
                    Node::from_map(vec![
                        ("id".to_string(), Node::from_int(i as i64)),
                        ("name".to_string(), Node::from_string(format!("name{i}"))),
                    ]),
                )
            })
            .collect(),
    )
}

fn bench_match(c: &mut Criterion) {
    let doc = wide_doc(64);
    let pattern = Node::from_map(vec![(
        "field32",
        Node::from_map(vec![("name", Node::from_string("name*").with_tag("!glob"))]),
    )]);
    c.bench_function("match_wide_object", |b| {
        b.iter(|| {
            let mut ctx = OpContext::new();
            match_nodes(black_box(&doc), black_box(&pattern), &mut ctx).expect("matches")
        });
    });

    let subtree = Node::from_string("name63").with_tag("!subtree");
    c.bench_function("subtree_search", |b| {
        b.iter(|| {
            let mut ctx = OpContext::new();
            match_nodes(black_box(&doc), black_box(&subtree), &mut ctx).expect("matches")
        });
    });
}

fn bench_diff(c: &mut Criterion) {
    let from = wide_doc(64);
    let mut to = from.detached();
    to.set_field("field7", Node::from_string("changed")).expect("object");
    to.remove_field("field13");
    c.bench_function("diff_wide_object", |b| {
        b.iter(|| {
            let mut ctx = OpContext::new();
            diff(black_box(&from), black_box(&to), &mut ctx).expect("diff computes")
        });
    });
}

criterion_group!(benches, bench_match, bench_diff);
criterion_main!(benches);
