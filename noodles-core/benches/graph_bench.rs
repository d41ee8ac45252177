use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use noodles_core::graph::{execution_levels, topological_sort};
use noodles_core::operator::outputs;
use noodles_core::{Edge, Executor, FnOperator, OperatorCore, OperatorId, OperatorRole};
use serde_json::{json, Value};

/// A layered graph: `width` nodes per layer, each wired to every node of the
/// previous layer.
fn layered(width: usize, depth: usize) -> (Vec<OperatorId>, Vec<Edge>) {
    let name = |layer: usize, column: usize| format!("/l{layer}/n{column}");
    let mut nodes = Vec::with_capacity(width * depth);
    let mut edges = Vec::new();
    for layer in 0..depth {
        for column in 0..width {
            nodes.push(OperatorId::from(name(layer, column)));
            if layer > 0 {
                for previous in 0..width {
                    edges.push(Edge::new(
                        name(layer - 1, previous),
                        "out",
                        name(layer, column),
                        format!("in{previous}"),
                    ));
                }
            }
        }
    }
    (nodes, edges)
}

fn bench_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_sort");
    for (width, depth) in [(4, 8), (8, 16), (16, 32)] {
        let (nodes, edges) = layered(width, depth);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{width}x{depth}")),
            &(nodes, edges),
            |b, (nodes, edges)| b.iter(|| topological_sort(black_box(nodes), black_box(edges))),
        );
    }
    group.finish();
}

fn bench_levels(c: &mut Criterion) {
    let (nodes, edges) = layered(16, 32);
    let order = topological_sort(&nodes, &edges).order;
    c.bench_function("execution_levels 16x32", |b| {
        b.iter(|| execution_levels(black_box(&order), black_box(&edges)))
    });
}

fn bench_pass(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let executor = Executor::default();
    let (nodes, edges) = layered(8, 8);
    for id in &nodes {
        let core = (0..8).fold(
            OperatorCore::new(id.clone(), OperatorRole::Transform).with_output("out"),
            |core, previous| core.with_input(format!("in{previous}"), json!(0)),
        );
        executor.add_node(Arc::new(FnOperator::new(
            core,
            |inputs| {
                let sum: i64 = inputs.values().filter_map(Value::as_i64).sum();
                Ok(outputs([("out", json!(sum + 1))]))
            },
        )));
    }
    for edge in edges {
        executor.add_edge(edge).unwrap();
    }

    c.bench_function("force_update 8x8", |b| {
        b.iter(|| runtime.block_on(executor.force_update()))
    });
}

criterion_group!(benches, bench_sort, bench_levels, bench_pass);
criterion_main!(benches);
