use criterion::{criterion_group, criterion_main, Criterion};
use shadowgraph_core::{partition_radius, Edge, EdgeIndex, NodeId, Relation};

fn node(index: usize) -> NodeId {
    NodeId::new(format!("code:src/mod{}.py:function:f{index}", index % 50))
}

// Ring with chords: every node depends on its successor and on a node a
// third of the way around, so the graph is dense in cycles.
fn cyclic_edges(size: usize) -> Vec<Edge> {
    let mut edges = Vec::with_capacity(size * 3);
    for index in 0..size {
        edges.push(Edge::new(node(index), node((index + 1) % size), Relation::DependsOn));
        edges.push(Edge::new(node(index), node((index + size / 3) % size), Relation::DependsOn));
        if index % 7 == 0 {
            edges.push(Edge::new(node(index), node((index + 11) % size), Relation::Impacts));
        }
    }
    edges
}

fn bench_blast_radius(c: &mut Criterion) {
    let edges = cyclic_edges(5_000);
    let graph = EdgeIndex::from_edges(&edges);
    let origin = node(0);

    c.bench_function("blast_radius_depth_3_cyclic_5k", |b| {
        b.iter(|| partition_radius(&graph, &origin, 3));
    });
    c.bench_function("blast_radius_depth_16_cyclic_5k", |b| {
        b.iter(|| partition_radius(&graph, &origin, 16));
    });
}

criterion_group!(benches, bench_blast_radius);
criterion_main!(benches);
