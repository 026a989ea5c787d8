//! Benchmarks for the field evaluation pipeline.
//!
//! Measures:
//!   1. Pass throughput at various resolutions
//!   2. Graph complexity scaling (single generator → deep chains → wide sums)
//!   3. Polyline deformation against a noise field
//!   4. Command overhead: JSON parse → graph build → evaluate → JSON serialize
//!
//! Run with:
//!   cargo bench --bench eval_bench
//!
//! Results are written to `target/criterion/` with HTML reports.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fieldgraph::commands::evaluate::{evaluate_request, EvaluateRequest};
use fieldgraph::eval::field::{PolarVertex, Polyline, VectorField};
use fieldgraph::eval::graph::{EvalGraph, GraphEdge, GraphNode, NodeData};
use fieldgraph::eval::grid::{evaluate, evaluate_root};
use fieldgraph::eval::{EvalContext, ExternalInputs};
use serde_json::{json, Value};

// ── Graph builder helpers ──────────────────────────────────────────

fn make_node(id: &str, kind: &str, fields: Value) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        data: NodeData {
            kind: Some(kind.to_string()),
            fields: serde_json::from_value(fields).unwrap(),
            is_output: false,
        },
        node_type: None,
    }
}

fn make_edge(source: &str, target: &str, handle: &str) -> GraphEdge {
    GraphEdge {
        source: source.to_string(),
        target: target.to_string(),
        target_handle: Some(handle.to_string()),
    }
}

// ── Graph factories ────────────────────────────────────────────────

fn graph_constant() -> EvalGraph {
    let nodes = vec![make_node("c", "Constant", json!({"Value": 42.0}))];
    EvalGraph::from_raw(nodes, vec![], Some("c")).unwrap()
}

fn graph_simplex() -> EvalGraph {
    let nodes = vec![make_node("n", "SimplexNoise", json!({"Frequency": 8.0}))];
    EvalGraph::from_raw(nodes, vec![], Some("n")).unwrap()
}

fn graph_fractal() -> EvalGraph {
    let nodes = vec![make_node(
        "n",
        "FractalNoise",
        json!({"Frequency": 4.0, "Octaves": 6}),
    )];
    EvalGraph::from_raw(nodes, vec![], Some("n")).unwrap()
}

/// Fractal warped by cellular noise, ridged and floored.
fn graph_terrain() -> EvalGraph {
    let nodes = vec![
        make_node("base", "FractalNoise", json!({"Frequency": 3.0, "Octaves": 5})),
        make_node("cells", "CellularNoise", json!({"Frequency": 6.0})),
        make_node("warp", "DomainWarp", json!({"Strength": 0.05})),
        make_node("ridge", "Abs", json!({})),
        make_node("floor", "Constant", json!({"Value": 0.1})),
        make_node("out", "Max", json!({})),
    ];
    let edges = vec![
        make_edge("base", "warp", "Input"),
        make_edge("cells", "warp", "Warp"),
        make_edge("warp", "ridge", "Input"),
        make_edge("ridge", "out", "InputA"),
        make_edge("floor", "out", "InputB"),
    ];
    EvalGraph::from_raw(nodes, edges, Some("out")).unwrap()
}

/// A chain of `depth` unary modifiers over one generator.
fn graph_deep_chain(depth: usize) -> EvalGraph {
    let mut nodes = vec![make_node("n0", "SimplexNoise", json!({"Frequency": 4.0}))];
    let mut edges = Vec::new();
    for i in 1..=depth {
        let kind = if i % 2 == 0 { "Abs" } else { "Invert" };
        nodes.push(make_node(&format!("n{}", i), kind, json!({})));
        edges.push(make_edge(&format!("n{}", i - 1), &format!("n{}", i), "Input"));
    }
    let root = format!("n{}", depth);
    EvalGraph::from_raw(nodes, edges, Some(&root)).unwrap()
}

/// A sum over `width` independently seeded generators.
fn graph_wide_sum(width: usize) -> EvalGraph {
    let mut nodes = vec![make_node("sum", "Sum", json!({}))];
    let mut edges = Vec::new();
    for i in 0..width {
        let id = format!("g{}", i);
        nodes.push(make_node(
            &id,
            "SimplexNoise",
            json!({"Frequency": 2.0 + i as f64, "Seed": i}),
        ));
        edges.push(make_edge(&id, "sum", &format!("Inputs[{}]", i)));
    }
    EvalGraph::from_raw(nodes, edges, Some("sum")).unwrap()
}

fn graph_polygon_deform() -> EvalGraph {
    let nodes = vec![
        make_node("shape", "VectorInput", json!({})),
        make_node("noise", "FractalNoise", json!({"Frequency": 3.0})),
        make_node("deform", "VectorDeform", json!({"Strength": 0.2})),
    ];
    let edges = vec![
        make_edge("shape", "deform", "Vector"),
        make_edge("noise", "deform", "Deformation"),
    ];
    EvalGraph::from_raw(nodes, edges, Some("deform")).unwrap()
}

// ── Benchmark groups ───────────────────────────────────────────────

/// One pass at increasing resolutions.
fn bench_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolution");
    let resolutions: &[u32] = &[64, 128, 256, 512];

    let graphs: Vec<(&str, EvalGraph)> = vec![
        ("constant", graph_constant()),
        ("simplex", graph_simplex()),
        ("fractal", graph_fractal()),
        ("terrain", graph_terrain()),
    ];

    for (label, graph) in &graphs {
        for &res in resolutions {
            let param = format!("{}/{}", label, res);
            let ctx = EvalContext::new(res);
            group.throughput(Throughput::Elements((res as u64) * (res as u64)));
            group.bench_with_input(BenchmarkId::new("pass", &param), &ctx, |b, ctx| {
                b.iter(|| black_box(evaluate_root(graph, ctx, ExternalInputs::new())));
            });
        }
    }

    group.finish();
}

/// Same resolution, increasing graph depth and width.
fn bench_graph_complexity(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_complexity");
    let ctx = EvalContext::new(256);

    let graphs: Vec<(String, EvalGraph)> = vec![
        ("chain_4".into(), graph_deep_chain(4)),
        ("chain_16".into(), graph_deep_chain(16)),
        ("sum_4".into(), graph_wide_sum(4)),
        ("sum_16".into(), graph_wide_sum(16)),
    ];

    for (label, graph) in &graphs {
        group.throughput(Throughput::Elements(256 * 256));
        group.bench_function(BenchmarkId::new("pass_256", label), |b| {
            b.iter(|| black_box(evaluate_root(graph, &ctx, ExternalInputs::new())));
        });
    }

    group.finish();
}

/// Polyline deformation with increasing vertex counts.
fn bench_vector_deform(c: &mut Criterion) {
    let mut group = c.benchmark_group("vector_deform");
    let graph = graph_polygon_deform();
    let ctx = EvalContext::new(128);

    for &n in &[64usize, 1024, 16384] {
        let vertices: Vec<PolarVertex> = (0..n)
            .map(|i| PolarVertex::new(i as f32 * std::f32::consts::TAU / n as f32, 0.5))
            .collect();
        let shape = VectorField::from_polyline(Polyline::from_vertices(vertices));
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("vertices", n), &shape, |b, shape| {
            b.iter(|| {
                let mut inputs = ExternalInputs::new();
                inputs.set_vector_input(shape.clone());
                black_box(evaluate(&graph, graph.root_idx, &ctx, inputs))
            });
        });
    }

    group.finish();
}

/// Full command path including JSON parsing and response serialization.
fn bench_command_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_roundtrip");

    for &res in &[64u32, 256] {
        let request = json!({
            "nodes": [
                {"id": "base", "data": {"type": "FractalNoise", "fields": {"Frequency": 3.0}}},
                {"id": "raster", "data": {"type": "RasterFromField"}}
            ],
            "edges": [{"source": "base", "target": "raster", "targetHandle": "Input"}],
            "resolution": res
        })
        .to_string();

        group.throughput(Throughput::Elements((res as u64) * (res as u64)));
        group.bench_with_input(BenchmarkId::new("raster", res), &request, |b, request| {
            b.iter(|| {
                let parsed: EvaluateRequest = serde_json::from_str(request).unwrap();
                let response = evaluate_request(parsed).unwrap();
                black_box(serde_json::to_string(&response).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_resolution,
    bench_graph_complexity,
    bench_vector_deform,
    bench_command_roundtrip,
);
criterion_main!(benches);
