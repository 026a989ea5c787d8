// eval/grid.rs - Pass entry points and result summaries
//
// One pass: build a scheduler over the graph, expand the requested output
// into jobs, join the terminal handle once, then release every intermediate
// buffer. The terminal buffer belongs to the caller and survives the pass.
//
// Passes are independent. Nothing computed in one pass is reused by the
// next, and injected inputs are consumed by the pass they were handed to.

use crate::error::{GraphError, GraphResult};
use crate::eval::arena::BufferArena;
use crate::eval::context::EvalContext;
use crate::eval::fault::{Fault, FaultLog};
use crate::eval::field::{FieldBuffer, ScalarField};
use crate::eval::graph::EvalGraph;
use crate::eval::inputs::ExternalInputs;
use crate::eval::job::JobHandle;
use crate::eval::scheduler::Scheduler;
use serde::Serialize;

/// Bookkeeping for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// Intermediate buffers registered with the pass arena.
    pub registered: usize,
    /// Intermediate buffers released at the end of the pass.
    pub disposed: usize,
    pub kernels_scheduled: usize,
}

/// The terminal buffer of a pass, plus whatever degraded along the way.
#[derive(Debug, Clone)]
pub struct EvalOutput {
    pub buffer: FieldBuffer,
    pub faults: Vec<Fault>,
    pub stats: PassStats,
}

/// Evaluate node `output` into a freshly allocated buffer.
///
/// Never fails: faults degrade individual nodes and are returned alongside
/// the buffer.
#[tracing::instrument(skip(graph, ctx, inputs), fields(resolution = ctx.resolution))]
pub fn evaluate(
    graph: &EvalGraph,
    output: usize,
    ctx: &EvalContext,
    inputs: ExternalInputs,
) -> EvalOutput {
    let scheduler = Scheduler::new(graph, inputs, FaultLog::new());
    let kind = graph.node(output).kind.output_kind();
    let target = FieldBuffer::allocate(kind, ctx.resolution, scheduler.vector_capacity(output));
    run_pass(scheduler, output, ctx, target)
}

/// Evaluate node `output` into a caller-supplied buffer.
///
/// The buffer is written in place and is not registered with the pass
/// arena. A buffer of the wrong shape is reported as a fault on `output`.
#[tracing::instrument(skip(graph, ctx, inputs, target), fields(resolution = ctx.resolution))]
pub fn evaluate_into(
    graph: &EvalGraph,
    output: usize,
    ctx: &EvalContext,
    inputs: ExternalInputs,
    target: FieldBuffer,
) -> EvalOutput {
    let scheduler = Scheduler::new(graph, inputs, FaultLog::new());
    run_pass(scheduler, output, ctx, target)
}

/// Evaluate the node with the given id.
pub fn evaluate_node(
    graph: &EvalGraph,
    output_id: &str,
    ctx: &EvalContext,
    inputs: ExternalInputs,
) -> GraphResult<EvalOutput> {
    let output = graph
        .idx_of(output_id)
        .ok_or_else(|| GraphError::UnknownOutput(output_id.to_string()))?;
    Ok(evaluate(graph, output, ctx, inputs))
}

/// Evaluate the graph's default output node.
pub fn evaluate_root(graph: &EvalGraph, ctx: &EvalContext, inputs: ExternalInputs) -> EvalOutput {
    evaluate(graph, graph.root_idx, ctx, inputs)
}

fn run_pass(
    mut scheduler: Scheduler<'_>,
    output: usize,
    ctx: &EvalContext,
    target: FieldBuffer,
) -> EvalOutput {
    let mut arena = BufferArena::new();
    let (buffer, handle) =
        scheduler.produce(output, ctx, &mut arena, target, &JobHandle::completed());
    handle.wait();
    arena.dispose_all();

    let stats = PassStats {
        registered: arena.registered(),
        disposed: arena.disposed(),
        kernels_scheduled: scheduler.kernels_scheduled(),
    };
    let faults = scheduler.faults().snapshot();
    tracing::debug!(
        kernels = stats.kernels_scheduled,
        buffers = stats.registered,
        faults = faults.len(),
        "pass complete"
    );
    EvalOutput {
        buffer,
        faults,
        stats,
    }
}

/// A scalar field flattened for transport, with its value range.
#[derive(Debug, Clone, Serialize)]
pub struct GridResult {
    /// Row-major f32 values. Length = resolution × resolution.
    pub values: Vec<f32>,
    pub resolution: u32,
    /// Minimum value in the result (for normalization).
    pub min_value: f32,
    /// Maximum value in the result (for normalization).
    pub max_value: f32,
}

impl GridResult {
    pub fn from_field(field: &ScalarField) -> Self {
        let values = field.to_vec();
        let (min_value, max_value) = if values.is_empty() {
            (0.0, 0.0)
        } else {
            values
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
        };
        GridResult {
            values,
            resolution: field.resolution(),
            min_value,
            max_value,
        }
    }
}
