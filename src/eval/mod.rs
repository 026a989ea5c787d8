pub mod arena;
pub mod context;
pub mod fault;
pub mod field;
pub mod graph;
pub mod grid;
pub mod inputs;
pub mod job;
pub mod kernels;
pub mod nodes;
pub mod noise;
pub mod ports;
pub mod sample;
pub mod scheduler;

pub use context::EvalContext;
pub use fault::{Fault, FaultKind, FaultLog};
pub use field::{
    FieldBuffer, FieldKind, PolarVertex, Polyline, RasterField, ScalarField, VectorField,
};
pub use graph::{EvalGraph, GraphEdge, GraphNode};
pub use grid::{
    evaluate, evaluate_into, evaluate_node, evaluate_root, EvalOutput, GridResult, PassStats,
};
pub use inputs::ExternalInputs;
