// fieldgraph - node-graph evaluation of procedural terrain fields
//
// A graph of typed nodes (generators, modifiers, combinators, deformers and
// IO boundaries) is expanded on demand into kernel jobs on the rayon pool,
// producing scalar fields, multi-channel rasters or polylines.

pub mod commands;
pub mod error;
pub mod eval;

pub use error::{FieldError, GraphError, GraphResult};
