// error.rs - Typed errors for graph construction and field storage
//
// Evaluation itself never fails: runtime problems inside a pass are recorded
// as faults (see `eval::fault`). These errors cover the places where the
// caller hands us malformed data up front.

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("edge references unknown node `{0}`")]
    UnknownNode(String),

    #[error("node id `{0}` appears more than once")]
    DuplicateNode(String),

    #[error("node `{node}` has unknown type `{kind}`")]
    UnknownNodeType { node: String, kind: String },

    #[error("edge into node `{node}` names unknown port `{port}`")]
    UnknownPort { node: String, port: String },

    #[error("port `{port}` on node `{node}` already has a connection")]
    DuplicateConnection { node: String, port: String },

    #[error("graph contains a cycle through node `{0}`")]
    Cycle(String),

    #[error("output node `{0}` is not in the graph")]
    UnknownOutput(String),

    #[error("no evaluable root node found in graph")]
    NoRoot,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("field of resolution {resolution} needs {expected} texels, got {actual}")]
    LengthMismatch {
        resolution: u32,
        expected: usize,
        actual: usize,
    },

    #[error("vertex count {count} exceeds capacity {capacity}")]
    CountExceedsCapacity { count: usize, capacity: usize },

    #[error("buffer {0} was accessed after its pass released it")]
    DisposedAccess(usize),
}
