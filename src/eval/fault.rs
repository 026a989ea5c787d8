// eval/fault.rs - Per-pass fault log
//
// Faults never abort a pass. The scheduler records them while walking the
// graph and kernels record them from worker threads, so the log is shared
// behind a mutex. Each entry names the node that degraded.

use crate::eval::field::FieldKind;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FaultKind {
    #[error("required input `{port}` is not connected")]
    MissingConnection { port: String },

    #[error("input `{port}` expects a {expected} producer but upstream produces {found}")]
    TypeMismatch {
        port: String,
        expected: FieldKind,
        found: FieldKind,
    },

    #[error("invalid buffer state: {detail}")]
    InvalidBufferState { detail: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("node `{node}`: {kind}")]
pub struct Fault {
    pub node: String,
    pub kind: FaultKind,
}

#[derive(Debug, Clone, Default)]
pub struct FaultLog {
    entries: Arc<Mutex<Vec<Fault>>>,
}

impl FaultLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node: &str, kind: FaultKind) {
        let fault = Fault {
            node: node.to_string(),
            kind,
        };
        tracing::warn!(node, fault = %fault.kind, "node degraded");
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fault);
    }

    pub fn snapshot(&self) -> Vec<Fault> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
