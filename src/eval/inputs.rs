// eval/inputs.rs - Externally injected data for one pass
//
// The orchestrating caller injects a polyline and/or a mask field before
// evaluating. `evaluate` takes the injection by value, so every pass starts
// from an empty set and a later pass has to inject again. The buffers stay
// caller-owned: the graph only reads them and never registers or disposes
// them.

use crate::error::FieldError;
use crate::eval::field::{texel_count, ScalarField, VectorField};

#[derive(Debug, Clone, Default)]
pub struct ExternalInputs {
    vector: Option<VectorField>,
    mask: Option<ScalarField>,
}

impl ExternalInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_vector_input(&mut self, vector: VectorField) {
        self.vector = Some(vector);
    }

    /// Inject a mask field; `resolution` must match the field's own.
    pub fn set_mask_input(&mut self, mask: ScalarField, resolution: u32) -> Result<(), FieldError> {
        if mask.resolution() != resolution {
            return Err(FieldError::LengthMismatch {
                resolution,
                expected: texel_count(resolution),
                actual: texel_count(mask.resolution()),
            });
        }
        self.mask = Some(mask);
        Ok(())
    }

    pub fn clear_external_inputs(&mut self) {
        self.vector = None;
        self.mask = None;
    }

    /// True when every requested injection is present.
    pub fn has_required_inputs(&self, require_vector: bool, require_mask: bool) -> bool {
        (!require_vector || self.vector.is_some()) && (!require_mask || self.mask.is_some())
    }

    pub fn vector(&self) -> Option<&VectorField> {
        self.vector.as_ref()
    }

    pub fn mask(&self) -> Option<&ScalarField> {
        self.mask.as_ref()
    }
}
