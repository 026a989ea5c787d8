// eval/context.rs - Per-pass evaluation parameters
//
// Built fresh for each pass and threaded unchanged through every `produce`
// call. Node-local values combine with it by addition (seed) or
// multiplication (contribution), never by override, so re-seeding a pass
// shifts every generator by the same predictable amount.

use crate::eval::field::ScalarField;

#[derive(Debug, Clone)]
pub struct EvalContext {
    /// Global contribution of modifier/deformer nodes, in [0, 1].
    pub contribution: f32,
    /// Added to every generator's local seed.
    pub seed: i32,
    /// When present, replaces `contribution` with this field resampled at
    /// each element's position.
    pub global_mask: Option<ScalarField>,
    /// Side length of every field produced during the pass.
    pub resolution: u32,
}

impl EvalContext {
    pub fn new(resolution: u32) -> Self {
        Self {
            contribution: 1.0,
            seed: 0,
            global_mask: None,
            resolution,
        }
    }

    pub fn with_seed(mut self, seed: i32) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_contribution(mut self, contribution: f32) -> Self {
        self.contribution = contribution.clamp(0.0, 1.0);
        self
    }

    pub fn with_global_mask(mut self, mask: ScalarField) -> Self {
        self.global_mask = Some(mask);
        self
    }

    /// A node's local seed combined with the pass seed.
    #[inline]
    pub fn effective_seed(&self, local: i32) -> i32 {
        local.wrapping_add(self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_combine_by_addition() {
        let ctx = EvalContext::new(8).with_seed(1000);
        assert_eq!(ctx.effective_seed(5), 1005);
        assert_eq!(ctx.effective_seed(-1000), 0);
        let wrapped = EvalContext::new(8).with_seed(i32::MAX);
        assert_eq!(wrapped.effective_seed(1), i32::MIN);
    }

    #[test]
    fn contribution_is_clamped() {
        assert_eq!(EvalContext::new(1).with_contribution(2.0).contribution, 1.0);
        assert_eq!(EvalContext::new(1).with_contribution(-1.0).contribution, 0.0);
    }
}
