// eval/scheduler.rs - Demand-driven expansion of the node graph into jobs
//
// `produce` walks upstream from a node, allocating one buffer per consumed
// edge and scheduling one kernel job per node visit. The walk itself is
// sequential and cheap; the kernels run on the rayon pool, each chained on
// the combined handle of the jobs that write its inputs.
//
// Connection and type problems are checked for every input before anything
// is allocated or scheduled. A node that fails the check records a fault and
// hands back its target untouched (zero-initialized), so downstream nodes
// still run and branches elsewhere in the graph are unaffected.
//
// There is no memoization: a node reached along two edges is expanded and
// computed twice, into two buffers.

use crate::eval::arena::BufferArena;
use crate::eval::context::EvalContext;
use crate::eval::fault::{FaultKind, FaultLog};
use crate::eval::field::{FieldBuffer, FieldKind, RasterField, ScalarField, VectorField};
use crate::eval::graph::EvalGraph;
use crate::eval::inputs::ExternalInputs;
use crate::eval::job::JobHandle;
use crate::eval::kernels::{self, EMPTY_PERM};
use crate::eval::noise;
use crate::eval::nodes::NodeKind;
use crate::eval::ports::{
    port_name, PortRef, P_ALTITUDE, P_DEFORMATION, P_DISTANCE, P_FACTOR, P_INPUT, P_INPUT_A,
    P_INPUT_B, P_VECTOR, P_WARP, P_WARP_Y,
};
use crate::eval::sample::{Contribution, MaskView};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;

type PermTable = Arc<[u8; 512]>;

/// Expands one pass over an `EvalGraph`.
pub struct Scheduler<'g> {
    graph: &'g EvalGraph,
    inputs: ExternalInputs,
    faults: FaultLog,
    /// Permutation tables by effective seed, shared by every kernel of this
    /// pass that uses the same seed.
    perm_cache: FxHashMap<i32, PermTable>,
    kernels_scheduled: usize,
}

impl<'g> Scheduler<'g> {
    pub fn new(graph: &'g EvalGraph, inputs: ExternalInputs, faults: FaultLog) -> Self {
        Self {
            graph,
            inputs,
            faults,
            perm_cache: FxHashMap::default(),
            kernels_scheduled: 0,
        }
    }

    pub fn kernels_scheduled(&self) -> usize {
        self.kernels_scheduled
    }

    pub fn faults(&self) -> &FaultLog {
        &self.faults
    }

    fn perm_table(&mut self, seed: i32) -> PermTable {
        Arc::clone(
            self.perm_cache
                .entry(seed)
                .or_insert_with(|| Arc::new(noise::build_perm_table(seed))),
        )
    }

    /// Vertex capacity of the polyline `idx` produces.
    pub fn vector_capacity(&self, idx: usize) -> usize {
        let node = self.graph.node(idx);
        match node.kind {
            NodeKind::Polygon(shape) => shape.sides as usize,
            NodeKind::VectorInput => self.inputs.vector().map_or(0, VectorField::capacity),
            NodeKind::VectorDeform { .. } | NodeKind::VectorScale { .. } => node
                .inputs
                .get(P_VECTOR)
                .map_or(0, |src| self.vector_capacity(src)),
            _ => 0,
        }
    }

    /// Schedule everything needed to fill `target` with the output of `idx`.
    ///
    /// Every job scheduled here starts after `incoming`. Returns the target
    /// buffer and a handle that completes once it is written. Intermediate
    /// buffers are registered with `arena`; `target` is not.
    pub fn produce(
        &mut self,
        idx: usize,
        ctx: &EvalContext,
        arena: &mut BufferArena,
        target: FieldBuffer,
        incoming: &JobHandle,
    ) -> (FieldBuffer, JobHandle) {
        let graph = self.graph;
        let node = graph.node(idx);
        let slots = node.kind.input_slots(&node.inputs);

        // ── 1. Validate every input before touching anything ──

        let mut connected: SmallVec<[(PortRef, FieldKind, usize); 4]> = SmallVec::new();
        for slot in &slots {
            match graph.resolve(idx, slot.port) {
                None if slot.required => {
                    self.faults.record(
                        &node.id,
                        FaultKind::MissingConnection {
                            port: slot.port.to_string(),
                        },
                    );
                    return (target, incoming.clone());
                }
                None => {}
                Some(src) => {
                    let found = graph.node(src).kind.output_kind();
                    if found != slot.kind {
                        self.faults.record(
                            &node.id,
                            FaultKind::TypeMismatch {
                                port: slot.port.to_string(),
                                expected: slot.kind,
                                found,
                            },
                        );
                        return (target, incoming.clone());
                    }
                    connected.push((slot.port, slot.kind, src));
                }
            }
        }

        if target.kind() != node.kind.output_kind() {
            self.faults.record(
                &node.id,
                FaultKind::InvalidBufferState {
                    detail: format!(
                        "target holds a {} field but the node produces {}",
                        target.kind(),
                        node.kind.output_kind()
                    ),
                },
            );
            return (target, incoming.clone());
        }

        let external_vector = if node.kind.needs_vector_input() {
            match self.inputs.vector() {
                Some(v) => Some(v.clone()),
                None => {
                    return self.missing_injection(&node.id, "injected vector", target, incoming)
                }
            }
        } else {
            None
        };
        let external_mask = if node.kind.needs_mask_input() {
            match self.inputs.mask() {
                Some(m) => Some(m.clone()),
                None => {
                    return self.missing_injection(&node.id, "injected mask", target, incoming)
                }
            }
        } else {
            None
        };

        // ── 2. Expand each connected input into its own buffer ──

        let mut input_buffers: SmallVec<[(PortRef, FieldBuffer); 4]> = SmallVec::new();
        let mut handles: SmallVec<[JobHandle; 4]> = SmallVec::new();
        for (port, kind, src) in connected {
            let capacity = match kind {
                FieldKind::Vector => self.vector_capacity(src),
                _ => 0,
            };
            let buffer = FieldBuffer::allocate(kind, ctx.resolution, capacity);
            arena.register(buffer.clone());
            let (buffer, handle) = self.produce(src, ctx, arena, buffer, incoming);
            input_buffers.push((port, buffer));
            handles.push(handle);
        }

        let after = if handles.is_empty() {
            incoming.clone()
        } else {
            JobHandle::combine(handles)
        };

        // ── 3. Schedule this node's kernel ──

        let (seed, perm) = match &node.kind {
            NodeKind::Generator(g) => {
                let seed = ctx.effective_seed(g.local_seed().unwrap_or(0));
                let perm = g.uses_permutation().then(|| self.perm_table(seed));
                (seed, perm)
            }
            _ => (ctx.seed, None),
        };

        let blend = Blend::for_node(&node.kind, node.contribution, ctx);
        let job = KernelJob {
            node: node.id.clone(),
            kind: node.kind,
            resolution: ctx.resolution,
            seed,
            perm,
            blend,
            inputs: input_buffers,
            external_vector,
            external_mask,
            target: target.clone(),
        };
        let faults = self.faults.clone();
        self.kernels_scheduled += 1;
        tracing::trace!(node = %node.id, kind = ?node.kind, "kernel scheduled");

        let handle = JobHandle::schedule(&after, move || {
            let node = job.node.clone();
            if let Err(detail) = job.run() {
                faults.record(&node, FaultKind::InvalidBufferState { detail });
            }
        });
        (target, handle)
    }

    fn missing_injection(
        &self,
        node: &str,
        what: &str,
        target: FieldBuffer,
        incoming: &JobHandle,
    ) -> (FieldBuffer, JobHandle) {
        self.faults.record(
            node,
            FaultKind::MissingConnection {
                port: what.to_string(),
            },
        );
        (target, incoming.clone())
    }
}

// ── Kernel jobs ─────────────────────────────────────────────────────

/// Contribution inputs handed to one kernel.
///
/// Kinds outside the masked categories always get the identity blend, so
/// the pass contribution and global mask never reach them.
#[derive(Debug, Clone)]
struct Blend {
    contribution: f32,
    local: f32,
    global_mask: Option<ScalarField>,
}

impl Blend {
    fn for_node(kind: &NodeKind, local: f32, ctx: &EvalContext) -> Self {
        if kind.is_masked() {
            Self {
                contribution: ctx.contribution,
                local,
                global_mask: ctx.global_mask.clone(),
            }
        } else {
            Self {
                contribution: 1.0,
                local: 1.0,
                global_mask: None,
            }
        }
    }
}

/// Everything one kernel invocation reads and writes, moved onto the pool.
struct KernelJob {
    node: String,
    kind: NodeKind,
    resolution: u32,
    seed: i32,
    perm: Option<PermTable>,
    blend: Blend,
    inputs: SmallVec<[(PortRef, FieldBuffer); 4]>,
    external_vector: Option<VectorField>,
    external_mask: Option<ScalarField>,
    target: FieldBuffer,
}

impl KernelJob {
    fn input(&self, port: PortRef) -> Option<&FieldBuffer> {
        self.inputs
            .iter()
            .find(|(p, _)| *p == port)
            .map(|(_, buffer)| buffer)
    }

    fn optional_scalar(&self, port: u8) -> Option<&ScalarField> {
        self.input(PortRef::Named(port)).and_then(FieldBuffer::as_scalar)
    }

    fn scalar(&self, port: u8) -> Result<&ScalarField, String> {
        self.optional_scalar(port)
            .ok_or_else(|| format!("input `{}` holds no float field", port_name(port)))
    }

    fn raster(&self, port: u8) -> Result<&RasterField, String> {
        self.input(PortRef::Named(port))
            .and_then(FieldBuffer::as_raster)
            .ok_or_else(|| format!("input `{}` holds no raster field", port_name(port)))
    }

    fn vector(&self, port: u8) -> Result<&VectorField, String> {
        self.input(PortRef::Named(port))
            .and_then(FieldBuffer::as_vector)
            .ok_or_else(|| format!("input `{}` holds no vector field", port_name(port)))
    }

    fn out_scalar(&self) -> Result<&ScalarField, String> {
        self.target
            .as_scalar()
            .ok_or_else(|| "target is not a float field".to_string())
    }

    fn out_raster(&self) -> Result<&RasterField, String> {
        self.target
            .as_raster()
            .ok_or_else(|| "target is not a raster field".to_string())
    }

    fn out_vector(&self) -> Result<&VectorField, String> {
        self.target
            .as_vector()
            .ok_or_else(|| "target is not a vector field".to_string())
    }

    fn run(self) -> Result<(), String> {
        let res = self.resolution;
        let mask = self
            .blend
            .global_mask
            .as_ref()
            .map(|m| (m.read(), m.resolution()));
        let c = Contribution::uniform(self.blend.contribution)
            .with_local(self.blend.local)
            .with_mask(mask.as_ref().map(|(values, resolution)| MaskView {
                values: values.as_slice(),
                resolution: *resolution,
            }));

        let result = match self.kind {
            NodeKind::Generator(generator) => {
                let perm = self.perm.as_deref().unwrap_or(&EMPTY_PERM);
                let mut out = self.out_scalar()?.write();
                kernels::generate(&mut out, res, &generator, self.seed, perm)
            }
            NodeKind::Unary(op) => {
                let input = self.scalar(P_INPUT)?.read();
                let mut out = self.out_scalar()?.write();
                kernels::unary(&mut out, &input, res, op, &c)
            }
            NodeKind::Binary(op) => {
                let a = self.scalar(P_INPUT_A)?.read();
                let b = self.scalar(P_INPUT_B)?.read();
                let mut out = self.out_scalar()?.write();
                kernels::binary(&mut out, &a, &b, res, op, &c)
            }
            NodeKind::Sum => {
                let guards: Vec<_> = self
                    .inputs
                    .iter()
                    .filter_map(|(_, buffer)| buffer.as_scalar())
                    .map(ScalarField::read)
                    .collect();
                let slices: SmallVec<[&[f32]; 8]> = guards.iter().map(|g| g.as_slice()).collect();
                let mut out = self.out_scalar()?.write();
                kernels::sum(&mut out, &slices, res, &c)
            }
            NodeKind::DomainWarp { strength } => {
                let source = self.scalar(P_INPUT)?.read();
                let warp = self.scalar(P_WARP)?.read();
                let warp_y = self.optional_scalar(P_WARP_Y).map(ScalarField::read);
                let mut out = self.out_scalar()?.write();
                let warp_y = warp_y.as_deref().map(Vec::as_slice);
                kernels::domain_warp(&mut out, &source, &warp, warp_y, res, strength, &c)
            }
            NodeKind::DeformedCircle(shape) => {
                let distance = self.scalar(P_DISTANCE)?.read();
                let deformation = self.scalar(P_DEFORMATION)?.read();
                let mut out = self.out_scalar()?.write();
                kernels::deformed_circle(&mut out, &distance, &deformation, res, shape)
            }
            NodeKind::MaskInput => {
                let mask = self
                    .external_mask
                    .as_ref()
                    .ok_or_else(|| "no mask injected".to_string())?;
                let source = mask.read();
                let mut out = self.out_scalar()?.write();
                kernels::resample(&mut out, res, &source, mask.resolution())
            }
            NodeKind::RasterFill(texel) => {
                let mut out = self.out_raster()?.write();
                kernels::raster_fill(&mut out, res, texel)
            }
            NodeKind::RasterFromField(palette) => {
                let scalar = self.scalar(P_INPUT)?.read();
                let altitude = self.optional_scalar(P_ALTITUDE).map(ScalarField::read);
                let mut out = self.out_raster()?.write();
                let altitude = altitude.as_deref().map(Vec::as_slice);
                kernels::raster_from_field(&mut out, &scalar, altitude, res, palette)
            }
            NodeKind::RasterBlend => {
                let a = self.raster(P_INPUT_A)?.read();
                let b = self.raster(P_INPUT_B)?.read();
                let factor = self.scalar(P_FACTOR)?.read();
                let mut out = self.out_raster()?.write();
                kernels::raster_blend(&mut out, &a, &b, &factor, res, &c)
            }
            NodeKind::RasterWarp { strength } => {
                let source = self.raster(P_INPUT)?.read();
                let warp = self.scalar(P_WARP)?.read();
                let warp_y = self.optional_scalar(P_WARP_Y).map(ScalarField::read);
                let mut out = self.out_raster()?.write();
                let warp_y = warp_y.as_deref().map(Vec::as_slice);
                kernels::raster_warp(&mut out, &source, &warp, warp_y, res, strength, &c)
            }
            NodeKind::VectorInput => {
                let injected = self
                    .external_vector
                    .as_ref()
                    .ok_or_else(|| "no vector injected".to_string())?;
                let source = injected.read();
                self.out_vector()?.write().copy_from(&source);
                Ok(())
            }
            NodeKind::Polygon(shape) => {
                kernels::polygon(&mut self.out_vector()?.write(), shape);
                Ok(())
            }
            NodeKind::VectorDeform { strength } => {
                let input = self.vector(P_VECTOR)?.read();
                let deformation = self.scalar(P_DEFORMATION)?.read();
                let mut out = self.out_vector()?.write();
                kernels::vector_deform(&mut out, &input, &deformation, res, strength, &c)
            }
            NodeKind::VectorScale { factor } => {
                let input = self.vector(P_VECTOR)?.read();
                kernels::vector_scale(&mut self.out_vector()?.write(), &input, factor, &c);
                Ok(())
            }
        };
        result.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::graph::{GraphEdge, GraphNode, NodeData};
    use crate::eval::nodes::Fields;
    use serde_json::{json, Value};

    fn node(id: &str, kind: &str, fields: Value) -> GraphNode {
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

    fn edge(source: &str, target: &str, handle: &str) -> GraphEdge {
        GraphEdge {
            source: source.to_string(),
            target: target.to_string(),
            target_handle: Some(handle.to_string()),
        }
    }

    #[test]
    fn diamond_is_expanded_per_edge() {
        let graph = EvalGraph::from_raw(
            vec![
                node("src", "SimplexNoise", json!({"Frequency": 2.0})),
                node("l", "Abs", json!({})),
                node("r", "Invert", json!({})),
                node("join", "Add", json!({})),
            ],
            vec![
                edge("src", "l", "Input"),
                edge("src", "r", "Input"),
                edge("l", "join", "InputA"),
                edge("r", "join", "InputB"),
            ],
            Some("join"),
        )
        .unwrap();

        let ctx = EvalContext::new(4);
        let mut arena = BufferArena::new();
        let mut scheduler = Scheduler::new(&graph, ExternalInputs::new(), FaultLog::new());
        let target = FieldBuffer::allocate(FieldKind::Float, 4, 0);
        let (_, handle) =
            scheduler.produce(graph.root_idx, &ctx, &mut arena, target, &JobHandle::completed());
        handle.wait();

        // join + l + r + two copies of src
        assert_eq!(scheduler.kernels_scheduled(), 5);
        assert_eq!(arena.len(), 4);
        assert!(scheduler.faults().is_empty());
    }

    #[test]
    fn blend_follows_masking_category() {
        let ctx = EvalContext::new(2)
            .with_contribution(0.25)
            .with_global_mask(ScalarField::new(2));
        let parse = |name: &str| NodeKind::parse(name, &Fields::new()).unwrap();

        let masked = Blend::for_node(&parse("Abs"), 0.5, &ctx);
        assert_eq!(masked.contribution, 0.25);
        assert_eq!(masked.local, 0.5);
        assert!(masked.global_mask.is_some());

        for name in ["Constant", "DeformedCircle", "RasterFromField", "VectorInput"] {
            let blend = Blend::for_node(&parse(name), 0.5, &ctx);
            assert_eq!(blend.contribution, 1.0, "{}", name);
            assert_eq!(blend.local, 1.0, "{}", name);
            assert!(blend.global_mask.is_none(), "{}", name);
        }
    }

    #[test]
    fn missing_input_schedules_nothing() {
        let graph = EvalGraph::from_raw(
            vec![node("warp", "DomainWarp", json!({}))],
            vec![],
            None,
        )
        .unwrap();
        let mut arena = BufferArena::new();
        let mut scheduler = Scheduler::new(&graph, ExternalInputs::new(), FaultLog::new());
        let incoming = JobHandle::completed();
        let (buffer, _) = scheduler.produce(
            0,
            &EvalContext::new(2),
            &mut arena,
            FieldBuffer::allocate(FieldKind::Float, 2, 0),
            &incoming,
        );
        assert_eq!(scheduler.kernels_scheduled(), 0);
        assert!(arena.is_empty());
        assert_eq!(buffer.as_scalar().unwrap().to_vec(), vec![0.0; 4]);
        let faults = scheduler.faults().snapshot();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].node, "warp");
    }

    #[test]
    fn vector_capacity_follows_upstream() {
        let graph = EvalGraph::from_raw(
            vec![
                node("poly", "Polygon", json!({"Sides": 9})),
                node("noise", "SimplexNoise", json!({})),
                node("deform", "VectorDeform", json!({})),
                node("scale", "VectorScale", json!({"Factor": 0.5})),
            ],
            vec![
                edge("poly", "deform", "Vector"),
                edge("noise", "deform", "Deformation"),
                edge("deform", "scale", "Vector"),
            ],
            Some("scale"),
        )
        .unwrap();
        let scheduler = Scheduler::new(&graph, ExternalInputs::new(), FaultLog::new());
        assert_eq!(scheduler.vector_capacity(graph.root_idx), 9);
    }

    #[test]
    fn shared_seed_shares_permutation_table() {
        let graph = EvalGraph::from_raw(
            vec![node("a", "Constant", json!({}))],
            vec![],
            None,
        )
        .unwrap();
        let mut scheduler = Scheduler::new(&graph, ExternalInputs::new(), FaultLog::new());
        let first = scheduler.perm_table(7);
        let second = scheduler.perm_table(7);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &scheduler.perm_table(8)));
    }
}
