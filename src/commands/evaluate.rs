// commands/evaluate.rs - JSON request → one evaluation pass → JSON response
//
// The request carries the React Flow graph plus pass settings and optional
// injected inputs. Malformed requests are reported as `Err(String)`; node
// faults during the pass are returned inside the response.

use crate::eval::field::{PolarVertex, Polyline, RasterChannels, Rgba};
use crate::eval::graph::{EvalGraph, GraphEdge, GraphNode};
use crate::eval::grid::{evaluate, EvalOutput, GridResult, PassStats};
use crate::eval::{EvalContext, ExternalInputs, FieldBuffer, ScalarField, VectorField};
use serde::{Deserialize, Serialize};

fn default_contribution() -> f32 {
    1.0
}

/// A row-major scalar field supplied by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldPayload {
    pub resolution: u32,
    pub values: Vec<f32>,
}

/// A polyline supplied by the caller as `[angle, radius]` pairs.
#[derive(Debug, Clone, Deserialize)]
pub struct PolylinePayload {
    pub vertices: Vec<[f32; 2]>,
    /// Per-vertex deformation weights, parallel to `vertices`.
    #[serde(default)]
    pub weights: Option<Vec<f32>>,
    /// Per-vertex RGBA colors, parallel to `vertices`.
    #[serde(default)]
    pub colors: Option<Vec<Rgba>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluateRequest {
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    /// Node to evaluate; falls back to `_outputNode`, then a terminal node.
    #[serde(default)]
    pub output_node_id: Option<String>,
    /// Grid resolution (e.g., 128 for 128x128)
    pub resolution: u32,
    #[serde(default)]
    pub seed: i32,
    #[serde(default = "default_contribution")]
    pub contribution: f32,
    /// Replaces `contribution` per element when present.
    #[serde(default)]
    pub global_mask: Option<FieldPayload>,
    #[serde(default)]
    pub vector_input: Option<PolylinePayload>,
    #[serde(default)]
    pub mask_input: Option<FieldPayload>,
}

/// The terminal buffer of a pass, by shape.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum OutputPayload {
    Float(GridResult),
    Raster {
        resolution: u32,
        scalar: Vec<f32>,
        altitude: Vec<f32>,
        angle: Vec<f32>,
        color: Vec<Rgba>,
    },
    Vector {
        /// In-use vertices as `[angle, radius]`.
        vertices: Vec<[f32; 2]>,
        capacity: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        weights: Option<Vec<f32>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        colors: Option<Vec<Rgba>>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateResponse {
    pub output: OutputPayload,
    /// One message per degraded node.
    pub faults: Vec<String>,
    pub stats: PassStats,
}

fn scalar_field(payload: FieldPayload) -> Result<ScalarField, String> {
    ScalarField::from_values(payload.resolution, payload.values).map_err(|e| e.to_string())
}

fn polyline(payload: PolylinePayload) -> Result<Polyline, String> {
    let vertices = payload
        .vertices
        .iter()
        .map(|&[angle, radius]| PolarVertex::new(angle, radius))
        .collect();
    let mut polyline = Polyline::from_vertices(vertices);
    if let Some(weights) = payload.weights {
        polyline.set_weights(weights).map_err(|e| e.to_string())?;
    }
    if let Some(colors) = payload.colors {
        polyline.set_colors(colors).map_err(|e| e.to_string())?;
    }
    Ok(polyline)
}

fn output_payload(buffer: &FieldBuffer) -> OutputPayload {
    match buffer {
        FieldBuffer::Scalar(field) => OutputPayload::Float(GridResult::from_field(field)),
        FieldBuffer::Raster(field) => {
            let RasterChannels {
                scalar,
                altitude,
                angle,
                color,
            } = field.snapshot();
            OutputPayload::Raster {
                resolution: field.resolution(),
                scalar,
                altitude,
                angle,
                color,
            }
        }
        FieldBuffer::Vector(field) => {
            let polyline = field.read();
            OutputPayload::Vector {
                vertices: polyline
                    .vertices()
                    .iter()
                    .map(|v| [v.angle, v.radius])
                    .collect(),
                capacity: polyline.capacity(),
                weights: polyline.weights().map(<[f32]>::to_vec),
                colors: polyline.colors().map(<[Rgba]>::to_vec),
            }
        }
    }
}

/// Parse, validate and evaluate one request.
pub fn evaluate_request(request: EvaluateRequest) -> Result<EvaluateResponse, String> {
    if request.resolution == 0 {
        return Err("resolution must be at least 1".into());
    }

    let graph = EvalGraph::from_raw(
        request.nodes,
        request.edges,
        request.output_node_id.as_deref(),
    )
    .map_err(|e| format!("Graph error: {}", e))?;

    let mut ctx = EvalContext::new(request.resolution)
        .with_seed(request.seed)
        .with_contribution(request.contribution);
    if let Some(mask) = request.global_mask {
        ctx = ctx.with_global_mask(scalar_field(mask)?);
    }

    let mut inputs = ExternalInputs::new();
    if let Some(payload) = request.vector_input {
        inputs.set_vector_input(VectorField::from_polyline(polyline(payload)?));
    }
    if let Some(payload) = request.mask_input {
        let resolution = payload.resolution;
        inputs
            .set_mask_input(scalar_field(payload)?, resolution)
            .map_err(|e| e.to_string())?;
    }

    let required = graph.requires_external_inputs(graph.root_idx);
    if !inputs.has_required_inputs(required.vector, required.mask) {
        return Err(format!(
            "graph reads injected inputs that were not supplied (vector: {}, mask: {})",
            required.vector, required.mask
        ));
    }

    let EvalOutput {
        buffer,
        faults,
        stats,
    } = evaluate(&graph, graph.root_idx, &ctx, inputs);

    Ok(EvaluateResponse {
        output: output_payload(&buffer),
        faults: faults.iter().map(ToString::to_string).collect(),
        stats,
    })
}
