// eval/nodes.rs - Node kinds and parameter parsing
//
// A node's `type` string and its `fields` map are parsed once, at graph
// construction, into a `NodeKind` carrying typed kernel parameters. Missing
// or malformed fields fall back to per-parameter defaults; only an unknown
// type string is an error.
//
// Each kind also declares its output shape and the input slots it reads, so
// the scheduler can check connections and port types before recursing.

use crate::eval::field::{FieldKind, RasterTexel, Rgba};
use crate::eval::kernels::{
    BinaryOp, CellFeature, CircleShape, Generator, NoiseParams, Palette, PolygonShape, UnaryOp,
};
use crate::eval::noise::OctaveParams;
use crate::eval::ports::{
    InputSlot, PortRef, ResolvedInputs, P_ALTITUDE, P_DEFORMATION, P_DISTANCE, P_FACTOR, P_INPUT,
    P_INPUT_A, P_INPUT_B, P_VECTOR, P_WARP, P_WARP_Y,
};
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;

pub type Fields = HashMap<String, Value>;

// ── Field helpers ───────────────────────────────────────────────────

pub(crate) fn field_f32(fields: &Fields, key: &str, default: f32) -> f32 {
    fields
        .get(key)
        .and_then(|v| v.as_f64())
        .map(|n| n as f32)
        .unwrap_or(default)
}

pub(crate) fn field_i32(fields: &Fields, key: &str, default: i32) -> i32 {
    fields
        .get(key)
        .and_then(|v| v.as_i64())
        .map(|n| n as i32)
        .unwrap_or(default)
}

fn field_u32(fields: &Fields, key: &str, default: u32) -> u32 {
    fields
        .get(key)
        .and_then(|v| v.as_u64())
        .map(|n| n.min(u32::MAX as u64) as u32)
        .unwrap_or(default)
}

fn field_str<'a>(fields: &'a Fields, key: &str, default: &'a str) -> &'a str {
    fields.get(key).and_then(|v| v.as_str()).unwrap_or(default)
}

/// `[r, g, b]` or `[r, g, b, a]`; alpha defaults to 1.
fn field_color(fields: &Fields, key: &str, default: Rgba) -> Rgba {
    let Some(arr) = fields.get(key).and_then(|v| v.as_array()) else {
        return default;
    };
    let channel = |i: usize, fallback: f32| {
        arr.get(i)
            .and_then(|v| v.as_f64())
            .map(|n| n as f32)
            .unwrap_or(fallback)
    };
    if arr.len() < 3 {
        return default;
    }
    [channel(0, 0.0), channel(1, 0.0), channel(2, 0.0), channel(3, 1.0)]
}

fn noise_params(fields: &Fields) -> NoiseParams {
    NoiseParams {
        frequency: field_f32(fields, "Frequency", 1.0),
        amplitude: field_f32(fields, "Amplitude", 1.0),
        seed: field_i32(fields, "Seed", 0),
    }
}

fn octave_params(fields: &Fields) -> OctaveParams {
    OctaveParams {
        octaves: field_u32(fields, "Octaves", 4).clamp(1, 16),
        lacunarity: field_f32(fields, "Lacunarity", 2.0) as f64,
        persistence: field_f32(fields, "Persistence", 0.5) as f64,
    }
}

// ── Node kinds ──────────────────────────────────────────────────────

/// Broad role of a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCategory {
    /// Establishes a signal from parameters alone.
    Generator,
    /// Transforms a single upstream field.
    Modifier,
    /// Merges several upstream fields.
    Combinator,
    /// Displaces geometry by a sampled field.
    Deformer,
    /// Threshold test producing a shape mask.
    ShapeTest,
    /// Lifts one field shape into another.
    Conversion,
    /// Reads data injected by the caller.
    IoBoundary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    Generator(Generator),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Sum,
    DomainWarp { strength: f32 },
    DeformedCircle(CircleShape),
    MaskInput,
    RasterFill(RasterTexel),
    RasterFromField(Palette),
    RasterBlend,
    RasterWarp { strength: f32 },
    VectorInput,
    Polygon(PolygonShape),
    VectorDeform { strength: f32 },
    VectorScale { factor: f32 },
}

impl NodeKind {
    /// Parse a node type and its parameter fields. `None` for unknown types.
    pub fn parse(type_name: &str, fields: &Fields) -> Option<NodeKind> {
        let kind = match type_name {
            "SimplexNoise" => NodeKind::Generator(Generator::Simplex(noise_params(fields))),
            "FractalNoise" => NodeKind::Generator(Generator::Fractal {
                noise: noise_params(fields),
                octaves: octave_params(fields),
            }),
            "CellularNoise" => NodeKind::Generator(Generator::Cellular {
                noise: noise_params(fields),
                feature: match field_str(fields, "Distance", "F1") {
                    "F2" => CellFeature::F2,
                    _ => CellFeature::F1,
                },
                jitter: field_f32(fields, "Jitter", 1.0),
            }),
            "ManhattanVoronoi" => NodeKind::Generator(Generator::ManhattanVoronoi {
                noise: noise_params(fields),
                jitter: field_f32(fields, "Jitter", 1.0),
            }),
            "SteppedNoise" => NodeKind::Generator(Generator::Stepped {
                noise: noise_params(fields),
                steps: field_u32(fields, "Steps", 4),
            }),
            "CellularFractal" => NodeKind::Generator(Generator::CellularFractal {
                noise: noise_params(fields),
                octaves: octave_params(fields),
                jitter: field_f32(fields, "Jitter", 1.0),
            }),
            "Constant" => NodeKind::Generator(Generator::Constant(field_f32(fields, "Value", 0.0))),
            "RadialDistance" => NodeKind::Generator(Generator::RadialDistance {
                center: (
                    field_f32(fields, "CenterX", 0.5),
                    field_f32(fields, "CenterY", 0.5),
                ),
            }),

            "Abs" => NodeKind::Unary(UnaryOp::Abs),
            "Invert" => NodeKind::Unary(UnaryOp::Invert),
            "Scale" => NodeKind::Unary(UnaryOp::Scale(field_f32(fields, "Factor", 1.0))),
            "Clamp" => NodeKind::Unary(UnaryOp::Clamp {
                min: field_f32(fields, "Min", -1.0),
                max: field_f32(fields, "Max", 1.0),
            }),
            "DomainWarp" => NodeKind::DomainWarp {
                strength: field_f32(fields, "Strength", 0.1),
            },

            "Add" => NodeKind::Binary(BinaryOp::Add),
            "Subtract" => NodeKind::Binary(BinaryOp::Subtract),
            "Multiply" => NodeKind::Binary(BinaryOp::Multiply),
            "Min" => NodeKind::Binary(BinaryOp::Min),
            "Max" => NodeKind::Binary(BinaryOp::Max),
            "Sum" => NodeKind::Sum,

            "DeformedCircle" => NodeKind::DeformedCircle(CircleShape {
                radius: field_f32(fields, "Radius", 0.5),
                strength: field_f32(fields, "Strength", 0.1),
                falloff: field_f32(fields, "Falloff", 0.05),
            }),
            "MaskInput" => NodeKind::MaskInput,

            "RasterFill" => NodeKind::RasterFill(RasterTexel {
                scalar: field_f32(fields, "Scalar", 0.0),
                altitude: field_f32(fields, "Altitude", 0.0),
                angle: field_f32(fields, "Angle", 0.0),
                color: field_color(fields, "Color", [0.0, 0.0, 0.0, 1.0]),
            }),
            "RasterFromField" => NodeKind::RasterFromField(Palette {
                low: field_color(fields, "LowColor", [0.0, 0.0, 0.0, 1.0]),
                high: field_color(fields, "HighColor", [1.0, 1.0, 1.0, 1.0]),
            }),
            "RasterBlend" => NodeKind::RasterBlend,
            "RasterWarp" => NodeKind::RasterWarp {
                strength: field_f32(fields, "Strength", 0.1),
            },

            "VectorInput" => NodeKind::VectorInput,
            "Polygon" => NodeKind::Polygon(PolygonShape {
                sides: field_u32(fields, "Sides", 6).max(3),
                radius: field_f32(fields, "Radius", 0.5).clamp(0.0, 1.0),
                rotation: field_f32(fields, "Rotation", 0.0),
            }),
            "VectorDeform" => NodeKind::VectorDeform {
                strength: field_f32(fields, "Strength", 0.1),
            },
            "VectorScale" => NodeKind::VectorScale {
                factor: field_f32(fields, "Factor", 1.0),
            },

            _ => return None,
        };
        Some(kind)
    }

    pub fn category(&self) -> NodeCategory {
        match self {
            NodeKind::Generator(_) | NodeKind::RasterFill(_) | NodeKind::Polygon(_) => {
                NodeCategory::Generator
            }
            NodeKind::Unary(_)
            | NodeKind::DomainWarp { .. }
            | NodeKind::RasterWarp { .. }
            | NodeKind::VectorScale { .. } => NodeCategory::Modifier,
            NodeKind::Binary(_) | NodeKind::Sum | NodeKind::RasterBlend => NodeCategory::Combinator,
            NodeKind::VectorDeform { .. } => NodeCategory::Deformer,
            NodeKind::DeformedCircle(_) => NodeCategory::ShapeTest,
            NodeKind::RasterFromField(_) => NodeCategory::Conversion,
            NodeKind::MaskInput | NodeKind::VectorInput => NodeCategory::IoBoundary,
        }
    }

    /// Whether the kernel blends its result with the effective contribution.
    pub fn is_masked(&self) -> bool {
        matches!(
            self.category(),
            NodeCategory::Modifier | NodeCategory::Combinator | NodeCategory::Deformer
        )
    }

    pub fn output_kind(&self) -> FieldKind {
        match self {
            NodeKind::RasterFill(_)
            | NodeKind::RasterFromField(_)
            | NodeKind::RasterBlend
            | NodeKind::RasterWarp { .. } => FieldKind::Raster,
            NodeKind::VectorInput
            | NodeKind::Polygon(_)
            | NodeKind::VectorDeform { .. }
            | NodeKind::VectorScale { .. } => FieldKind::Vector,
            _ => FieldKind::Float,
        }
    }

    /// Input slots this node reads, in evaluation order.
    ///
    /// `Sum` declares one slot per connected array input and at least two, so
    /// a sum with a single connection reports the missing `Inputs[1]`.
    pub fn input_slots(&self, inputs: &ResolvedInputs) -> SmallVec<[InputSlot; 4]> {
        use FieldKind::{Float, Raster, Vector};
        let slots: &[InputSlot] = match self {
            NodeKind::Generator(_)
            | NodeKind::RasterFill(_)
            | NodeKind::Polygon(_)
            | NodeKind::MaskInput
            | NodeKind::VectorInput => &[],
            NodeKind::Unary(_) => &[InputSlot::required(P_INPUT, Float)],
            NodeKind::Binary(_) => &[
                InputSlot::required(P_INPUT_A, Float),
                InputSlot::required(P_INPUT_B, Float),
            ],
            NodeKind::Sum => {
                let n = inputs.array_inputs.len().max(2);
                return (0..n)
                    .map(|i| InputSlot {
                        port: PortRef::Array(i),
                        kind: Float,
                        required: true,
                    })
                    .collect();
            }
            NodeKind::DomainWarp { .. } => &[
                InputSlot::required(P_INPUT, Float),
                InputSlot::required(P_WARP, Float),
                InputSlot::optional(P_WARP_Y, Float),
            ],
            NodeKind::DeformedCircle(_) => &[
                InputSlot::required(P_DISTANCE, Float),
                InputSlot::required(P_DEFORMATION, Float),
            ],
            NodeKind::RasterFromField(_) => &[
                InputSlot::required(P_INPUT, Float),
                InputSlot::optional(P_ALTITUDE, Float),
            ],
            NodeKind::RasterBlend => &[
                InputSlot::required(P_INPUT_A, Raster),
                InputSlot::required(P_INPUT_B, Raster),
                InputSlot::required(P_FACTOR, Float),
            ],
            NodeKind::RasterWarp { .. } => &[
                InputSlot::required(P_INPUT, Raster),
                InputSlot::required(P_WARP, Float),
                InputSlot::optional(P_WARP_Y, Float),
            ],
            NodeKind::VectorDeform { .. } => &[
                InputSlot::required(P_VECTOR, Vector),
                InputSlot::required(P_DEFORMATION, Float),
            ],
            NodeKind::VectorScale { .. } => &[InputSlot::required(P_VECTOR, Vector)],
        };
        SmallVec::from_slice(slots)
    }

    /// Whether an edge may connect to `port`. Only `Sum` takes array ports.
    pub fn accepts_port(&self, port: PortRef) -> bool {
        match port {
            PortRef::Array(_) => matches!(self, NodeKind::Sum),
            PortRef::Named(_) => self
                .input_slots(&ResolvedInputs::new())
                .iter()
                .any(|slot| slot.port == port),
        }
    }

    pub fn needs_vector_input(&self) -> bool {
        matches!(self, NodeKind::VectorInput)
    }

    pub fn needs_mask_input(&self) -> bool {
        matches!(self, NodeKind::MaskInput)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Fields {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn parses_noise_parameters() {
        let f = fields(json!({"Frequency": 4.0, "Amplitude": 0.5, "Seed": 12}));
        let kind = NodeKind::parse("SimplexNoise", &f).unwrap();
        assert_eq!(
            kind,
            NodeKind::Generator(Generator::Simplex(NoiseParams {
                frequency: 4.0,
                amplitude: 0.5,
                seed: 12,
            }))
        );
        assert_eq!(kind.output_kind(), FieldKind::Float);
        assert!(!kind.is_masked());
    }

    #[test]
    fn missing_fields_use_defaults() {
        let kind = NodeKind::parse("Clamp", &Fields::new()).unwrap();
        assert_eq!(kind, NodeKind::Unary(UnaryOp::Clamp { min: -1.0, max: 1.0 }));
        let kind = NodeKind::parse("Polygon", &fields(json!({"Sides": 1}))).unwrap();
        match kind {
            NodeKind::Polygon(shape) => assert_eq!(shape.sides, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(NodeKind::parse("Teapot", &Fields::new()).is_none());
    }

    #[test]
    fn colors_accept_rgb_and_rgba() {
        let f = fields(json!({"LowColor": [0.1, 0.2, 0.3], "HighColor": [1, 0, 0, 0.5]}));
        match NodeKind::parse("RasterFromField", &f).unwrap() {
            NodeKind::RasterFromField(p) => {
                assert_eq!(p.low, [0.1, 0.2, 0.3, 1.0]);
                assert_eq!(p.high, [1.0, 0.0, 0.0, 0.5]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn categories_drive_masking() {
        let empty = Fields::new();
        for name in ["Abs", "Add", "Sum", "DomainWarp", "RasterBlend", "VectorDeform"] {
            assert!(NodeKind::parse(name, &empty).unwrap().is_masked(), "{}", name);
        }
        for name in ["Constant", "DeformedCircle", "RasterFromField", "MaskInput", "Polygon"] {
            assert!(!NodeKind::parse(name, &empty).unwrap().is_masked(), "{}", name);
        }
    }

    #[test]
    fn ports_accepted_per_kind() {
        let parse = |name: &str| NodeKind::parse(name, &Fields::new()).unwrap();
        assert!(parse("DomainWarp").accepts_port(PortRef::Named(P_WARP_Y)));
        assert!(parse("Sum").accepts_port(PortRef::Array(7)));
        assert!(!parse("Sum").accepts_port(PortRef::Named(P_INPUT)));
        assert!(!parse("Abs").accepts_port(PortRef::Array(0)));
        assert!(!parse("Constant").accepts_port(PortRef::Named(P_FACTOR)));
        assert!(!parse("RasterBlend").accepts_port(PortRef::Named(P_INPUT)));
    }

    #[test]
    fn sum_declares_at_least_two_slots() {
        let ri = ResolvedInputs::new();
        let slots = NodeKind::Sum.input_slots(&ri);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[1].port, PortRef::Array(1));

        let mut ri = ResolvedInputs::new();
        ri.array_inputs.extend([0, 1, 2]);
        assert_eq!(NodeKind::Sum.input_slots(&ri).len(), 3);
    }

    #[test]
    fn raster_blend_port_types() {
        let slots = NodeKind::RasterBlend.input_slots(&ResolvedInputs::new());
        let kinds: Vec<FieldKind> = slots.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![FieldKind::Raster, FieldKind::Raster, FieldKind::Float]);
        assert_eq!(NodeKind::RasterBlend.output_kind(), FieldKind::Raster);
    }
}
