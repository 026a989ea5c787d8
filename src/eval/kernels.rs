// eval/kernels.rs - Pure per-element transformations
//
// Each kernel computes one output element from its index plus read-only
// inputs, with no state shared between elements. Work is partitioned across
// the rayon pool with `par_iter_mut().enumerate()`, so any decomposition
// gives the same result.
//
// Inputs are length-checked on entry. A mismatch returns `BufferMismatch`
// before anything is written: the output keeps its zero-initialized contents
// and the caller records the fault.
//
// Modifier, combinator and deformer kernels take a `Contribution` and blend
// their raw result back toward the unmodified input with it. Generators
// establish the base signal and are never blended.

use crate::eval::field::{
    texel_count, wrap_angle, PolarVertex, Polyline, RasterChannels, RasterTexel, Rgba,
};
use crate::eval::noise::{self, CellMetric, OctaveParams};
use crate::eval::sample::{sample_bilinear, smoothstep, texel_uv, Contribution, Lerp};
use rayon::prelude::*;
use std::f32::consts::TAU;
use std::fmt;

/// An input whose length does not match what the kernel was asked to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferMismatch {
    pub input: &'static str,
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for BufferMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` holds {} elements, expected {}",
            self.input, self.actual, self.expected
        )
    }
}

pub type KernelResult = Result<(), BufferMismatch>;

fn check(input: &'static str, actual: usize, expected: usize) -> KernelResult {
    if actual == expected {
        Ok(())
    } else {
        Err(BufferMismatch {
            input,
            expected,
            actual,
        })
    }
}

fn check_raster(input: &'static str, channels: &RasterChannels, expected: usize) -> KernelResult {
    match channels.len() {
        Some(n) => check(input, n, expected),
        None => Err(BufferMismatch {
            input,
            expected,
            actual: channels.scalar.len(),
        }),
    }
}

// Shared with the scheduler so generators without a permutation table can
// still be called through one signature.
pub static EMPTY_PERM: [u8; 512] = [0; 512];

// ── Generators ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseParams {
    pub frequency: f32,
    pub amplitude: f32,
    /// Local seed; the pass seed is added before sampling.
    pub seed: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellFeature {
    F1,
    F2,
}

/// Scalar generators. Pure functions of position, parameters and seed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Generator {
    Simplex(NoiseParams),
    Fractal {
        noise: NoiseParams,
        octaves: OctaveParams,
    },
    Cellular {
        noise: NoiseParams,
        feature: CellFeature,
        jitter: f32,
    },
    ManhattanVoronoi {
        noise: NoiseParams,
        jitter: f32,
    },
    Stepped {
        noise: NoiseParams,
        steps: u32,
    },
    CellularFractal {
        noise: NoiseParams,
        octaves: OctaveParams,
        jitter: f32,
    },
    Constant(f32),
    /// Distance from `center` in UV space, scaled so edge midpoints of a
    /// centered field sit at 1.
    RadialDistance {
        center: (f32, f32),
    },
}

impl Generator {
    fn noise(&self) -> Option<&NoiseParams> {
        match self {
            Generator::Simplex(n)
            | Generator::Fractal { noise: n, .. }
            | Generator::Cellular { noise: n, .. }
            | Generator::ManhattanVoronoi { noise: n, .. }
            | Generator::Stepped { noise: n, .. }
            | Generator::CellularFractal { noise: n, .. } => Some(n),
            Generator::Constant(_) | Generator::RadialDistance { .. } => None,
        }
    }

    /// The generator's own seed, if it is seeded at all.
    pub fn local_seed(&self) -> Option<i32> {
        self.noise().map(|n| n.seed)
    }

    /// True when sampling needs a permutation table for the effective seed.
    pub fn uses_permutation(&self) -> bool {
        matches!(
            self,
            Generator::Simplex(_) | Generator::Fractal { .. } | Generator::Stepped { .. }
        )
    }

    /// Value at `(u, v)` given the effective seed and its permutation table.
    pub fn sample(&self, perm: &[u8; 512], seed: i32, u: f32, v: f32) -> f32 {
        let (x, y) = (u as f64, v as f64);
        match *self {
            Generator::Simplex(n) => {
                let f = n.frequency as f64;
                noise::simplex_2d(perm, x * f, y * f).clamp(-1.0, 1.0) as f32 * n.amplitude
            }
            Generator::Fractal { noise: n, octaves } => {
                noise::fbm_2d(perm, x, y, n.frequency as f64, octaves).clamp(-1.0, 1.0) as f32
                    * n.amplitude
            }
            Generator::Cellular {
                noise: n,
                feature,
                jitter,
            } => {
                let f = n.frequency as f64;
                let j = jitter as f64;
                let d = noise::cellular_2d(x * f, y * f, seed, CellMetric::Euclidean, j);
                let d = match feature {
                    CellFeature::F1 => d.f1,
                    CellFeature::F2 => d.f2,
                };
                noise::cell_to_signed(d) as f32 * n.amplitude
            }
            Generator::ManhattanVoronoi { noise: n, jitter } => {
                let f = n.frequency as f64;
                let j = jitter as f64;
                let d = noise::cellular_2d(x * f, y * f, seed, CellMetric::Manhattan, j);
                noise::cell_to_signed(d.f1) as f32 * n.amplitude
            }
            Generator::Stepped { noise: n, steps } => {
                let f = n.frequency as f64;
                let raw = noise::simplex_2d(perm, x * f, y * f).clamp(-1.0, 1.0);
                noise::quantize(raw, steps) as f32 * n.amplitude
            }
            Generator::CellularFractal {
                noise: n,
                octaves,
                jitter,
            } => {
                noise::cellular_fbm_2d(x, y, n.frequency as f64, octaves, seed, jitter as f64)
                    .clamp(-1.0, 1.0) as f32
                    * n.amplitude
            }
            Generator::Constant(value) => value,
            Generator::RadialDistance { center } => {
                let dx = u - center.0;
                let dy = v - center.1;
                (dx * dx + dy * dy).sqrt() * 2.0
            }
        }
    }
}

/// Fill `out` from a generator. Not blended with any contribution.
pub fn generate(
    out: &mut [f32],
    resolution: u32,
    generator: &Generator,
    seed: i32,
    perm: &[u8; 512],
) -> KernelResult {
    check("output", out.len(), texel_count(resolution))?;
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        let (u, v) = texel_uv(i, resolution);
        *o = generator.sample(perm, seed, u, v);
    });
    Ok(())
}

// ── Scalar modifiers and combinators ────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Abs,
    Invert,
    Scale(f32),
    Clamp { min: f32, max: f32 },
}

impl UnaryOp {
    #[inline]
    pub fn apply(self, x: f32) -> f32 {
        match self {
            UnaryOp::Abs => x.abs(),
            UnaryOp::Invert => 1.0 - x,
            UnaryOp::Scale(factor) => x * factor,
            UnaryOp::Clamp { min, max } => x.max(min).min(max),
        }
    }
}

pub fn unary(
    out: &mut [f32],
    input: &[f32],
    resolution: u32,
    op: UnaryOp,
    contribution: &Contribution<'_>,
) -> KernelResult {
    let n = texel_count(resolution);
    check("output", out.len(), n)?;
    check("Input", input.len(), n)?;
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        let x = input[i];
        *o = contribution.apply(x, op.apply(x), i, resolution);
    });
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Min,
    Max,
}

impl BinaryOp {
    #[inline]
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Min => a.min(b),
            BinaryOp::Max => a.max(b),
        }
    }
}

/// `out[i] = op(a[i], b[i])`, blended toward `a`.
pub fn binary(
    out: &mut [f32],
    a: &[f32],
    b: &[f32],
    resolution: u32,
    op: BinaryOp,
    contribution: &Contribution<'_>,
) -> KernelResult {
    let n = texel_count(resolution);
    check("output", out.len(), n)?;
    check("InputA", a.len(), n)?;
    check("InputB", b.len(), n)?;
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        *o = contribution.apply(a[i], op.apply(a[i], b[i]), i, resolution);
    });
    Ok(())
}

/// Sum of every input, blended toward the first.
pub fn sum(
    out: &mut [f32],
    inputs: &[&[f32]],
    resolution: u32,
    contribution: &Contribution<'_>,
) -> KernelResult {
    let n = texel_count(resolution);
    check("output", out.len(), n)?;
    for input in inputs {
        check("Inputs", input.len(), n)?;
    }
    let Some(first) = inputs.first() else {
        return Ok(());
    };
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        let total: f32 = inputs.iter().map(|input| input[i]).sum();
        *o = contribution.apply(first[i], total, i, resolution);
    });
    Ok(())
}

// ── Domain warp ─────────────────────────────────────────────────────

/// Displaced UV for texel `i`: the texel center moved by the warp values
/// times `strength`. `warp_y` falls back to `warp_x`.
#[inline]
fn warped_uv(
    i: usize,
    resolution: u32,
    warp_x: &[f32],
    warp_y: Option<&[f32]>,
    strength: f32,
) -> (f32, f32) {
    let (u, v) = texel_uv(i, resolution);
    let wx = warp_x[i];
    let wy = warp_y.map_or(wx, |w| w[i]);
    (u + wx * strength, v + wy * strength)
}

/// Resample `source` at warped positions, clamped to the field bounds.
pub fn domain_warp(
    out: &mut [f32],
    source: &[f32],
    warp_x: &[f32],
    warp_y: Option<&[f32]>,
    resolution: u32,
    strength: f32,
    contribution: &Contribution<'_>,
) -> KernelResult {
    let n = texel_count(resolution);
    check("output", out.len(), n)?;
    check("Input", source.len(), n)?;
    check("Warp", warp_x.len(), n)?;
    if let Some(wy) = warp_y {
        check("WarpY", wy.len(), n)?;
    }
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        let (u, v) = warped_uv(i, resolution, warp_x, warp_y, strength);
        let raw = sample_bilinear(source, resolution, u, v).unwrap_or(source[i]);
        *o = contribution.apply(source[i], raw, i, resolution);
    });
    Ok(())
}

// ── Shape tests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleShape {
    pub radius: f32,
    /// Scale applied to the deformation field before it moves the edge.
    pub strength: f32,
    /// Width of the smooth band straddling the threshold.
    pub falloff: f32,
}

/// 1 inside a noise-deformed circle, 0 outside, smooth across the band.
pub fn deformed_circle(
    out: &mut [f32],
    distance: &[f32],
    deformation: &[f32],
    resolution: u32,
    shape: CircleShape,
) -> KernelResult {
    let n = texel_count(resolution);
    check("output", out.len(), n)?;
    check("Distance", distance.len(), n)?;
    check("Deformation", deformation.len(), n)?;
    let half = shape.falloff.max(0.0) * 0.5;
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        let threshold = shape.radius + deformation[i] * shape.strength;
        *o = 1.0 - smoothstep(threshold - half, threshold + half, distance[i]);
    });
    Ok(())
}

// ── IO boundary ─────────────────────────────────────────────────────

/// Copy an externally supplied field, resampling when resolutions differ.
pub fn resample(
    out: &mut [f32],
    resolution: u32,
    source: &[f32],
    source_resolution: u32,
) -> KernelResult {
    check("output", out.len(), texel_count(resolution))?;
    check("mask", source.len(), texel_count(source_resolution))?;
    if source_resolution == resolution {
        out.copy_from_slice(source);
        return Ok(());
    }
    out.par_iter_mut().enumerate().for_each(|(i, o)| {
        let (u, v) = texel_uv(i, resolution);
        *o = sample_bilinear(source, source_resolution, u, v).unwrap_or(0.0);
    });
    Ok(())
}

// ── Raster kernels ──────────────────────────────────────────────────

fn write_texels(out: &mut RasterChannels, f: impl Fn(usize) -> RasterTexel + Sync) {
    let RasterChannels {
        scalar,
        altitude,
        angle,
        color,
    } = out;
    scalar
        .par_iter_mut()
        .zip(altitude.par_iter_mut())
        .zip(angle.par_iter_mut())
        .zip(color.par_iter_mut())
        .enumerate()
        .for_each(|(i, (((s, a), g), c))| {
            let texel = f(i);
            *s = texel.scalar;
            *a = texel.altitude;
            *g = texel.angle;
            *c = texel.color;
        });
}

fn sample_raster(source: &RasterChannels, resolution: u32, u: f32, v: f32) -> Option<RasterTexel> {
    Some(RasterTexel {
        scalar: sample_bilinear(&source.scalar, resolution, u, v)?,
        altitude: sample_bilinear(&source.altitude, resolution, u, v)?,
        angle: sample_bilinear(&source.angle, resolution, u, v)?,
        color: sample_bilinear(&source.color, resolution, u, v)?,
    })
}

pub fn raster_fill(out: &mut RasterChannels, resolution: u32, texel: RasterTexel) -> KernelResult {
    check_raster("output", out, texel_count(resolution))?;
    write_texels(out, |_| texel);
    Ok(())
}

/// Color ramp used when a scalar field is lifted into a raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub low: Rgba,
    pub high: Rgba,
}

/// Build a raster from a scalar field.
///
/// Altitude comes from `altitude` (or the scalar itself), angle is the
/// downhill-facing slope direction from central differences of altitude
/// (one-sided at the borders), and color ramps from `low` to `high` by the
/// scalar clamped to [0, 1].
pub fn raster_from_field(
    out: &mut RasterChannels,
    scalar: &[f32],
    altitude: Option<&[f32]>,
    resolution: u32,
    palette: Palette,
) -> KernelResult {
    let n = texel_count(resolution);
    check_raster("output", out, n)?;
    check("Input", scalar.len(), n)?;
    if let Some(alt) = altitude {
        check("Altitude", alt.len(), n)?;
    }
    let alt = altitude.unwrap_or(scalar);
    let side = resolution as usize;
    write_texels(out, |i| {
        let x = i % side;
        let y = i / side;
        let left = alt[y * side + x.saturating_sub(1)];
        let right = alt[y * side + (x + 1).min(side - 1)];
        let up = alt[y.saturating_sub(1) * side + x];
        let down = alt[(y + 1).min(side - 1) * side + x];
        let s = scalar[i];
        RasterTexel {
            scalar: s,
            altitude: alt[i],
            angle: (down - up).atan2(right - left),
            color: <Rgba as Lerp>::lerp(palette.low, palette.high, s.clamp(0.0, 1.0)),
        }
    });
    Ok(())
}

/// Per-texel blend of two rasters by a factor field, blended toward `a`.
pub fn raster_blend(
    out: &mut RasterChannels,
    a: &RasterChannels,
    b: &RasterChannels,
    factor: &[f32],
    resolution: u32,
    contribution: &Contribution<'_>,
) -> KernelResult {
    let n = texel_count(resolution);
    check_raster("output", out, n)?;
    check_raster("InputA", a, n)?;
    check_raster("InputB", b, n)?;
    check("Factor", factor.len(), n)?;
    write_texels(out, |i| {
        let ta = a.texel(i).unwrap_or_default();
        let tb = b.texel(i).unwrap_or_default();
        let mixed = RasterTexel::lerp(ta, tb, factor[i].clamp(0.0, 1.0));
        contribution.apply(ta, mixed, i, resolution)
    });
    Ok(())
}

/// Domain warp applied to all four raster channels.
pub fn raster_warp(
    out: &mut RasterChannels,
    source: &RasterChannels,
    warp_x: &[f32],
    warp_y: Option<&[f32]>,
    resolution: u32,
    strength: f32,
    contribution: &Contribution<'_>,
) -> KernelResult {
    let n = texel_count(resolution);
    check_raster("output", out, n)?;
    check_raster("Input", source, n)?;
    check("Warp", warp_x.len(), n)?;
    if let Some(wy) = warp_y {
        check("WarpY", wy.len(), n)?;
    }
    write_texels(out, |i| {
        let original = source.texel(i).unwrap_or_default();
        let (u, v) = warped_uv(i, resolution, warp_x, warp_y, strength);
        let raw = sample_raster(source, resolution, u, v).unwrap_or(original);
        contribution.apply(original, raw, i, resolution)
    });
    Ok(())
}

// ── Polyline kernels ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolygonShape {
    pub sides: u32,
    pub radius: f32,
    /// Angle of the first vertex, radians.
    pub rotation: f32,
}

/// Regular polygon, truncated to the output capacity.
pub fn polygon(out: &mut Polyline, shape: PolygonShape) {
    let sides = shape.sides.max(1);
    let count = (sides as usize).min(out.capacity());
    // Only fails when count > capacity, which the min above rules out.
    if out.set_count(count).is_err() {
        return;
    }
    out.vertices_mut()
        .par_iter_mut()
        .enumerate()
        .for_each(|(k, vertex)| {
            let angle = wrap_angle(shape.rotation + TAU * k as f32 / sides as f32);
            *vertex = PolarVertex::new(angle, shape.radius);
        });
}

/// Radius deformation by a sampled field.
///
/// Each vertex maps to UV space, samples `deformation` bilinearly, offsets its
/// radius by sample × strength × weight (weight 1 without a weight array),
/// clamps to [0, 1], and blends with the original radius by the contribution
/// at that UV.
pub fn vector_deform(
    out: &mut Polyline,
    input: &Polyline,
    deformation: &[f32],
    resolution: u32,
    strength: f32,
    contribution: &Contribution<'_>,
) -> KernelResult {
    check("Deformation", deformation.len(), texel_count(resolution))?;
    out.copy_from(input);
    let (vertices, weights) = out.split_mut();
    vertices.par_iter_mut().enumerate().for_each(|(i, vertex)| {
        let (u, v) = vertex.to_uv();
        let d = sample_bilinear(deformation, resolution, u, v).unwrap_or(0.0);
        let w = weights.map_or(1.0, |w| w[i]);
        let deformed = (vertex.radius + d * strength * w).clamp(0.0, 1.0);
        vertex.radius = <f32 as Lerp>::lerp(vertex.radius, deformed, contribution.at_uv(u, v));
    });
    Ok(())
}

/// Uniform radius scale, blended per vertex like `vector_deform`.
pub fn vector_scale(
    out: &mut Polyline,
    input: &Polyline,
    factor: f32,
    contribution: &Contribution<'_>,
) {
    out.copy_from(input);
    let (vertices, _) = out.split_mut();
    vertices.par_iter_mut().for_each(|vertex| {
        let (u, v) = vertex.to_uv();
        let scaled = (vertex.radius * factor).clamp(0.0, 1.0);
        vertex.radius = <f32 as Lerp>::lerp(vertex.radius, scaled, contribution.at_uv(u, v));
    });
}
