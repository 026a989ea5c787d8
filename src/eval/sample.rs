// eval/sample.rs - Texel addressing, bilinear resampling and blending
//
// Texel (x, y) of a resolution-N field has its center at
// uv = ((x + 0.5) / N, (y + 0.5) / N). Sampling exactly at a center returns
// the stored value unchanged; sampling outside [0, 1]² clamps to the border.

use crate::eval::field::{texel_count, RasterTexel, Rgba};

/// Linear interpolation written so that t = 0 returns `a` and t = 1 returns
/// `b` bit-for-bit.
pub trait Lerp: Copy {
    fn lerp(a: Self, b: Self, t: f32) -> Self;
}

impl Lerp for f32 {
    #[inline]
    fn lerp(a: f32, b: f32, t: f32) -> f32 {
        a * (1.0 - t) + b * t
    }
}

impl Lerp for Rgba {
    #[inline]
    fn lerp(a: Rgba, b: Rgba, t: f32) -> Rgba {
        [
            <f32 as Lerp>::lerp(a[0], b[0], t),
            <f32 as Lerp>::lerp(a[1], b[1], t),
            <f32 as Lerp>::lerp(a[2], b[2], t),
            <f32 as Lerp>::lerp(a[3], b[3], t),
        ]
    }
}

impl Lerp for RasterTexel {
    #[inline]
    fn lerp(a: RasterTexel, b: RasterTexel, t: f32) -> RasterTexel {
        RasterTexel {
            scalar: <f32 as Lerp>::lerp(a.scalar, b.scalar, t),
            altitude: <f32 as Lerp>::lerp(a.altitude, b.altitude, t),
            angle: <f32 as Lerp>::lerp(a.angle, b.angle, t),
            color: <Rgba as Lerp>::lerp(a.color, b.color, t),
        }
    }
}

/// UV of the center of texel `index` in a row-major field.
#[inline]
pub fn texel_uv(index: usize, resolution: u32) -> (f32, f32) {
    let n = resolution.max(1) as usize;
    let x = index % n;
    let y = index / n;
    let n = n as f32;
    ((x as f32 + 0.5) / n, (y as f32 + 0.5) / n)
}

/// Bilinearly sample `values` at `(u, v)`, clamped to the field bounds.
///
/// Returns `None` when `values` is not a resolution² field.
pub fn sample_bilinear<T: Lerp>(values: &[T], resolution: u32, u: f32, v: f32) -> Option<T> {
    if resolution == 0 || values.len() != texel_count(resolution) {
        return None;
    }
    let n = resolution as usize;
    let max = (n - 1) as f32;

    let px = texel_coord(u, n, max);
    let py = texel_coord(v, n, max);

    let x0 = px.floor() as usize;
    let y0 = py.floor() as usize;
    let x1 = (x0 + 1).min(n - 1);
    let y1 = (y0 + 1).min(n - 1);
    let fx = px - x0 as f32;
    let fy = py - y0 as f32;

    let top = T::lerp(values[y0 * n + x0], values[y0 * n + x1], fx);
    let bottom = T::lerp(values[y1 * n + x0], values[y1 * n + x1], fx);
    Some(T::lerp(top, bottom, fy))
}

/// Continuous texel coordinate for a UV component, clamped to the grid.
/// Coordinates within rounding distance of a texel center snap onto it.
#[inline]
fn texel_coord(uv: f32, n: usize, max: f32) -> f32 {
    let p = uv * n as f32 - 0.5;
    if p.is_nan() {
        return 0.0;
    }
    let nearest = p.round();
    let p = if (p - nearest).abs() < 1e-4 { nearest } else { p };
    p.clamp(0.0, max)
}

/// Hermite smooth step between two edges.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// A read-only view of the global mask for one kernel invocation.
#[derive(Debug, Clone, Copy)]
pub struct MaskView<'a> {
    pub values: &'a [f32],
    pub resolution: u32,
}

/// How strongly a modifier's result replaces its unmodified input.
///
/// The base factor is the global mask resampled at the element (when a mask
/// is present) or the context's scalar contribution, multiplied by the
/// node's own contribution. The product is clamped to [0, 1], so an
/// out-of-range mask texel never overshoots the transformed value.
#[derive(Debug, Clone, Copy)]
pub struct Contribution<'a> {
    scalar: f32,
    local: f32,
    mask: Option<MaskView<'a>>,
}

impl<'a> Contribution<'a> {
    pub fn uniform(scalar: f32) -> Self {
        Self {
            scalar,
            local: 1.0,
            mask: None,
        }
    }

    pub fn with_local(mut self, local: f32) -> Self {
        self.local = local;
        self
    }

    pub fn with_mask(mut self, mask: Option<MaskView<'a>>) -> Self {
        self.mask = mask;
        self
    }

    /// Effective factor at a UV position.
    #[inline]
    pub fn at_uv(&self, u: f32, v: f32) -> f32 {
        let base = match self.mask {
            Some(mask) => {
                sample_bilinear(mask.values, mask.resolution, u, v).unwrap_or(self.scalar)
            }
            None => self.scalar,
        };
        (base * self.local).clamp(0.0, 1.0)
    }

    /// Effective factor at a texel of a field with the given resolution.
    #[inline]
    pub fn at_texel(&self, index: usize, resolution: u32) -> f32 {
        if self.mask.is_none() {
            return (self.scalar * self.local).clamp(0.0, 1.0);
        }
        let (u, v) = texel_uv(index, resolution);
        self.at_uv(u, v)
    }

    /// Blend the raw result back toward the unmodified input.
    #[inline]
    pub fn apply<T: Lerp>(&self, original: T, raw: T, index: usize, resolution: u32) -> T {
        T::lerp(original, raw, self.at_texel(index, resolution))
    }
}
