// eval/field.rs - Field and buffer types
//
// Three value shapes flow along graph edges:
//   - `ScalarField`: one f32 per texel, row-major, resolution² long
//   - `RasterField`: scalar / altitude / angle / color channels, allocated
//     together in one storage block so they can never disagree on size
//   - `VectorField`: a polyline of polar vertices with a fixed capacity and
//     a mutable in-use count
//
// Storage sits behind `Arc<RwLock<..>>`. A buffer has exactly one writer (the
// kernel that populates it) and is read-only afterwards, so the locks are
// never contended: dependency handles order the writer before every reader.

use crate::error::FieldError;
use std::f32::consts::PI;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Straight RGBA color, components nominally in [0, 1].
pub type Rgba = [f32; 4];

/// Number of texels in a square field of the given resolution.
#[inline]
pub fn texel_count(resolution: u32) -> usize {
    resolution as usize * resolution as usize
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

// ── Field kind ──────────────────────────────────────────────────────

/// The shape of value a node produces or a port accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Float,
    Raster,
    Vector,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Float => "float",
            FieldKind::Raster => "raster",
            FieldKind::Vector => "vector",
        };
        f.write_str(name)
    }
}

// ── Scalar field ────────────────────────────────────────────────────

/// One value per texel over a resolution × resolution grid.
#[derive(Debug, Clone)]
pub struct ScalarField {
    resolution: u32,
    values: Arc<RwLock<Vec<f32>>>,
}

impl ScalarField {
    /// Zero-initialized field.
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            values: Arc::new(RwLock::new(vec![0.0; texel_count(resolution)])),
        }
    }

    pub fn from_values(resolution: u32, values: Vec<f32>) -> Result<Self, FieldError> {
        let expected = texel_count(resolution);
        if values.len() != expected {
            return Err(FieldError::LengthMismatch {
                resolution,
                expected,
                actual: values.len(),
            });
        }
        Ok(Self {
            resolution,
            values: Arc::new(RwLock::new(values)),
        })
    }

    #[inline]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<f32>> {
        read_lock(&self.values)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Vec<f32>> {
        write_lock(&self.values)
    }

    /// Copy the current contents out.
    pub fn to_vec(&self) -> Vec<f32> {
        self.read().clone()
    }
}

// ── Raster field ────────────────────────────────────────────────────

/// One texel of a raster field, gathered across its four channels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RasterTexel {
    pub scalar: f32,
    pub altitude: f32,
    pub angle: f32,
    pub color: Rgba,
}

/// The four parallel channels of a raster field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RasterChannels {
    pub scalar: Vec<f32>,
    pub altitude: Vec<f32>,
    pub angle: Vec<f32>,
    pub color: Vec<Rgba>,
}

impl RasterChannels {
    pub fn zeroed(len: usize) -> Self {
        Self {
            scalar: vec![0.0; len],
            altitude: vec![0.0; len],
            angle: vec![0.0; len],
            color: vec![[0.0; 4]; len],
        }
    }

    /// Texel count, or `None` when the channels disagree on length.
    pub fn len(&self) -> Option<usize> {
        let n = self.scalar.len();
        (self.altitude.len() == n && self.angle.len() == n && self.color.len() == n).then_some(n)
    }

    pub fn is_empty(&self) -> bool {
        self.scalar.is_empty()
    }

    pub fn texel(&self, index: usize) -> Option<RasterTexel> {
        Some(RasterTexel {
            scalar: *self.scalar.get(index)?,
            altitude: *self.altitude.get(index)?,
            angle: *self.angle.get(index)?,
            color: *self.color.get(index)?,
        })
    }
}

/// Four-channel field: scalar, altitude, angle and color per texel.
#[derive(Debug, Clone)]
pub struct RasterField {
    resolution: u32,
    channels: Arc<RwLock<RasterChannels>>,
}

impl RasterField {
    /// Zero-initialized raster; all four channels are allocated here.
    pub fn new(resolution: u32) -> Self {
        Self {
            resolution,
            channels: Arc::new(RwLock::new(RasterChannels::zeroed(texel_count(resolution)))),
        }
    }

    pub fn from_channels(resolution: u32, channels: RasterChannels) -> Result<Self, FieldError> {
        let expected = texel_count(resolution);
        let lengths = [
            channels.scalar.len(),
            channels.altitude.len(),
            channels.angle.len(),
            channels.color.len(),
        ];
        if let Some(&actual) = lengths.iter().find(|&&len| len != expected) {
            return Err(FieldError::LengthMismatch {
                resolution,
                expected,
                actual,
            });
        }
        Ok(Self {
            resolution,
            channels: Arc::new(RwLock::new(channels)),
        })
    }

    #[inline]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn read(&self) -> RwLockReadGuard<'_, RasterChannels> {
        read_lock(&self.channels)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, RasterChannels> {
        write_lock(&self.channels)
    }

    pub fn snapshot(&self) -> RasterChannels {
        self.read().clone()
    }
}

// ── Vector field (polyline) ─────────────────────────────────────────

/// A polyline vertex in polar form around the field center.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolarVertex {
    /// Angle in [-π, π].
    pub angle: f32,
    /// Radius in [0, 1], where 1 reaches the field edge midpoints.
    pub radius: f32,
}

impl PolarVertex {
    /// Build a vertex, wrapping the angle into [-π, π] and clamping the radius.
    pub fn new(angle: f32, radius: f32) -> Self {
        Self {
            angle: wrap_angle(angle),
            radius: radius.clamp(0.0, 1.0),
        }
    }

    /// Cartesian position in [-1, 1]².
    pub fn to_cartesian(self) -> (f32, f32) {
        (self.angle.cos() * self.radius, self.angle.sin() * self.radius)
    }

    /// Position in the UV space of a field, [0, 1]².
    pub fn to_uv(self) -> (f32, f32) {
        let (x, y) = self.to_cartesian();
        (x * 0.5 + 0.5, y * 0.5 + 0.5)
    }
}

/// Wrap an angle into [-π, π].
pub fn wrap_angle(angle: f32) -> f32 {
    if (-PI..=PI).contains(&angle) {
        return angle;
    }
    let tau = 2.0 * PI;
    let wrapped = (angle + PI).rem_euclid(tau) - PI;
    wrapped.clamp(-PI, PI)
}

/// Ordered polar vertices with a fixed capacity and an in-use count.
///
/// Weight and color arrays, when present, are parallel to the vertex array
/// and share its capacity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polyline {
    vertices: Vec<PolarVertex>,
    count: usize,
    weights: Option<Vec<f32>>,
    colors: Option<Vec<Rgba>>,
}

impl Polyline {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            vertices: vec![PolarVertex::default(); capacity],
            count: 0,
            weights: None,
            colors: None,
        }
    }

    /// Build a polyline whose capacity equals the number of vertices given.
    pub fn from_vertices(vertices: Vec<PolarVertex>) -> Self {
        let count = vertices.len();
        Self {
            vertices,
            count,
            weights: None,
            colors: None,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn set_count(&mut self, count: usize) -> Result<(), FieldError> {
        if count > self.capacity() {
            return Err(FieldError::CountExceedsCapacity {
                count,
                capacity: self.capacity(),
            });
        }
        self.count = count;
        Ok(())
    }

    pub fn push(&mut self, vertex: PolarVertex) -> Result<(), FieldError> {
        if self.count == self.capacity() {
            return Err(FieldError::CountExceedsCapacity {
                count: self.count + 1,
                capacity: self.capacity(),
            });
        }
        self.vertices[self.count] = vertex;
        self.count += 1;
        Ok(())
    }

    /// The in-use vertices.
    pub fn vertices(&self) -> &[PolarVertex] {
        &self.vertices[..self.count]
    }

    pub fn vertices_mut(&mut self) -> &mut [PolarVertex] {
        &mut self.vertices[..self.count]
    }

    /// In-use vertices for writing, alongside their weights for reading.
    pub fn split_mut(&mut self) -> (&mut [PolarVertex], Option<&[f32]>) {
        let count = self.count;
        (
            &mut self.vertices[..count],
            self.weights.as_deref().map(|w| &w[..count]),
        )
    }

    pub fn weights(&self) -> Option<&[f32]> {
        self.weights.as_deref().map(|w| &w[..self.count])
    }

    pub fn colors(&self) -> Option<&[Rgba]> {
        self.colors.as_deref().map(|c| &c[..self.count])
    }

    pub fn set_weights(&mut self, weights: Vec<f32>) -> Result<(), FieldError> {
        if weights.len() != self.capacity() {
            return Err(FieldError::LengthMismatch {
                resolution: 0,
                expected: self.capacity(),
                actual: weights.len(),
            });
        }
        self.weights = Some(weights);
        Ok(())
    }

    pub fn set_colors(&mut self, colors: Vec<Rgba>) -> Result<(), FieldError> {
        if colors.len() != self.capacity() {
            return Err(FieldError::LengthMismatch {
                resolution: 0,
                expected: self.capacity(),
                actual: colors.len(),
            });
        }
        self.colors = Some(colors);
        Ok(())
    }

    /// Overwrite this polyline with `source`, truncated to this capacity.
    pub fn copy_from(&mut self, source: &Polyline) {
        let n = source.count.min(self.capacity());
        self.vertices[..n].copy_from_slice(&source.vertices[..n]);
        self.count = n;
        let capacity = self.capacity();
        self.weights = source.weights.as_ref().map(|w| resized(w, n, capacity, 1.0));
        self.colors = source
            .colors
            .as_ref()
            .map(|c| resized(c, n, capacity, [0.0; 4]));
    }
}

fn resized<T: Copy>(source: &[T], n: usize, capacity: usize, fill: T) -> Vec<T> {
    let mut out = vec![fill; capacity];
    out[..n].copy_from_slice(&source[..n]);
    out
}

/// A polyline buffer shared between the scheduler and its kernels.
#[derive(Debug, Clone)]
pub struct VectorField {
    capacity: usize,
    polyline: Arc<RwLock<Polyline>>,
}

impl VectorField {
    /// Empty polyline (count 0) with room for `capacity` vertices.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            polyline: Arc::new(RwLock::new(Polyline::with_capacity(capacity))),
        }
    }

    pub fn from_polyline(polyline: Polyline) -> Self {
        Self {
            capacity: polyline.capacity(),
            polyline: Arc::new(RwLock::new(polyline)),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Polyline> {
        read_lock(&self.polyline)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Polyline> {
        write_lock(&self.polyline)
    }

    pub fn snapshot(&self) -> Polyline {
        self.read().clone()
    }
}

// ── Buffer ──────────────────────────────────────────────────────────

/// Any buffer that can sit on a graph edge.
#[derive(Debug, Clone)]
pub enum FieldBuffer {
    Scalar(ScalarField),
    Raster(RasterField),
    Vector(VectorField),
}

impl FieldBuffer {
    /// Allocate a zero-initialized buffer of the given shape.
    /// `capacity` only applies to vector buffers.
    pub fn allocate(kind: FieldKind, resolution: u32, capacity: usize) -> Self {
        match kind {
            FieldKind::Float => FieldBuffer::Scalar(ScalarField::new(resolution)),
            FieldKind::Raster => FieldBuffer::Raster(RasterField::new(resolution)),
            FieldKind::Vector => FieldBuffer::Vector(VectorField::new(capacity)),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldBuffer::Scalar(_) => FieldKind::Float,
            FieldBuffer::Raster(_) => FieldKind::Raster,
            FieldBuffer::Vector(_) => FieldKind::Vector,
        }
    }

    /// Grid resolution, or `None` for polylines.
    pub fn resolution(&self) -> Option<u32> {
        match self {
            FieldBuffer::Scalar(f) => Some(f.resolution()),
            FieldBuffer::Raster(f) => Some(f.resolution()),
            FieldBuffer::Vector(_) => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&ScalarField> {
        match self {
            FieldBuffer::Scalar(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_raster(&self) -> Option<&RasterField> {
        match self {
            FieldBuffer::Raster(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&VectorField> {
        match self {
            FieldBuffer::Vector(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_field_is_zeroed() {
        let f = ScalarField::new(4);
        assert_eq!(f.to_vec(), vec![0.0; 16]);
        assert_eq!(f.resolution(), 4);
    }

    #[test]
    fn scalar_field_rejects_wrong_length() {
        let err = ScalarField::from_values(3, vec![0.0; 8]).unwrap_err();
        assert_eq!(
            err,
            FieldError::LengthMismatch {
                resolution: 3,
                expected: 9,
                actual: 8
            }
        );
    }

    #[test]
    fn raster_channels_allocated_together() {
        let r = RasterField::new(5);
        let ch = r.read();
        assert_eq!(ch.len(), Some(25));
        assert_eq!(ch.color.len(), 25);
    }

    #[test]
    fn raster_rejects_ragged_channels() {
        let mut ch = RasterChannels::zeroed(4);
        ch.angle.pop();
        assert!(RasterField::from_channels(2, ch).is_err());
    }

    #[test]
    fn polyline_count_never_exceeds_capacity() {
        let mut p = Polyline::with_capacity(2);
        p.push(PolarVertex::new(0.0, 0.5)).unwrap();
        p.push(PolarVertex::new(1.0, 0.5)).unwrap();
        assert!(p.push(PolarVertex::new(2.0, 0.5)).is_err());
        assert!(p.set_count(3).is_err());
        assert_eq!(p.count(), 2);
        p.set_count(1).unwrap();
        assert_eq!(p.vertices().len(), 1);
    }

    #[test]
    fn polar_vertex_normalizes() {
        let v = PolarVertex::new(3.0 * PI, 1.5);
        assert!(v.angle >= -PI && v.angle <= PI);
        assert_eq!(v.radius, 1.0);
        let center = PolarVertex::new(0.7, 0.0).to_uv();
        assert_eq!(center, (0.5, 0.5));
    }

    #[test]
    fn copy_from_truncates_to_capacity() {
        let mut src = Polyline::from_vertices(vec![PolarVertex::new(0.1, 0.2); 5]);
        src.set_weights(vec![0.5; 5]).unwrap();
        let mut dst = Polyline::with_capacity(3);
        dst.copy_from(&src);
        assert_eq!(dst.count(), 3);
        assert_eq!(dst.weights(), Some(&[0.5, 0.5, 0.5][..]));
    }

    #[test]
    fn allocate_matches_kind() {
        assert_eq!(
            FieldBuffer::allocate(FieldKind::Raster, 2, 0).kind(),
            FieldKind::Raster
        );
        let v = FieldBuffer::allocate(FieldKind::Vector, 8, 6);
        assert_eq!(v.as_vector().map(|f| f.capacity()), Some(6));
        assert_eq!(v.resolution(), None);
    }
}
