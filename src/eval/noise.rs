// eval/noise.rs - Deterministic 2D noise primitives
//
// Everything here is a pure function of its arguments. Seeds select a
// permutation table (simplex) or perturb the per-cell hash (cellular), so the
// same (position, frequency, seed) always yields bit-identical output.

// ── Gradient vectors ────────────────────────────────────────────────

// 8 gradient directions (cardinal + diagonal, unnormalized)
const GRAD2: [[f64; 2]; 8] = [
    [1.0, 0.0],
    [-1.0, 0.0],
    [0.0, 1.0],
    [0.0, -1.0],
    [1.0, 1.0],
    [-1.0, 1.0],
    [1.0, -1.0],
    [-1.0, -1.0],
];

// ── Mulberry32 PRNG ─────────────────────────────────────────────────

/// Small, fast 32-bit PRNG used for permutation shuffles and feature points.
pub struct Mulberry32 {
    state: u32,
}

impl Mulberry32 {
    pub fn new(seed: i32) -> Self {
        Self { state: seed as u32 }
    }

    /// Next value in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_add(0x6d2b79f5);
        let mut t: u32 = (self.state ^ (self.state >> 15)).wrapping_mul(1 | self.state);
        t = t.wrapping_add((t ^ (t >> 7)).wrapping_mul(61 | t)) ^ t;
        ((t ^ (t >> 14)) as f64) / 4294967296.0
    }
}

// ── Permutation table ───────────────────────────────────────────────

/// Build a 512-entry permutation table using a Fisher-Yates shuffle.
/// The second half mirrors the first to avoid modular arithmetic.
pub fn build_perm_table(seed: i32) -> [u8; 512] {
    let mut rng = Mulberry32::new(seed);
    let mut perm = [0u8; 512];

    for i in 0..256u16 {
        perm[i as usize] = i as u8;
    }

    for i in (1..=255usize).rev() {
        let j = (rng.next_f64() * (i as f64 + 1.0)).floor() as usize;
        perm.swap(i, j);
    }

    for i in 0..256 {
        perm[i + 256] = perm[i];
    }

    perm
}

// ── 2D Simplex Noise ────────────────────────────────────────────────

const F2: f64 = 0.366_025_403_784_438_6; // (sqrt(3) - 1) / 2
const G2: f64 = 0.211_324_865_405_187_1; // (3 - sqrt(3)) / 6

/// 2D simplex noise, approximately in [-1, 1].
pub fn simplex_2d(perm: &[u8; 512], x: f64, y: f64) -> f64 {
    // Skew input to simplex cell coordinates
    let s = (x + y) * F2;
    let i = (x + s).floor() as i64;
    let j = (y + s).floor() as i64;

    // Unskew to find cell origin in input space
    let t = (i + j) as f64 * G2;
    let x0 = x - (i as f64 - t);
    let y0 = y - (j as f64 - t);

    let (i1, j1) = if x0 > y0 { (1usize, 0usize) } else { (0, 1) };

    let x1 = x0 - i1 as f64 + G2;
    let y1 = y0 - j1 as f64 + G2;
    let x2 = x0 - 1.0 + 2.0 * G2;
    let y2 = y0 - 1.0 + 2.0 * G2;

    let ii = (i & 255) as usize;
    let jj = (j & 255) as usize;
    let gi0 = (perm[ii + perm[jj] as usize] % 8) as usize;
    let gi1 = (perm[ii + i1 + perm[jj + j1] as usize] % 8) as usize;
    let gi2 = (perm[ii + 1 + perm[jj + 1] as usize] % 8) as usize;

    let corner = |gi: usize, dx: f64, dy: f64| -> f64 {
        let t = 0.5 - dx * dx - dy * dy;
        if t < 0.0 {
            0.0
        } else {
            let t2 = t * t;
            t2 * t2 * (GRAD2[gi][0] * dx + GRAD2[gi][1] * dy)
        }
    };

    70.0 * (corner(gi0, x0, y0) + corner(gi1, x1, y1) + corner(gi2, x2, y2))
}

// ── Fractal accumulation ────────────────────────────────────────────

/// Octave schedule shared by the fractal generators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OctaveParams {
    pub octaves: u32,
    pub lacunarity: f64,
    pub persistence: f64,
}

/// Sum `sample(frequency)` over octaves, normalized by the accumulated
/// amplitude mass so the result keeps the range of a single octave.
pub fn fractal(freq: f64, params: OctaveParams, mut sample: impl FnMut(f64) -> f64) -> f64 {
    let mut sum = 0.0;
    let mut mass = 0.0;
    let mut amp = 1.0;
    let mut f = freq;
    for _ in 0..params.octaves.max(1) {
        sum += sample(f) * amp;
        mass += amp;
        f *= params.lacunarity;
        amp *= params.persistence;
    }
    if mass > 0.0 {
        sum / mass
    } else {
        0.0
    }
}

/// Normalized simplex FBM.
pub fn fbm_2d(perm: &[u8; 512], x: f64, y: f64, freq: f64, params: OctaveParams) -> f64 {
    fractal(freq, params, |f| simplex_2d(perm, x * f, y * f))
}

// ── Cellular (Worley) noise ─────────────────────────────────────────

const HASH_PRIME_A: i64 = 374761393;
const HASH_PRIME_B: i64 = 668265263;
const HASH_PRIME_C: i32 = 1103515245;

/// Distance metric for feature-point searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellMetric {
    Euclidean,
    Manhattan,
}

/// Nearest and second-nearest feature distances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellDistances {
    pub f1: f64,
    pub f2: f64,
}

fn cell_seed(cx: i64, cy: i64, seed: i32) -> i32 {
    let h = cx
        .wrapping_mul(HASH_PRIME_A)
        .wrapping_add(cy.wrapping_mul(HASH_PRIME_B)) as i32;
    h ^ seed.wrapping_mul(HASH_PRIME_C)
}

/// Feature distances at (x, y) with one jittered point per unit cell.
pub fn cellular_2d(x: f64, y: f64, seed: i32, metric: CellMetric, jitter: f64) -> CellDistances {
    let ix = x.floor() as i64;
    let iy = y.floor() as i64;
    let mut d1 = f64::INFINITY;
    let mut d2 = f64::INFINITY;

    for dx in -1..=1i64 {
        for dy in -1..=1i64 {
            let cx = ix + dx;
            let cy = iy + dy;
            let mut rng = Mulberry32::new(cell_seed(cx, cy, seed));
            let px = cx as f64 + rng.next_f64() * jitter;
            let py = cy as f64 + rng.next_f64() * jitter;
            let dist = match metric {
                CellMetric::Euclidean => ((x - px) * (x - px) + (y - py) * (y - py)).sqrt(),
                CellMetric::Manhattan => (x - px).abs() + (y - py).abs(),
            };
            if dist < d1 {
                d2 = d1;
                d1 = dist;
            } else if dist < d2 {
                d2 = dist;
            }
        }
    }

    CellDistances { f1: d1, f2: d2 }
}

/// Map a feature distance into the signed unit range.
#[inline]
pub fn cell_to_signed(distance: f64) -> f64 {
    (distance * 2.0 - 1.0).clamp(-1.0, 1.0)
}

/// Normalized FBM over cellular F1.
pub fn cellular_fbm_2d(
    x: f64,
    y: f64,
    freq: f64,
    params: OctaveParams,
    seed: i32,
    jitter: f64,
) -> f64 {
    let mut octave = 0;
    fractal(freq, params, |f| {
        // Offset each octave's seed so octaves don't share feature points.
        let s = seed.wrapping_add(octave);
        octave += 1;
        cell_to_signed(cellular_2d(x * f, y * f, s, CellMetric::Euclidean, jitter).f1)
    })
}

/// Quantize a signed unit value into `steps` flat levels.
pub fn quantize(value: f64, steps: u32) -> f64 {
    if steps < 2 {
        return value;
    }
    // Map [-1, 1] → [0, steps), floor, and map the level back.
    let s = steps as f64;
    let level = ((value * 0.5 + 0.5) * s).floor().clamp(0.0, s - 1.0);
    (level / (s - 1.0)) * 2.0 - 1.0
}

// ── Tests ───────────────────────────────────────────────────────────
