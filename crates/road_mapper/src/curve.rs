//! Cubic Bézier tessellation into an oriented polyline.
//!
//! Control points come in quadruples `(P0, P1, P2, P3)` sharing endpoints with the
//! next quadruple. Straight lines and pen moves arrive as degenerate cubics
//! `(A, A, B, B)`, so one evaluation routine covers every path command.

use glam::DVec2;

use crate::error::TessellationError;

/// Parametric step used by the generator (1000 samples per segment).
pub const BEZIER_FRACTION: f64 = 0.001;

/// One tessellated sample in map coordinates (y pointing up).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedSample {
    pub position: DVec2,
    /// Unit direction of travel; zero when the neighbouring samples coincide.
    pub tangent: DVec2,
}

impl OrientedSample {
    /// Unit normal pointing to the left of the direction of travel.
    #[inline]
    pub fn normal(&self) -> DVec2 {
        self.tangent.perp()
    }
}

/// Ordered samples of one lane centerline. Always holds at least two samples.
#[derive(Debug, Clone, PartialEq)]
pub struct OrientedPolyline {
    samples: Vec<OrientedSample>,
}

impl OrientedPolyline {
    /// Returns `None` for fewer than two samples.
    pub fn new(samples: Vec<OrientedSample>) -> Option<Self> {
        if samples.len() < 2 {
            None
        } else {
            Some(Self { samples })
        }
    }

    #[inline]
    pub fn samples(&self) -> &[OrientedSample] {
        &self.samples
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Direction `v` scaled to unit length; a zero vector is returned unchanged.
#[inline]
fn normalize(v: DVec2) -> DVec2 {
    let norm = v.length();
    if norm == 0.0 {
        v
    } else {
        v / norm
    }
}

#[inline(always)]
fn lerp(a: DVec2, b: DVec2, t: f64) -> DVec2 {
    a + (b - a) * t
}

/// De Casteljau evaluation of one cubic segment.
#[inline]
fn cubic_point(p: &[DVec2], t: f64) -> DVec2 {
    let a = lerp(p[0], p[1], t);
    let b = lerp(p[1], p[2], t);
    let c = lerp(p[2], p[3], t);

    let m = lerp(a, b, t);
    let n = lerp(b, c, t);

    lerp(m, n, t)
}

/// Sample every cubic segment of `points` at parameter steps of `fraction` and
/// flip y around `canvas_height` (document y grows downwards, map y upwards).
///
/// Orientation: the first sample takes the direction towards the second, interior
/// samples the renormalized mean of their incoming and outgoing directions, and the
/// last sample a copy of the final segment direction.
pub fn tessellate(
    points: &[DVec2],
    fraction: f64,
    canvas_height: f64,
) -> Result<OrientedPolyline, TessellationError> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(TessellationError::InvalidFraction(fraction));
    }

    let segments = points.len().saturating_sub(1) / 3;

    let per_segment = ((1.0 / fraction) as usize).saturating_add(1).min(1 << 16);
    let mut positions: Vec<DVec2> = Vec::with_capacity(segments.saturating_mul(per_segment));
    let mut tangents: Vec<DVec2> = Vec::with_capacity(positions.capacity());
    let mut last_dir = DVec2::ZERO;

    for segment in 0..segments {
        let control = &points[segment * 3..segment * 3 + 4];

        let mut j = 0.0;
        while j <= 1.0 {
            let p = cubic_point(control, j);
            positions.push(DVec2::new(p.x, canvas_height - p.y));

            let n = positions.len();
            if n == 2 {
                last_dir = normalize(positions[1] - positions[0]);
                tangents.push(last_dir);
            } else if n >= 3 {
                let next_dir = normalize(positions[n - 1] - positions[n - 2]);
                tangents.push(normalize((last_dir + next_dir) / 2.0));
                last_dir = next_dir;
            }

            j += fraction;
        }
    }

    if positions.len() < 2 {
        return Err(TessellationError::TooFewSamples {
            points: points.len(),
            samples: positions.len(),
        });
    }

    tangents.push(last_dir);

    let samples = positions
        .into_iter()
        .zip(tangents)
        .map(|(position, tangent)| OrientedSample { position, tangent })
        .collect();

    Ok(OrientedPolyline { samples })
}
