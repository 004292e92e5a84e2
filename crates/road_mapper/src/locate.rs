//! Nearest tessellated sample to a query point.
//!
//! The search brackets the sign change of the tangent projection `cos` between the
//! first and last sample and bisects it. This relies on `cos` changing sign at most
//! once near the closest approach, which holds for smoothed tangents but not for
//! tightly curved or self-intersecting lanes; the result is then a local, not
//! global, nearest sample.

use glam::DVec2;

use crate::curve::OrientedPolyline;

/// Result of a nearest-sample query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    /// Index of the selected sample.
    pub index: usize,
    /// Euclidean distance from the query to the selected sample.
    pub distance: f64,
    /// Projection of (sample - query) on the sample tangent.
    pub cos: f64,
    /// Cross term; negative when the query lies left of the direction of travel.
    pub sin: f64,
    /// Tangent of the selected sample.
    pub tangent: DVec2,
}

impl Nearest {
    #[inline]
    pub fn is_left(&self) -> bool {
        self.sin.is_sign_negative()
    }
}

#[inline(always)]
fn project(polyline: &OrientedPolyline, i: usize, query: DVec2) -> (f64, f64) {
    let s = &polyline.samples()[i];
    let a = s.position - query;
    (a.dot(s.tangent), s.tangent.perp_dot(a))
}

/// Locate the sample of `polyline` nearest to `query`.
pub fn nearest_point(polyline: &OrientedPolyline, query: DVec2) -> Nearest {
    let mut i0 = 0;
    let mut i1 = polyline.len() - 1;

    let (mut cos0, mut sin0) = project(polyline, i0, query);
    let (mut cos1, mut sin1) = project(polyline, i1, query);

    while i1 - i0 > 1 && cos1.is_sign_negative() != cos0.is_sign_negative() {
        let i2 = (i0 + i1) / 2;
        let (cos2, sin2) = project(polyline, i2, query);

        if cos2.is_sign_negative() != cos0.is_sign_negative() {
            i1 = i2;
            cos1 = cos2;
            sin1 = sin2;
        } else {
            i0 = i2;
            cos0 = cos2;
            sin0 = sin2;
        }
    }

    if cos1.abs() < cos0.abs() {
        i0 = i1;
        cos0 = cos1;
        sin0 = sin1;
    }

    let sample = &polyline.samples()[i0];

    Nearest {
        index: i0,
        distance: sample.position.distance(query),
        cos: cos0,
        sin: sin0,
        tangent: sample.tangent,
    }
}
