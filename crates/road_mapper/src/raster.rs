//! Region-growing lane rasterizer.
//!
//! Every tessellated sample seeds an 8-connected flood fill over the grid. A cell is
//! evaluated at most once per lane (`owner_lane`), and a cell claimed by an earlier
//! lane is never touched again, so lane order decides overlaps.

use std::num::NonZeroU32;

use carmen_map::PROB_MAX;
use glam::DVec2;
use log::trace;
use serde::Serialize;

use crate::curve::OrientedPolyline;
use crate::grid::{Cell, Grid};
use crate::locate::nearest_point;
use crate::marking::{LaneMarking, MarkingKind};

const NEIGHBORS: [(i64, i64); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Per-lane rasterization parameters.
#[derive(Debug, Clone, Copy)]
pub struct LaneSpec {
    /// 1-based position of the lane in its document.
    pub id: NonZeroU32,
    /// Full lane width in cells.
    pub stroke_width: f64,
    pub marking: LaneMarking,
}

/// Notified after each claimed cell.
pub trait ClaimObserver {
    fn on_claim(&mut self, lane: NonZeroU32, x: usize, y: usize, cell: &Cell);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    /// Samples that started a flood fill.
    pub seeds: usize,
    /// Nearest-point queries.
    pub evaluated: usize,
    pub claimed: usize,
    pub out_of_bounds: usize,
    /// Evaluated cells farther than half the lane width.
    pub too_far: usize,
    /// Evaluated cells whose nearest sample was not orthogonal enough.
    pub oblique: usize,
}

/// Marking probability for a cell `distance` away from the centerline:
/// `MAX` within one cell of the lane edge, `MAX / 2` within two, else 0.
#[inline]
fn marking_probability(max_distance: f64, distance: f64) -> u16 {
    let edge = max_distance - distance;
    let hits = (edge < 1.0) as u8 + (edge < 2.0) as u8;
    (hits as f64 * 0.5 * PROB_MAX as f64).round() as u16
}

/// Lane-center probability, linear from `MAX` on the centerline to `MAX / 4` at the edge.
#[inline]
fn lane_center_probability(max_distance: f64, distance: f64) -> u16 {
    ((1.0 - 0.75 * distance / max_distance) * PROB_MAX as f64).round() as u16
}

/// Rasterize one lane into `grid`.
pub fn rasterize_lane<'o>(
    grid: &mut Grid,
    lane: &LaneSpec,
    polyline: &OrientedPolyline,
    mut observer: Option<&mut (dyn ClaimObserver + 'o)>,
) -> LaneStats {
    let max_distance = lane.stroke_width / 2.0;
    let mut stats = LaneStats::default();
    let mut stack: Vec<(i64, i64)> = Vec::new();
    let mut last_seed: Option<(i64, i64)> = None;

    for sample in polyline.samples() {
        let seed = (
            sample.position.x.round() as i64,
            sample.position.y.round() as i64,
        );
        if last_seed == Some(seed) {
            continue;
        }
        last_seed = Some(seed);
        stats.seeds += 1;

        stack.push(seed);
        while let Some((x, y)) = stack.pop() {
            let Some(cell) = grid.get_mut(x, y) else {
                stats.out_of_bounds += 1;
                continue;
            };

            if cell.owner_lane == Some(lane.id) || cell.claimed {
                continue;
            }

            let nearest = nearest_point(polyline, DVec2::new(x as f64, y as f64));
            stats.evaluated += 1;
            cell.owner_lane = Some(lane.id);

            // A NaN distance (non-finite geometry) is never within reach.
            if !(nearest.distance <= max_distance) {
                stats.too_far += 1;
                continue;
            }
            if nearest.distance > 1.0 && nearest.cos.abs() > 1.0 {
                stats.oblique += 1;
                continue;
            }

            let marking = marking_probability(max_distance, nearest.distance);
            let kind = lane.marking.side(nearest.is_left());

            cell.off_road = 0;
            cell.solid_marking = if kind == MarkingKind::Solid { marking } else { 0 };
            cell.broken_marking = if kind == MarkingKind::Broken { marking } else { 0 };
            cell.lane_center = lane_center_probability(max_distance, nearest.distance);
            cell.claimed = true;
            stats.claimed += 1;

            trace!(
                "lane {} claimed ({}, {}): d = {:.3}, cos = {:.3}, sin = {:.3}, center = {}, solid = {}, broken = {}",
                lane.id,
                x,
                y,
                nearest.distance,
                nearest.cos,
                nearest.sin,
                cell.lane_center,
                cell.solid_marking,
                cell.broken_marking
            );

            if let Some(obs) = observer.as_deref_mut() {
                obs.on_claim(lane.id, x as usize, y as usize, cell);
            }

            for (dx, dy) in NEIGHBORS {
                stack.push((x + dx, y + dy));
            }
        }
    }

    stats
}
