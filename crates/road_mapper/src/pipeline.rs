//! Document to map conversion.

use std::path::{Path, PathBuf};

use carmen_map::MapCreator;
use log::{debug, info, warn};
use serde::Serialize;

use crate::curve::{tessellate, BEZIER_FRACTION};
use crate::error::MapperError;
use crate::grid::Grid;
use crate::marking::LaneMarking;
use crate::raster::{rasterize_lane, ClaimObserver, LaneSpec, LaneStats};
use crate::svg::{read_document, LaneDocument};

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Parametric step of the curve tessellation.
    pub fraction: f64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            fraction: BEZIER_FRACTION,
        }
    }
}

/// Outcome of one lane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneReport {
    pub lane: u32,
    pub stroke: String,
    pub stroke_width: Option<f64>,
    pub marking: LaneMarking,
    pub control_points: usize,
    pub samples: usize,
    pub token_errors: usize,
    /// Reason the lane was not rasterized.
    pub skipped: Option<String>,
    pub stats: LaneStats,
}

/// Outcome of one converted document.
#[derive(Debug, Clone, Serialize)]
pub struct MapReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub width: usize,
    pub height: usize,
    pub claimed_cells: usize,
    pub lanes: Vec<LaneReport>,
}

impl MapReport {
    pub fn skipped_lanes(&self) -> usize {
        self.lanes.iter().filter(|l| l.skipped.is_some()).count()
    }

    pub fn token_errors(&self) -> usize {
        self.lanes.iter().map(|l| l.token_errors).sum()
    }
}

/// Rasterize every lane of `doc`, in document order, into a fresh grid.
pub fn render_document<'o>(
    doc: &LaneDocument,
    opts: &RenderOptions,
    mut observer: Option<&mut (dyn ClaimObserver + 'o)>,
) -> (Grid, Vec<LaneReport>) {
    let mut grid = Grid::new(doc.width, doc.height);
    let mut reports = Vec::with_capacity(doc.lanes.len());

    for lane in &doc.lanes {
        let marking = LaneMarking::from_code(&lane.stroke);
        let mut report = LaneReport {
            lane: lane.id.get(),
            stroke: lane.stroke.clone(),
            stroke_width: lane.stroke_width,
            marking,
            control_points: lane.points.len(),
            samples: 0,
            token_errors: lane.token_errors.len(),
            skipped: None,
            stats: LaneStats::default(),
        };

        if !lane.token_errors.is_empty() {
            warn!("lane {}: {} path tokens skipped", lane.id, lane.token_errors.len());
        }

        let stroke_width = match lane.stroke_width {
            Some(w) if w.is_finite() && w > 0.0 => w,
            _ => {
                warn!("lane {}: missing or invalid stroke width, skipped", lane.id);
                report.skipped = Some("invalid stroke width".to_string());
                reports.push(report);
                continue;
            }
        };

        let polyline = match tessellate(&lane.points, opts.fraction, doc.height as f64) {
            Ok(p) => p,
            Err(e) => {
                warn!("lane {}: {}, skipped", lane.id, e);
                report.skipped = Some(e.to_string());
                reports.push(report);
                continue;
            }
        };
        report.samples = polyline.len();

        let spec = LaneSpec {
            id: lane.id,
            stroke_width,
            marking,
        };
        report.stats = rasterize_lane(&mut grid, &spec, &polyline, observer.as_deref_mut());

        debug!(
            "lane {} ({} {:?}/{:?}, width {}): {} samples, {} seeds, {} cells claimed",
            lane.id,
            lane.stroke,
            marking.left,
            marking.right,
            stroke_width,
            report.samples,
            report.stats.seeds,
            report.stats.claimed
        );
        reports.push(report);
    }

    (grid, reports)
}

/// Convert the SVG document at `input` into a map file at `output`.
pub fn convert_file<'o>(
    input: &Path,
    output: &Path,
    opts: &RenderOptions,
    creator: MapCreator,
    observer: Option<&mut (dyn ClaimObserver + 'o)>,
) -> Result<MapReport, MapperError> {
    let text = std::fs::read_to_string(input).map_err(|source| MapperError::Read {
        path: input.to_path_buf(),
        source,
    })?;
    let doc = read_document(&text)?;
    info!(
        "{}: {}x{} cells, {} lanes",
        input.display(),
        doc.width,
        doc.height,
        doc.lanes.len()
    );

    let (grid, lanes) = render_document(&doc, opts, observer);

    let map = grid.to_road_map(creator);
    carmen_map::write_file(output, &map).map_err(|source| MapperError::Write {
        path: output.to_path_buf(),
        source,
    })?;

    let report = MapReport {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        width: doc.width,
        height: doc.height,
        claimed_cells: grid.claimed_count(),
        lanes,
    };
    info!(
        "wrote {} ({} cells on road, {} lanes skipped)",
        output.display(),
        report.claimed_cells,
        report.skipped_lanes()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    use glam::DVec2;

    use crate::error::TokenErrorKind;
    use crate::svg::{LanePath, TokenError};

    fn lane(id: u32, a: (f64, f64), b: (f64, f64), width: Option<f64>, stroke: &str) -> LanePath {
        let a = DVec2::new(a.0, a.1);
        let b = DVec2::new(b.0, b.1);
        LanePath {
            id: NonZeroU32::new(id).unwrap(),
            points: vec![a, a, b, b],
            stroke_width: width,
            stroke: stroke.to_string(),
            token_errors: Vec::new(),
        }
    }

    #[test]
    fn test_overlapping_lanes() {
        // Two parallel lanes whose bands overlap on map rows 8 to 11.
        let doc = LaneDocument {
            width: 40,
            height: 20,
            lanes: vec![
                lane(1, (2.0, 12.0), (37.0, 12.0), Some(6.0), "#ff0000"),
                lane(2, (2.0, 9.0), (37.0, 9.0), Some(6.0), "#0000ff"),
            ],
        };
        let opts = RenderOptions { fraction: 0.01 };
        let (grid, reports) = render_document(&doc, &opts, None);

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.skipped.is_none() && r.stats.claimed > 0));

        // Lane 1 runs along map y = 8; lane 2 along y = 11.
        for x in 5..35 {
            for y in 6..=10 {
                let cell = grid.get(x, y).unwrap();
                assert_eq!(cell.owner_lane.map(NonZeroU32::get), Some(1), "({x}, {y})");
                assert_eq!(cell.broken_marking, 0);
            }
            for y in 12..=13 {
                let cell = grid.get(x, y).unwrap();
                assert_eq!(cell.owner_lane.map(NonZeroU32::get), Some(2), "({x}, {y})");
                assert_eq!(cell.solid_marking, 0);
            }
        }
        assert_eq!(
            grid.claimed_count(),
            reports[0].stats.claimed + reports[1].stats.claimed
        );
    }

    #[test]
    fn test_non_finite_coordinates_are_token_errors() {
        let text = r##"<svg><image width="20" height="20"/><path d="M 5,5 L NaN,5" style="stroke-width:2;stroke:#ff0000"/></svg>"##;
        let doc = read_document(text).unwrap();
        let (grid, reports) = render_document(&doc, &RenderOptions { fraction: 0.1 }, None);

        assert_eq!(reports[0].token_errors, 1);
        assert!(reports[0].skipped.is_some());
        assert_eq!(grid.claimed_count(), 0);
    }

    #[test]
    fn test_bad_lanes_are_skipped() {
        let mut broken = lane(3, (1.0, 1.0), (1.0, 1.0), Some(2.0), "#00ff00");
        broken.points.truncate(1);
        broken.token_errors.push(TokenError {
            index: 0,
            token: "Q".to_string(),
            kind: TokenErrorKind::UnknownCommand,
        });

        let doc = LaneDocument {
            width: 10,
            height: 10,
            lanes: vec![
                lane(1, (1.0, 5.0), (8.0, 5.0), None, "#ff0000"),
                lane(2, (1.0, 5.0), (8.0, 5.0), Some(-1.0), "#ff0000"),
                broken,
                lane(4, (1.0, 5.0), (8.0, 5.0), Some(2.0), "#00ff00"),
            ],
        };
        let (grid, reports) = render_document(&doc, &RenderOptions::default(), None);

        let skipped: Vec<bool> = reports.iter().map(|r| r.skipped.is_some()).collect();
        assert_eq!(skipped, vec![true, true, true, false]);
        assert_eq!(reports[2].token_errors, 1);
        assert!(grid.cells().iter().all(|c| c.owner_lane.map_or(true, |id| id.get() == 4)));
        assert!(grid.claimed_count() > 0);
    }
}
