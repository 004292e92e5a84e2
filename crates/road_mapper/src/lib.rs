// src/lib.rs
//! Road ground-truth map generation from SVG lane drawings.
//!
//! Each `<path>` of an SVG document is a lane centerline whose stroke width is the
//! lane width in cells and whose stroke colour encodes the lane markings. Lanes are
//! tessellated (`curve`), rasterized by region growing around the centerline
//! (`locate`, `raster`) into a cell grid (`grid`), and written as a CARMEN road map
//! through `carmen_map`.

pub mod curve;
pub mod error;
pub mod grid;
pub mod locate;
pub mod marking;
pub mod pipeline;
pub mod raster;
pub mod svg;

pub use curve::{tessellate, OrientedPolyline, OrientedSample, BEZIER_FRACTION};
pub use error::{MapperError, TessellationError, TokenErrorKind};
pub use grid::{Cell, Grid};
pub use locate::{nearest_point, Nearest};
pub use marking::{LaneMarking, MarkingKind};
pub use pipeline::{convert_file, render_document, LaneReport, MapReport, RenderOptions};
pub use raster::{rasterize_lane, ClaimObserver, LaneSpec, LaneStats};
pub use svg::{read_document, DecodedPath, LaneDocument, LanePath, PathDecoder, TokenError};
