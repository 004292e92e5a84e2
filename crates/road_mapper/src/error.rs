//! Error types of the lane mapper.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal, per-document failures.
#[derive(Debug, Error)]
pub enum MapperError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse SVG document: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("document has no canvas size (no <image> or <svg> width/height)")]
    MissingCanvas,

    #[error("invalid canvas {name} {value:?}")]
    InvalidCanvas { name: &'static str, value: String },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a lane curve could not be tessellated. The lane is skipped; the run goes on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TessellationError {
    #[error("curve produced {samples} samples from {points} control points (need at least 2)")]
    TooFewSamples { points: usize, samples: usize },

    #[error("parametric step {0} is outside (0, 1]")]
    InvalidFraction(f64),
}

/// Why a path data token was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenErrorKind {
    #[error("unsupported command")]
    UnknownCommand,
    #[error("malformed coordinate pair")]
    MalformedPair,
    #[error("coordinates before any command")]
    NoCommand,
    #[error("relative coordinates without a current point")]
    NoCurrentPoint,
}
