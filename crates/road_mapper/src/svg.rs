//! SVG lane documents.
//!
//! A document carries one background `<image>` that fixes the canvas size in cells,
//! and one `<path>` per lane centerline. The path data is flattened into cubic Bézier
//! control points: moves and straight lines become degenerate cubics `(A, A, B, B)`.
//! Stroke width is the lane width in cells, stroke colour the marking code.

use std::num::NonZeroU32;

use glam::DVec2;
use log::warn;
use roxmltree::{Document, Node, ParsingOptions};

use crate::error::{MapperError, TokenErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    MoveAbs,
    MoveRel,
    LineAbs,
    LineRel,
    CurveAbs,
    CurveRel,
}

impl Command {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "M" => Some(Self::MoveAbs),
            "m" => Some(Self::MoveRel),
            "L" => Some(Self::LineAbs),
            "l" => Some(Self::LineRel),
            "C" => Some(Self::CurveAbs),
            "c" => Some(Self::CurveRel),
            _ => None,
        }
    }
}

/// A skipped path data token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenError {
    /// Position of the token in the whitespace separated `d` attribute.
    pub index: usize,
    pub token: String,
    pub kind: TokenErrorKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPath {
    /// Cubic control points in document coordinates.
    pub points: Vec<DVec2>,
    pub errors: Vec<TokenError>,
}

/// Incremental decoder for the `d` attribute of a path.
#[derive(Debug, Default)]
pub struct PathDecoder {
    points: Vec<DVec2>,
    command: Option<Command>,
    /// Coordinate pairs read since the command last changed.
    run: usize,
    /// Index of the point relative coordinates refer to.
    anchor: usize,
    moves: usize,
    errors: Vec<TokenError>,
}

/// `x,y` with two finite numbers.
fn parse_pair(token: &str) -> Option<DVec2> {
    let (x, y) = token.split_once(',')?;
    if y.contains(',') {
        return None;
    }
    let p = DVec2::new(x.parse().ok()?, y.parse().ok()?);
    p.is_finite().then_some(p)
}

impl PathDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a whole `d` attribute.
    pub fn decode(d: &str) -> DecodedPath {
        let mut decoder = Self::new();
        for (index, token) in d.split_whitespace().enumerate() {
            decoder.push_token(index, token);
        }
        decoder.finish()
    }

    pub fn push_token(&mut self, index: usize, token: &str) {
        let result = if token.chars().count() == 1 {
            match Command::from_token(token) {
                Some(command) => {
                    if self.command != Some(command) {
                        self.run = 0;
                    }
                    self.command = Some(command);
                    Ok(())
                }
                None => Err(TokenErrorKind::UnknownCommand),
            }
        } else {
            self.coordinate(token)
        };

        if let Err(kind) = result {
            warn!("skipping path token #{} {:?}: {}", index, token, kind);
            self.errors.push(TokenError {
                index,
                token: token.to_string(),
                kind,
            });
        }
    }

    fn last_point(&self) -> Result<DVec2, TokenErrorKind> {
        self.points.last().copied().ok_or(TokenErrorKind::NoCurrentPoint)
    }

    fn anchor_point(&self) -> Result<DVec2, TokenErrorKind> {
        self.points.get(self.anchor).copied().ok_or(TokenErrorKind::NoCurrentPoint)
    }

    /// Append `(last, p, p)` and anchor on `p`.
    fn push_segment_to(&mut self, last: DVec2, p: DVec2) {
        self.points.push(last);
        self.points.push(p);
        self.anchor = self.points.len() - 1;
        self.points.push(p);
    }

    fn coordinate(&mut self, token: &str) -> Result<(), TokenErrorKind> {
        use Command::*;

        let command = self.command.ok_or(TokenErrorKind::NoCommand)?;
        if matches!(command, CurveAbs | CurveRel) {
            self.run += 1;
        }
        let pair = parse_pair(token).ok_or(TokenErrorKind::MalformedPair)?;

        match command {
            MoveAbs | MoveRel if self.moves == 0 => {
                // The opening move is absolute in both forms.
                self.points.push(pair);
                self.moves += 1;
            }
            MoveAbs | MoveRel => {
                let last = self.last_point()?;
                let p = if command == MoveRel { last + pair } else { pair };
                self.push_segment_to(last, p);
            }
            CurveRel => {
                let p = self.anchor_point()? + pair;
                self.points.push(p);
                if self.run % 3 == 0 {
                    self.anchor = self.points.len() - 1;
                }
            }
            CurveAbs => {
                self.points.push(pair);
                self.anchor = self.points.len() - 1;
            }
            LineRel => {
                let last = self.last_point()?;
                let p = self.anchor_point()? + pair;
                self.push_segment_to(last, p);
            }
            LineAbs => {
                let last = self.last_point()?;
                self.push_segment_to(last, pair);
            }
        }
        Ok(())
    }

    pub fn finish(self) -> DecodedPath {
        DecodedPath {
            points: self.points,
            errors: self.errors,
        }
    }
}

/// One `<path>` of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct LanePath {
    /// 1-based document order.
    pub id: NonZeroU32,
    pub points: Vec<DVec2>,
    /// Lane width in cells; `None` when absent or unparsable.
    pub stroke_width: Option<f64>,
    /// Marking code, empty when absent.
    pub stroke: String,
    pub token_errors: Vec<TokenError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaneDocument {
    pub width: usize,
    pub height: usize,
    pub lanes: Vec<LanePath>,
}

/// Last value of `key` in a `k:v;k:v` style declaration.
fn style_value<'a>(style: &'a str, key: &str) -> Option<&'a str> {
    style
        .split(';')
        .filter_map(|decl| decl.split_once(':'))
        .filter(|(k, _)| k.trim() == key)
        .last()
        .map(|(_, v)| v.trim())
}

fn path_property<'a>(node: &Node<'a, '_>, key: &str) -> Option<&'a str> {
    node.attribute("style")
        .and_then(|style| style_value(style, key))
        .or_else(|| node.attribute(key).map(str::trim))
}

/// Plain number, optionally suffixed with `px`.
fn parse_length(s: &str) -> Option<f64> {
    let s = s.trim();
    let s = s.strip_suffix("px").unwrap_or(s);
    s.trim().parse::<f64>().ok()
}

fn canvas_dimension(
    image: Option<Node>,
    root: Node,
    name: &'static str,
) -> Result<usize, MapperError> {
    let value = image
        .and_then(|n| n.attribute(name))
        .or_else(|| root.attribute(name))
        .ok_or(MapperError::MissingCanvas)?;

    match parse_length(value).map(f64::round) {
        Some(v) if v >= 1.0 && v <= u32::MAX as f64 => Ok(v as usize),
        _ => Err(MapperError::InvalidCanvas {
            name,
            value: value.to_string(),
        }),
    }
}

/// Parse an SVG lane document.
pub fn read_document(text: &str) -> Result<LaneDocument, MapperError> {
    let opts = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(text, opts)?;
    let root = doc.root_element();

    let image = doc
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == "image");
    let width = canvas_dimension(image, root, "width")?;
    let height = canvas_dimension(image, root, "height")?;
    if carmen_map::gridmap_chunk_size(width as u32, height as u32).is_none() {
        return Err(MapperError::InvalidCanvas {
            name: "size",
            value: format!("{}x{}", width, height),
        });
    }

    let lanes = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "path")
        .enumerate()
        .map(|(i, node)| {
            let decoded = PathDecoder::decode(node.attribute("d").unwrap_or(""));
            LanePath {
                id: NonZeroU32::MIN.saturating_add(i as u32),
                points: decoded.points,
                stroke_width: path_property(&node, "stroke-width").and_then(parse_length),
                stroke: path_property(&node, "stroke").unwrap_or("").to_string(),
                token_errors: decoded.errors,
            }
        })
        .collect();

    Ok(LaneDocument {
        width,
        height,
        lanes,
    })
}
