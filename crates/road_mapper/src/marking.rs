//! Lane marking codes.
//!
//! The stroke colour of a lane path encodes which markings bound it on the left
//! and on the right of its direction of travel.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkingKind {
    #[default]
    None,
    Broken,
    Solid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LaneMarking {
    pub left: MarkingKind,
    pub right: MarkingKind,
}

impl LaneMarking {
    pub const fn new(left: MarkingKind, right: MarkingKind) -> Self {
        Self { left, right }
    }

    /// Resolve a stroke colour such as `#ff007f`. Unknown codes carry no markings.
    pub fn from_code(code: &str) -> Self {
        use MarkingKind::*;

        let code = code.trim().to_ascii_lowercase();
        match code.as_str() {
            "#ff0000" => Self::new(Solid, Solid),
            "#ff007f" => Self::new(Broken, Solid),
            "#7f00ff" => Self::new(Solid, Broken),
            "#0000ff" => Self::new(Broken, Broken),
            "#00ff00" => Self::new(None, None),
            "#ff7f00" => Self::new(None, Solid),
            "#7fff00" => Self::new(Solid, None),
            "#007fff" => Self::new(None, Broken),
            "#00ff7f" => Self::new(Broken, None),
            _ => Self::default(),
        }
    }

    /// Marking on the given side of the lane.
    #[inline]
    pub fn side(&self, left: bool) -> MarkingKind {
        if left {
            self.left
        } else {
            self.right
        }
    }
}
