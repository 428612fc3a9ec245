//! Hand landmark frames as produced by an external landmark detector.
//!
//! Models the 21-point hand layout (wrist, four points per finger).
//! Coordinates are image-normalized: x/y roughly in [-0.2, 1.2] with y
//! growing downward, z unconstrained.

use anyhow::{anyhow, bail};
use lexpr::Value;

use crate::sexp;

// ── Point definitions ──────────────────────────────────────

/// The 21 tracked points of one hand, in detector order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandPoint {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexMcp,
    IndexPip,
    IndexDip,
    IndexTip,
    MiddleMcp,
    MiddlePip,
    MiddleDip,
    MiddleTip,
    RingMcp,
    RingPip,
    RingDip,
    RingTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Total number of points per hand.
pub const POINT_COUNT: usize = 21;

/// Coordinates per point.
pub const COORDS: usize = 3;

/// One (x, y, z) point.
pub type Point3 = [f32; 3];

impl HandPoint {
    /// Convert point enum to array index (0-20).
    pub fn index(&self) -> usize {
        *self as usize
    }
}

// ── Handedness ─────────────────────────────────────────────

/// Which hand the detector believes it saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    /// Parse the detector's label.  Case-insensitive; unknown labels map to None.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

// ── Frame ──────────────────────────────────────────────────

/// Points detected for one hand in one camera frame.
///
/// A frame with fewer than [`POINT_COUNT`] points is malformed; every
/// stage treats it as "no hand" instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    points: Vec<Point3>,
    handedness: Option<Handedness>,
}

impl LandmarkFrame {
    pub fn new(points: Vec<Point3>, handedness: Option<Handedness>) -> Self {
        Self { points, handedness }
    }

    /// Whether the frame carries the full 21-point layout.
    pub fn is_complete(&self) -> bool {
        self.points.len() >= POINT_COUNT
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn handedness(&self) -> Option<Handedness> {
        self.handedness
    }

    /// Position of a named point.  Callers check `is_complete()` first.
    pub fn point(&self, p: HandPoint) -> Point3 {
        self.points[p.index()]
    }

    /// Parse a recorded frame.
    ///
    /// Accepts `nil` / `()` (no hand) or a plist
    /// `(:hand "Right" :points ((x y z) ...))`.  `:hand` is optional.
    pub fn from_sexp(value: &Value) -> anyhow::Result<Option<Self>> {
        if sexp::is_nil(value) {
            return Ok(None);
        }
        let points_value =
            sexp::plist_get(value, "points").ok_or_else(|| anyhow!("frame without :points"))?;
        let mut points = Vec::with_capacity(POINT_COUNT);
        for item in sexp::list_items(points_value) {
            let coords = sexp::number_list(item)
                .ok_or_else(|| anyhow!("non-numeric point coordinate in {}", item))?;
            if coords.len() != COORDS {
                bail!("point has {} coordinates, expected {}", coords.len(), COORDS);
            }
            points.push([coords[0] as f32, coords[1] as f32, coords[2] as f32]);
        }
        let handedness = sexp::get_keyword(value, "hand").and_then(|h| Handedness::parse(&h));
        Ok(Some(Self::new(points, handedness)))
    }

    /// Render as a recording line (inverse of `from_sexp`).
    #[cfg(test)]
    pub fn to_sexp(&self) -> String {
        let mut s = String::from("(");
        if let Some(h) = self.handedness {
            s.push_str(&format!(":hand \"{:?}\" ", h));
        }
        s.push_str(":points (");
        for (i, p) in self.points.iter().enumerate() {
            if i > 0 {
                s.push(' ');
            }
            s.push_str(&format!("({} {} {})", p[0], p[1], p[2]));
        }
        s.push_str("))");
        s
    }
}

/// Planar (x/y) Euclidean distance between two points.
pub fn planar_distance(a: &Point3, b: &Point3) -> f32 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    (dx * dx + dy * dy).sqrt()
}

/// Full 3-D Euclidean distance between two points.
pub fn distance(a: &Point3, b: &Point3) -> f32 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let dz = b[2] - a[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

// ── Test helpers ───────────────────────────────────────────

/// A relaxed right hand, fingers pointing up, palm facing the camera.
#[cfg(test)]
pub fn make_open_hand(handedness: Option<Handedness>) -> LandmarkFrame {
    let points = vec![
        [0.50, 0.80, 0.0],  // wrist
        [0.44, 0.76, 0.0],  // thumb cmc
        [0.40, 0.71, 0.0],  // thumb mcp
        [0.37, 0.66, 0.0],  // thumb ip
        [0.33, 0.62, 0.0],  // thumb tip
        [0.45, 0.60, 0.0],  // index mcp
        [0.44, 0.50, 0.0],  // index pip
        [0.44, 0.44, 0.0],  // index dip
        [0.44, 0.38, 0.0],  // index tip
        [0.50, 0.59, 0.0],  // middle mcp
        [0.50, 0.48, 0.0],  // middle pip
        [0.50, 0.41, 0.0],  // middle dip
        [0.50, 0.35, 0.0],  // middle tip
        [0.55, 0.60, 0.0],  // ring mcp
        [0.56, 0.50, 0.0],  // ring pip
        [0.56, 0.44, 0.0],  // ring dip
        [0.56, 0.39, 0.0],  // ring tip
        [0.60, 0.63, 0.0],  // pinky mcp
        [0.61, 0.55, 0.0],  // pinky pip
        [0.61, 0.50, 0.0],  // pinky dip
        [0.61, 0.46, 0.0],  // pinky tip
    ];
    LandmarkFrame::new(points, handedness)
}

/// Same hand with every finger folded below its middle joint.
#[cfg(test)]
pub fn make_fist(handedness: Option<Handedness>) -> LandmarkFrame {
    let mut frame = make_open_hand(handedness);
    for (tip, pip) in [
        (HandPoint::IndexTip, HandPoint::IndexPip),
        (HandPoint::MiddleTip, HandPoint::MiddlePip),
        (HandPoint::RingTip, HandPoint::RingPip),
        (HandPoint::PinkyTip, HandPoint::PinkyPip),
    ] {
        let pip_pos = frame.points[pip.index()];
        frame.points[tip.index()] = [pip_pos[0], pip_pos[1] + 0.04, pip_pos[2]];
    }
    // Thumb tucked across the palm.
    let ip = frame.points[HandPoint::ThumbIp.index()];
    frame.points[HandPoint::ThumbTip.index()] = [ip[0] + 0.01, ip[1], ip[2]];
    frame
}

/// Index and middle extended, ring and pinky folded.
#[cfg(test)]
pub fn make_two_fingers(handedness: Option<Handedness>) -> LandmarkFrame {
    let mut frame = make_open_hand(handedness);
    for (tip, pip) in [
        (HandPoint::RingTip, HandPoint::RingPip),
        (HandPoint::PinkyTip, HandPoint::PinkyPip),
    ] {
        let pip_pos = frame.points[pip.index()];
        frame.points[tip.index()] = [pip_pos[0], pip_pos[1] + 0.04, pip_pos[2]];
    }
    let ip = frame.points[HandPoint::ThumbIp.index()];
    frame.points[HandPoint::ThumbTip.index()] = [ip[0] + 0.01, ip[1], ip[2]];
    frame
}

/// Index finger up, the rest folded, thumb tucked.  No control gesture
/// matches it.
#[cfg(test)]
pub fn make_pointing_hand() -> LandmarkFrame {
    let mut frame = make_open_hand(Some(Handedness::Right));
    for (tip, pip) in [
        (HandPoint::MiddleTip, HandPoint::MiddlePip),
        (HandPoint::RingTip, HandPoint::RingPip),
        (HandPoint::PinkyTip, HandPoint::PinkyPip),
    ] {
        let pip_pos = frame.points[pip.index()];
        frame.points[tip.index()] = [pip_pos[0], pip_pos[1] + 0.04, pip_pos[2]];
    }
    let ip = frame.points[HandPoint::ThumbIp.index()];
    frame.points[HandPoint::ThumbTip.index()] = [ip[0] + 0.01, ip[1], ip[2]];
    frame
}

/// Shift every point by (dx, dy).
#[cfg(test)]
pub fn translated(frame: &LandmarkFrame, dx: f32, dy: f32) -> LandmarkFrame {
    let points = frame
        .points
        .iter()
        .map(|p| [p[0] + dx, p[1] + dy, p[2]])
        .collect();
    LandmarkFrame::new(points, frame.handedness)
}
