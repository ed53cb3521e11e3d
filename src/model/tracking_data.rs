use glam::Vec3;
use serde::{Deserialize, Serialize};

/// A single normalized landmark point as delivered by the landmark provider.
///
/// `x` and `y` are normalized to the camera frame (0.0-1.0), `z` is relative depth.
pub type Landmark = Vec3;

/// Head rotation as pitch/yaw/roll.
///
/// Pitch and yaw are rescaled landmark ratios (-1.0-1.0), roll is a real angle in radians.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Rotation {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn lerp(&self, other: &Rotation, t: f32) -> Rotation {
        Rotation {
            x: lerp(self.x, other.x, t),
            y: lerp(self.y, other.y, t),
            z: lerp(self.z, other.z, t),
        }
    }
}

/// Coarse mouth shape derived from the mouth aspect ratio.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouthShape {
    #[default]
    Closed,
    Half,
    Open,
}

impl MouthShape {
    /// Openness above this is at least [MouthShape::Half].
    pub const HALF_THRESHOLD: f32 = 0.12;
    /// Openness above this is [MouthShape::Open].
    pub const OPEN_THRESHOLD: f32 = 0.25;

    pub fn from_openness(openness: f32) -> Self {
        if openness > Self::OPEN_THRESHOLD {
            Self::Open
        } else if openness > Self::HALF_THRESHOLD {
            Self::Half
        } else {
            Self::Closed
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mouth {
    /// 0.0-1.0
    pub openness: f32,
    pub shape: MouthShape,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Eyes {
    /// 0.0-1.0
    pub left_open: f32,
    /// 0.0-1.0
    pub right_open: f32,
    pub blink: bool,
}

impl Default for Eyes {
    fn default() -> Self {
        Self {
            left_open: 1.0,
            right_open: 1.0,
            blink: false,
        }
    }
}

/// Eyebrow raise amounts, always >= 0.0.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Eyebrows {
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Default for Position {
    fn default() -> Self {
        Self { x: 0.5, y: 0.5 }
    }
}

/// Semantic face state produced from one frame of landmarks.
///
/// Superseded every tracked frame. When no face is found the previous state stays
/// authoritative, it is never reset implicitly.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceState {
    pub rotation: Rotation,
    pub mouth: Mouth,
    pub eyes: Eyes,
    pub eyebrows: Eyebrows,
    pub position: Position,
}

pub(crate) fn lerp(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t
}
