/*!
Interprets face mesh landmarks into a [FaceState].

Everything is derived from ratios of landmark distances, so the output does not depend on the
camera resolution. Indices follow the canonical 468 point face mesh, optionally followed by 10
iris points.
*/

use glam::Vec2;
use log::warn;

use crate::{
    model::{Eyebrows, Eyes, FaceState, Landmark, Mouth, MouthShape, Position, Rotation},
    puppets::puppet_2d::Canvas,
};

/// Canonical landmark indices.
pub mod index {
    pub const NOSE_TIP: usize = 1;
    pub const FOREHEAD: usize = 10;
    pub const CHIN: usize = 152;
    pub const LEFT_EAR: usize = 234;
    pub const RIGHT_EAR: usize = 454;

    pub const UPPER_LIP: usize = 13;
    pub const LOWER_LIP: usize = 14;
    pub const MOUTH_LEFT: usize = 61;
    pub const MOUTH_RIGHT: usize = 291;

    pub const LEFT_EYE_TOP: usize = 159;
    pub const LEFT_EYE_BOTTOM: usize = 145;
    pub const LEFT_EYE_OUTER: usize = 33;
    pub const LEFT_EYE_INNER: usize = 133;

    pub const RIGHT_EYE_TOP: usize = 386;
    pub const RIGHT_EYE_BOTTOM: usize = 374;
    pub const RIGHT_EYE_INNER: usize = 362;
    pub const RIGHT_EYE_OUTER: usize = 263;

    pub const LEFT_BROW: usize = 105;
    pub const RIGHT_BROW: usize = 334;
}

/// Anything shorter cannot be indexed safely.
pub const MIN_LANDMARKS: usize = 468;

/// Both eyes below this openness is a blink.
pub const BLINK_THRESHOLD: f32 = 0.2;

/// Brow-to-eye gap, relative to face height, of a relaxed brow.
const BROW_REST_RATIO: f32 = 0.08;
const BROW_SCALE: f32 = 10.0;

const FACE_OVAL: &[usize] = &[
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];
const LEFT_EYE_CONTOUR: &[usize] = &[
    33, 7, 163, 144, 145, 153, 154, 155, 133, 173, 157, 158, 159, 160, 161, 246,
];
const RIGHT_EYE_CONTOUR: &[usize] = &[
    263, 249, 390, 373, 374, 380, 381, 382, 362, 398, 384, 385, 386, 387, 388, 466,
];
const LIPS_OUTER: &[usize] = &[
    61, 146, 91, 181, 84, 17, 314, 405, 321, 375, 291, 409, 270, 269, 267, 0, 37, 39, 40, 185,
];
const LIPS_INNER: &[usize] = &[
    78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308, 415, 310, 311, 312, 13, 82, 81, 80, 191,
];

/// Rescale a 0.0-1.0 ratio so the midpoint is 0.0 and either end is +-1.0.
fn centered(value: f32, from: f32, to: f32) -> f32 {
    let span = to - from;
    if span.abs() <= f32::EPSILON {
        return 0.0;
    }

    (((value - from) / span - 0.5) * 2.0).clamp(-1.0, 1.0)
}

fn flat(p: &Landmark) -> Vec2 {
    Vec2::new(p.x, p.y)
}

/// Vertical gap over horizontal width, clamped to 0.0-1.0.
fn aspect_ratio(top: &Landmark, bottom: &Landmark, a: &Landmark, b: &Landmark) -> f32 {
    let width = flat(a).distance(flat(b));
    if width <= f32::EPSILON {
        return 0.0;
    }

    (flat(top).distance(flat(bottom)) / width).clamp(0.0, 1.0)
}

fn brow_raise(brow: &Landmark, eye_top: &Landmark, face_height: f32) -> f32 {
    if face_height <= f32::EPSILON {
        return 0.0;
    }

    let gap = (eye_top.y - brow.y) / face_height;

    ((gap - BROW_REST_RATIO) * BROW_SCALE).max(0.0)
}

/// Stateful only in that it remembers the last valid [FaceState].
#[derive(Debug, Default)]
pub struct LandmarkInterpreter {
    last: FaceState,
}

impl LandmarkInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent valid state. Frames without a face leave this untouched.
    pub fn face_state(&self) -> FaceState {
        self.last
    }

    /// Interpret one face worth of landmarks.
    ///
    /// Returns `None`, keeping the previous state, if there are not enough points.
    pub fn interpret(&mut self, landmarks: &[Landmark]) -> Option<FaceState> {
        use index::*;

        if landmarks.len() < MIN_LANDMARKS {
            warn!(
                "Expected at least {MIN_LANDMARKS} landmarks, received {}, keeping previous state",
                landmarks.len()
            );
            return None;
        }
        let p = |i: usize| &landmarks[i];

        let nose = p(NOSE_TIP);
        let (left_ear, right_ear) = (p(LEFT_EAR), p(RIGHT_EAR));
        let (forehead, chin) = (p(FOREHEAD), p(CHIN));

        let rotation = Rotation {
            x: centered(nose.y, forehead.y, chin.y),
            y: centered(nose.x, left_ear.x, right_ear.x),
            z: (right_ear.y - left_ear.y).atan2(right_ear.x - left_ear.x),
        };

        let openness = aspect_ratio(p(UPPER_LIP), p(LOWER_LIP), p(MOUTH_LEFT), p(MOUTH_RIGHT));
        let mouth = Mouth {
            openness,
            shape: MouthShape::from_openness(openness),
        };

        let left_open = aspect_ratio(
            p(LEFT_EYE_TOP),
            p(LEFT_EYE_BOTTOM),
            p(LEFT_EYE_OUTER),
            p(LEFT_EYE_INNER),
        );
        let right_open = aspect_ratio(
            p(RIGHT_EYE_TOP),
            p(RIGHT_EYE_BOTTOM),
            p(RIGHT_EYE_INNER),
            p(RIGHT_EYE_OUTER),
        );
        let eyes = Eyes {
            left_open,
            right_open,
            blink: left_open < BLINK_THRESHOLD && right_open < BLINK_THRESHOLD,
        };

        let face_height = chin.y - forehead.y;
        let eyebrows = Eyebrows {
            left: brow_raise(p(LEFT_BROW), p(LEFT_EYE_TOP), face_height),
            right: brow_raise(p(RIGHT_BROW), p(RIGHT_EYE_TOP), face_height),
        };

        let state = FaceState {
            rotation,
            mouth,
            eyes,
            eyebrows,
            position: Position {
                x: nose.x,
                y: nose.y,
            },
        };
        self.last = state;

        Some(state)
    }

    /// Draw a debug skeleton of the landmarks scaled to a `width` x `height` canvas.
    pub fn draw_overlay(landmarks: &[Landmark], canvas: &mut dyn Canvas, width: f32, height: f32) {
        if landmarks.len() < MIN_LANDMARKS {
            return;
        }

        let to_canvas = |i: &usize| Vec2::new(landmarks[*i].x * width, landmarks[*i].y * height);

        canvas.set_alpha(0.6);
        for (contour, color) in [
            (FACE_OVAL, "#e0e0e0"),
            (LEFT_EYE_CONTOUR, "#30ff30"),
            (RIGHT_EYE_CONTOUR, "#ff3030"),
            (LIPS_OUTER, "#e0e0e0"),
            (LIPS_INNER, "#e0e0e0"),
        ] {
            let points = contour.iter().map(to_canvas).collect::<Vec<_>>();
            canvas.stroke_path(&points, true, 1.0, color);
        }

        canvas.set_alpha(1.0);
        for i in [index::NOSE_TIP, index::CHIN] {
            canvas.fill_ellipse(to_canvas(&i), Vec2::splat(3.0), 0.0, "#ffcc00");
        }
    }
}
