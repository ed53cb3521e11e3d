/*!
Finds facial regions on arbitrary meshes using nothing but the bounding box.

The face is assumed to bulge towards the viewer, so whichever Z extreme is farther from the mean
Z is treated as the front. Vertices close to that front plane are then bucketed by where they sit
inside the box. This works on any topology, which also means it happily finds a "mouth" on a
teapot.
*/

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Vertices farther than this fraction of the depth from the front plane are ignored.
const FRONT_DEPTH_RATIO: f32 = 0.15;
const LOWER_THIRD: f32 = 1.0 / 3.0;
const UPPER_THIRD: f32 = 2.0 / 3.0;
/// Central 50% of the width.
const MOUTH_BAND: (f32, f32) = (0.25, 0.75);
/// Central 80% of the width.
const JAW_BAND: (f32, f32) = (0.1, 0.9);
const NOSE_BAND: (f32, f32) = (0.4, 0.6);
/// Half width of the gap between the eyes.
const EYE_DEAD_ZONE: f32 = 0.05;
/// Height of the jaw pivot above the bottom of the box, as a fraction of the height.
const JAW_PIVOT_HEIGHT: f32 = 0.05;

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds {
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;

        Some(points.iter().fold(
            Self {
                min: first,
                max: first,
            },
            |b, p| Self {
                min: b.min.min(*p),
                max: b.max.max(*p),
            },
        ))
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Position of `p` inside the box, 0.0-1.0 per axis. Flat axes map to 0.5.
    pub fn normalize(&self, p: Vec3) -> Vec3 {
        let size = self.size();
        let axis = |v: f32, min: f32, extent: f32| {
            if extent > f32::EPSILON {
                (v - min) / extent
            } else {
                0.5
            }
        };

        Vec3::new(
            axis(p.x, self.min.x, size.x),
            axis(p.y, self.min.y, size.y),
            axis(p.z, self.min.z, size.z),
        )
    }
}

/// Vertex indices per region plus the anchors used for deformation.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacialLandmarks {
    pub mouth_vertices: Vec<usize>,
    pub jaw_vertices: Vec<usize>,
    pub left_eye_vertices: Vec<usize>,
    pub right_eye_vertices: Vec<usize>,
    pub nose_vertices: Vec<usize>,

    pub mouth_center: Vec3,
    pub jaw_pivot: Vec3,
    pub head_center: Vec3,
    pub bounds: Bounds,

    /// Z of the front plane.
    pub front_z: f32,
    /// 1.0 when the face points towards +Z, -1.0 for -Z.
    pub facing: f32,
}

impl FacialLandmarks {
    pub fn is_empty(&self) -> bool {
        self.mouth_vertices.is_empty()
            && self.jaw_vertices.is_empty()
            && self.left_eye_vertices.is_empty()
            && self.right_eye_vertices.is_empty()
            && self.nose_vertices.is_empty()
    }
}

fn in_band(v: f32, (low, high): (f32, f32)) -> bool {
    v >= low && v <= high
}

/// Classify mesh vertices into facial regions. Only an empty mesh yields `None`, a mesh where
/// nothing matched still returns landmarks with empty regions.
pub fn classify(positions: &[Vec3]) -> Option<FacialLandmarks> {
    let bounds = Bounds::from_points(positions)?;
    let size = bounds.size();

    let mean_z = positions.iter().map(|p| p.z).sum::<f32>() / positions.len() as f32;
    let (front_z, facing) = if bounds.max.z - mean_z >= mean_z - bounds.min.z {
        (bounds.max.z, 1.0)
    } else {
        (bounds.min.z, -1.0)
    };
    let front_threshold = size.z * FRONT_DEPTH_RATIO;

    let mut landmarks = FacialLandmarks {
        bounds,
        front_z,
        facing,
        head_center: bounds.center(),
        jaw_pivot: Vec3::new(
            bounds.center().x,
            bounds.min.y + size.y * JAW_PIVOT_HEIGHT,
            front_z,
        ),
        ..Default::default()
    };

    for (i, p) in positions.iter().enumerate() {
        if (p.z - front_z).abs() > front_threshold {
            continue;
        }

        let n = bounds.normalize(*p);

        if n.y < LOWER_THIRD {
            if in_band(n.x, MOUTH_BAND) {
                landmarks.mouth_vertices.push(i);
            }
            if in_band(n.x, JAW_BAND) {
                landmarks.jaw_vertices.push(i);
            }
        } else if n.y > UPPER_THIRD {
            if n.x < 0.5 - EYE_DEAD_ZONE {
                landmarks.left_eye_vertices.push(i);
            } else if n.x > 0.5 + EYE_DEAD_ZONE {
                landmarks.right_eye_vertices.push(i);
            }
        } else if in_band(n.x, NOSE_BAND) {
            landmarks.nose_vertices.push(i);
        }
    }

    landmarks.mouth_center = if landmarks.mouth_vertices.is_empty() {
        Vec3::new(
            bounds.center().x,
            bounds.min.y + size.y * LOWER_THIRD * 0.5,
            front_z,
        )
    } else {
        landmarks
            .mouth_vertices
            .iter()
            .map(|i| positions[*i])
            .sum::<Vec3>()
            / landmarks.mouth_vertices.len() as f32
    };

    Some(landmarks)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A 11x11 grid on the unit square bulging towards `facing`, with a flat back plate.
    pub(crate) fn face_grid(facing: f32) -> Vec<Vec3> {
        let mut points = Vec::new();
        for yi in 0..=10 {
            for xi in 0..=10 {
                let (x, y) = (xi as f32 / 10.0, yi as f32 / 10.0);
                points.push(Vec3::new(x, y, facing));
            }
        }
        // Back plate, denser than the face so the mean sits near the back
        for yi in 0..=20 {
            for xi in 0..=20 {
                points.push(Vec3::new(xi as f32 / 20.0, yi as f32 / 20.0, 0.0));
            }
        }

        points
    }

    #[test]
    fn empty_mesh() {
        assert!(classify(&[]).is_none());
    }

    #[test]
    fn front_towards_positive_z() {
        let points = face_grid(1.0);
        let landmarks = classify(&points).unwrap();

        assert_eq!(landmarks.facing, 1.0);
        assert_eq!(landmarks.front_z, 1.0);
        for i in landmarks.mouth_vertices.iter().chain(&landmarks.nose_vertices) {
            assert_eq!(points[*i].z, 1.0);
        }
    }

    #[test]
    fn front_towards_negative_z() {
        let points = face_grid(-1.0);
        let landmarks = classify(&points).unwrap();

        assert_eq!(landmarks.facing, -1.0);
        assert_eq!(landmarks.front_z, -1.0);
        assert!(!landmarks.mouth_vertices.is_empty());
    }

    #[test]
    fn regions() {
        let points = face_grid(1.0);
        let landmarks = classify(&points).unwrap();

        // Lower third is rows 0-3, mouth columns 3-7, jaw columns 1-9
        assert_eq!(landmarks.mouth_vertices.len(), 4 * 5);
        assert_eq!(landmarks.jaw_vertices.len(), 4 * 9);
        for i in &landmarks.mouth_vertices {
            assert!(landmarks.jaw_vertices.contains(i));
        }

        // Upper third is rows 7-10, columns 0-4 and 6-10
        assert_eq!(landmarks.left_eye_vertices.len(), 4 * 5);
        assert_eq!(landmarks.right_eye_vertices.len(), 4 * 5);
        for i in &landmarks.left_eye_vertices {
            assert!(points[*i].x < 0.5);
        }

        // Middle rows 4-6, columns 4-6
        assert_eq!(landmarks.nose_vertices.len(), 3 * 3);
    }

    #[test]
    fn anchors() {
        let landmarks = classify(&face_grid(1.0)).unwrap();

        assert!((landmarks.mouth_center.x - 0.5).abs() < 1e-5);
        assert!((landmarks.mouth_center.y - 0.15).abs() < 1e-5);
        assert_eq!(landmarks.mouth_center.z, 1.0);

        assert!((landmarks.jaw_pivot - Vec3::new(0.5, 0.05, 1.0)).length() < 1e-5);
        assert!((landmarks.head_center - Vec3::new(0.5, 0.5, 0.5)).length() < 1e-5);
    }

    #[test]
    fn nothing_in_front_is_not_a_failure() {
        let mut points = face_grid(1.0)[121..].to_vec();
        // The only point near the front sits at the far left, mid height
        points.push(Vec3::new(0.0, 0.5, 1.0));

        let landmarks = classify(&points).unwrap();

        assert!(landmarks.is_empty());
        assert_eq!(landmarks.bounds.max.z, 1.0);
    }

    #[test]
    fn flat_mesh() {
        let points = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 0.0)];
        let landmarks = classify(&points).unwrap();

        // Zero depth, both points are in front
        assert_eq!(landmarks.left_eye_vertices, Vec::<usize>::new());
        assert_eq!(landmarks.right_eye_vertices, vec![1]);
    }
}
