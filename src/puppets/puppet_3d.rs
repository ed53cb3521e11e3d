use std::collections::HashMap;

use glam::{Quat, Vec3};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::model::{AvatarState, Rotation, Viseme, VisemeState};

use super::{
    face_regions::{self, FacialLandmarks},
    mesh::{Bone, Mesh, Model},
    Puppet,
};

/// Morph target names to try for each viseme, in order of preference.
static MORPH_CANDIDATES: Lazy<HashMap<Viseme, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        (
            Viseme::Rest,
            &["viseme_sil", "sil", "rest", "neutral", "mouthClose"][..],
        ),
        (
            Viseme::Aa,
            &["mouthOpen", "jawOpen", "aa", "viseme_aa", "A"][..],
        ),
        (
            Viseme::E,
            &["viseme_E", "mouthSmile", "mouthStretch", "ee", "E"][..],
        ),
        (Viseme::O, &["viseme_O", "mouthFunnel", "oh", "O"][..]),
        (Viseme::U, &["viseme_U", "mouthPucker", "ou", "U"][..]),
        (
            Viseme::Fv,
            &["viseme_FF", "mouthRollLower", "ff", "FV"][..],
        ),
        (
            Viseme::Mbp,
            &["viseme_PP", "mouthPress", "mouthClose", "pp", "MBP"][..],
        ),
    ])
});

/// Substrings that mark a bone as the jaw.
const JAW_BONE_NAMES: [&str; 3] = ["jaw", "chin", "mandible"];

/// Mouth displacement per unit of open/width amount, as a fraction of the model height.
const MOUTH_DISPLACEMENT: f32 = 0.05;
/// Upper lip moves this much relative to the lower lip.
const UPPER_LIP_FACTOR: f32 = 0.3;
/// Vertices this far from the mouth center, in model units, are not displaced.
const FALLOFF_RATE: f32 = 5.0;
/// Jaw rotation in degrees per unit of open amount.
const JAW_DEGREES_PER_OPEN: f32 = 5.0;

/// Head rotation is scaled down before it is applied.
const HEAD_PITCH_SCALE: f32 = 0.5;
const HEAD_YAW_SCALE: f32 = 0.5;
const HEAD_ROLL_SCALE: f32 = 0.3;

/// How the mouth of a model is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AnimationStrategy {
    BlendShape,
    Bone,
    Vertex,
}

/// Jaw rotation coefficient for the bone strategy.
fn jaw_coefficient(viseme: Viseme) -> f32 {
    match viseme {
        Viseme::Aa => 0.5,
        Viseme::O => 0.3,
        Viseme::U => 0.2,
        Viseme::E => 0.15,
        Viseme::Fv => 0.1,
        Viseme::Mbp | Viseme::Rest => 0.0,
    }
}

/// (open, width) amounts for the vertex strategy.
fn mouth_amounts(viseme: Viseme) -> (f32, f32) {
    match viseme {
        Viseme::Rest => (0.0, 0.0),
        Viseme::Aa => (0.8, 0.1),
        Viseme::E => (0.3, 0.5),
        Viseme::O => (0.6, -0.3),
        Viseme::U => (0.3, -0.5),
        Viseme::Fv => (0.15, 0.1),
        Viseme::Mbp => (0.0, 0.0),
    }
}

/// What was found when the model was loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub target_mesh: Option<String>,
    pub jaw_bone: Option<String>,
    /// `false` means the model can only be rotated.
    pub landmarks_detected: bool,
    pub strategy: Option<AnimationStrategy>,
}

/// Reset all influences to 0, then set the first matching candidate to `intensity`.
fn apply_blend_shape(mesh: &mut Mesh, state: &VisemeState) -> bool {
    let Some(dictionary) = mesh.morph_dictionary.as_ref() else {
        return false;
    };
    mesh.morph_influences.iter_mut().for_each(|v| *v = 0.0);

    let candidates = MORPH_CANDIDATES
        .get(&state.current)
        .copied()
        .unwrap_or_default();

    let index = candidates
        .iter()
        .find_map(|c| dictionary.get(*c))
        .or_else(|| {
            candidates.iter().find_map(|c| {
                dictionary
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(c))
                    .map(|(_, i)| i)
            })
        })
        .copied();

    match index.and_then(|i| mesh.morph_influences.get_mut(i)) {
        Some(v) => {
            *v = state.intensity;
            true
        }
        None => false,
    }
}

fn apply_bone(jaw: &mut Bone, state: &VisemeState) {
    jaw.rotation.x = jaw_coefficient(state.current) * state.intensity;
}

/// Displace the mouth, swing the jaw and fix up the normals. `original` must be the rest
/// positions of `mesh`.
fn apply_vertex(
    mesh: &mut Mesh,
    original: &[Vec3],
    landmarks: &FacialLandmarks,
    state: &VisemeState,
) {
    mesh.positions.clear();
    mesh.positions.extend_from_slice(original);

    let (open, width) = mouth_amounts(state.current);
    let open = open * state.intensity;
    let width = width * state.intensity;
    let scale = landmarks.bounds.size().y * MOUTH_DISPLACEMENT;

    for i in &landmarks.mouth_vertices {
        let Some(p) = mesh.positions.get_mut(*i) else {
            continue;
        };

        let offset = *p - landmarks.mouth_center;
        let falloff = (1.0 - FALLOFF_RATE * offset.length()).max(0.0);
        if falloff <= 0.0 {
            continue;
        }

        if p.y < landmarks.mouth_center.y {
            p.y -= open * scale * falloff;
        } else {
            p.y += open * scale * falloff * UPPER_LIP_FACTOR;
        }
        if offset.x != 0.0 {
            p.x += offset.x.signum() * width * scale * falloff;
        }
    }

    let angle = (open * JAW_DEGREES_PER_OPEN).to_radians() * landmarks.facing;
    if angle != 0.0 {
        let rotation = Quat::from_rotation_x(angle);
        for i in &landmarks.jaw_vertices {
            if let Some(p) = mesh.positions.get_mut(*i) {
                *p = landmarks.jaw_pivot + rotation * (*p - landmarks.jaw_pivot);
            }
        }
    }

    mesh.recompute_normals();
}

/// A 3D puppet driven by whatever the imported model supports.
#[derive(Debug)]
pub struct Puppet3d {
    model: Model,

    /// Index of the mesh the mouth strategies operate on.
    target_mesh: Option<usize>,
    /// The index of the jaw bone, if any.
    jaw_bone: Option<usize>,
    /// Facial regions of the target mesh. Replaced whenever a new model is loaded.
    landmarks: Option<FacialLandmarks>,

    /// Rest positions of the target mesh for undoing vertex deformation.
    original_positions: Vec<Vec3>,
    /// Whether the target mesh currently differs from `original_positions`.
    deformed: bool,
    /// The initial pose of the skeleton for easy pose resetting.
    initial_bone_poses: Vec<Bone>,
    initial_rotation: Vec3,

    last_strategy: Option<AnimationStrategy>,
}

impl Puppet3d {
    pub fn new(model: Model) -> Self {
        // Prefer a mesh with morph targets, otherwise the densest one
        let target_mesh = model
            .meshes
            .iter()
            .position(Mesh::has_morph_targets)
            .or_else(|| {
                model
                    .meshes
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| m.vertex_count() > 0)
                    .max_by_key(|(_, m)| m.vertex_count())
                    .map(|(i, _)| i)
            });

        let jaw_bone = model.bones.iter().position(|b| {
            let name = b.name.to_lowercase();
            JAW_BONE_NAMES.iter().any(|j| name.contains(j))
        });

        let (landmarks, original_positions) = match target_mesh.map(|i| &model.meshes[i]) {
            Some(mesh) => (face_regions::classify(&mesh.positions), mesh.positions.clone()),
            None => (None, vec![]),
        };

        let puppet = Self {
            initial_bone_poses: model.bones.clone(),
            initial_rotation: model.rotation,
            model,

            target_mesh,
            jaw_bone,
            landmarks,

            original_positions,
            deformed: false,

            last_strategy: None,
        };

        let report = puppet.load_report();
        if report.landmarks_detected {
            info!(
                "Loaded model {} using {:?}",
                puppet.model.name, report.strategy
            );
        } else {
            warn!(
                "No facial landmarks detected on model {}, only head rotation will be applied",
                puppet.model.name
            );
        }

        puppet
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn landmarks(&self) -> Option<&FacialLandmarks> {
        self.landmarks.as_ref()
    }

    pub fn last_strategy(&self) -> Option<AnimationStrategy> {
        self.last_strategy
    }

    fn has_matching_morph(&self) -> bool {
        let Some(dictionary) = self
            .target_mesh
            .and_then(|i| self.model.meshes[i].morph_dictionary.as_ref())
        else {
            return false;
        };

        MORPH_CANDIDATES.values().flat_map(|c| c.iter()).any(|c| {
            dictionary
                .keys()
                .any(|name| name.eq_ignore_ascii_case(c))
        })
    }

    /// The strategy that will be used for most visemes.
    pub fn probe_strategy(&self) -> Option<AnimationStrategy> {
        if self.has_matching_morph() {
            Some(AnimationStrategy::BlendShape)
        } else if self.jaw_bone.is_some() {
            Some(AnimationStrategy::Bone)
        } else if self.landmarks.is_some() {
            Some(AnimationStrategy::Vertex)
        } else {
            None
        }
    }

    pub fn load_report(&self) -> LoadReport {
        let strategy = self.probe_strategy();

        LoadReport {
            target_mesh: self.target_mesh.map(|i| self.model.meshes[i].name.clone()),
            jaw_bone: self.jaw_bone.map(|i| self.model.bones[i].name.clone()),
            landmarks_detected: strategy.is_some(),
            strategy,
        }
    }

    /// Drive the mouth with the first strategy that works for this model.
    pub fn apply_viseme(&mut self, state: &VisemeState) -> Option<AnimationStrategy> {
        let strategy = self.dispatch(state);
        if strategy != self.last_strategy {
            debug!("Mouth strategy changed to {strategy:?}");
        }
        self.last_strategy = strategy;

        strategy
    }

    fn dispatch(&mut self, state: &VisemeState) -> Option<AnimationStrategy> {
        let blended = self
            .target_mesh
            .map(|i| &mut self.model.meshes[i])
            .is_some_and(|mesh| apply_blend_shape(mesh, state));
        if blended {
            self.restore_rest_positions();
            return Some(AnimationStrategy::BlendShape);
        }

        if let Some(jaw) = self.jaw_bone.map(|i| &mut self.model.bones[i]) {
            apply_bone(jaw, state);
            self.restore_rest_positions();
            return Some(AnimationStrategy::Bone);
        }

        match (self.target_mesh, self.landmarks.as_ref()) {
            (Some(i), Some(landmarks)) => {
                apply_vertex(
                    &mut self.model.meshes[i],
                    &self.original_positions,
                    landmarks,
                    state,
                );
                self.deformed = true;
                Some(AnimationStrategy::Vertex)
            }
            _ => None,
        }
    }

    /// Undo any vertex deformation left over from an earlier frame.
    fn restore_rest_positions(&mut self) {
        if !self.deformed {
            return;
        }
        if let Some(mesh) = self.target_mesh.map(|i| &mut self.model.meshes[i]) {
            mesh.positions.clone_from(&self.original_positions);
            mesh.recompute_normals();
        }
        self.deformed = false;
    }

    pub fn apply_head_rotation(&mut self, rotation: &Rotation) {
        self.model.rotation = self.initial_rotation
            + Vec3::new(
                rotation.x * HEAD_PITCH_SCALE,
                rotation.y * HEAD_YAW_SCALE,
                rotation.z * HEAD_ROLL_SCALE,
            );
    }

    /// Restore bones, vertices, morph influences and rotation to how they were loaded.
    pub fn reset_pose(&mut self) {
        self.model.bones.clone_from(&self.initial_bone_poses);
        self.model.rotation = self.initial_rotation;

        if let Some(mesh) = self.target_mesh.map(|i| &mut self.model.meshes[i]) {
            mesh.morph_influences.iter_mut().for_each(|v| *v = 0.0);
        }
        self.restore_rest_positions();

        self.last_strategy = None;
    }
}

impl Puppet for Puppet3d {
    fn visit(&mut self, state: &AvatarState) {
        self.apply_head_rotation(&state.rotation);
        if let Some(viseme) = state.viseme.as_ref() {
            self.apply_viseme(viseme);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::puppets::face_regions::tests::face_grid;

    fn viseme(current: Viseme, intensity: f32) -> VisemeState {
        VisemeState {
            current,
            previous: Viseme::Rest,
            transition_progress: 1.0,
            intensity,
        }
    }

    fn head() -> Mesh {
        Mesh::new("head", face_grid(1.0))
    }

    fn model(meshes: Vec<Mesh>, bones: Vec<Bone>) -> Model {
        Model {
            name: "test".into(),
            meshes,
            bones,
            rotation: Vec3::ZERO,
        }
    }

    #[test]
    fn blend_shape_wins_over_bone() {
        let mesh = head().with_morph_targets(["jawOpen", "mouthSmile"]);
        let mut puppet = Puppet3d::new(model(vec![mesh], vec![Bone::new("Jaw")]));

        let strategy = puppet.apply_viseme(&viseme(Viseme::Aa, 0.8));

        assert_eq!(strategy, Some(AnimationStrategy::BlendShape));
        assert_eq!(puppet.model().meshes[0].morph_influence("jawOpen"), Some(0.8));
        assert_eq!(puppet.model().bones[0].rotation, Vec3::ZERO);
    }

    #[test]
    fn blend_shape_case_insensitive() {
        let mesh = head().with_morph_targets(["MOUTHFUNNEL"]);
        let mut puppet = Puppet3d::new(model(vec![mesh], vec![]));

        assert_eq!(
            puppet.apply_viseme(&viseme(Viseme::O, 0.5)),
            Some(AnimationStrategy::BlendShape)
        );
        assert_eq!(puppet.model().meshes[0].morph_influence("MOUTHFUNNEL"), Some(0.5));
    }

    #[test]
    fn blend_shape_resets_previous_weights() {
        let mesh = head().with_morph_targets(["jawOpen", "mouthSmile"]);
        let mut puppet = Puppet3d::new(model(vec![mesh], vec![]));

        puppet.apply_viseme(&viseme(Viseme::Aa, 1.0));
        puppet.apply_viseme(&viseme(Viseme::E, 0.6));

        let mesh = &puppet.model().meshes[0];
        assert_eq!(mesh.morph_influence("jawOpen"), Some(0.0));
        assert_eq!(mesh.morph_influence("mouthSmile"), Some(0.6));
    }

    #[test]
    fn unmatched_morphs_fall_back_to_bone() {
        let mesh = head().with_morph_targets(["browUp"]);
        let mut puppet = Puppet3d::new(model(vec![mesh], vec![Bone::new("Head"), Bone::new("LowerJAW")]));

        let strategy = puppet.apply_viseme(&viseme(Viseme::Aa, 0.8));

        assert_eq!(strategy, Some(AnimationStrategy::Bone));
        assert!((puppet.model().bones[1].rotation.x - 0.4).abs() < 1e-6);
        assert_eq!(puppet.model().bones[0].rotation, Vec3::ZERO);
    }

    #[test]
    fn vertex_fallback_opens_mouth() {
        let mut puppet = Puppet3d::new(model(vec![head()], vec![]));
        let before = puppet.model().meshes[0].positions.clone();
        let landmarks = puppet.landmarks().unwrap().clone();

        let strategy = puppet.apply_viseme(&viseme(Viseme::Aa, 1.0));
        assert_eq!(strategy, Some(AnimationStrategy::Vertex));

        let mesh = &puppet.model().meshes[0];
        let moved = landmarks
            .mouth_vertices
            .iter()
            .filter(|i| (mesh.positions[**i] - before[**i]).length() > 1e-6)
            .count();
        assert!(moved > 0);
        assert_eq!(mesh.normals.len(), mesh.positions.len());

        // Eyes are never touched
        for i in &landmarks.left_eye_vertices {
            assert_eq!(mesh.positions[*i], before[*i]);
        }

        // Rest restores the original positions
        puppet.apply_viseme(&viseme(Viseme::Rest, 0.0));
        assert_eq!(puppet.model().meshes[0].positions, before);
    }

    #[test]
    fn switching_to_blend_shape_undoes_deformation() {
        let mesh = head().with_morph_targets(["jawOpen"]);
        let mut puppet = Puppet3d::new(model(vec![mesh], vec![]));
        let before = puppet.model().meshes[0].positions.clone();

        // No morph for E, so the vertices move
        assert_eq!(
            puppet.apply_viseme(&viseme(Viseme::E, 1.0)),
            Some(AnimationStrategy::Vertex)
        );
        assert_ne!(puppet.model().meshes[0].positions, before);

        assert_eq!(
            puppet.apply_viseme(&viseme(Viseme::Aa, 1.0)),
            Some(AnimationStrategy::BlendShape)
        );
        let mesh = &puppet.model().meshes[0];
        assert_eq!(mesh.positions, before);
        assert_eq!(mesh.morph_influence("jawOpen"), Some(1.0));
    }

    #[test]
    fn reset_pose_undoes_deformation() {
        let mut puppet = Puppet3d::new(model(vec![head()], vec![]));
        let before = puppet.model().meshes[0].positions.clone();

        puppet.apply_viseme(&viseme(Viseme::Aa, 1.0));
        puppet.reset_pose();

        assert_eq!(puppet.model().meshes[0].positions, before);
    }

    #[test]
    fn nothing_to_animate() {
        let mut puppet = Puppet3d::new(model(vec![Mesh::new("empty", vec![])], vec![]));

        let report = puppet.load_report();
        assert!(!report.landmarks_detected);
        assert_eq!(report.strategy, None);
        assert_eq!(puppet.apply_viseme(&viseme(Viseme::Aa, 1.0)), None);

        // Head rotation still works
        puppet.apply_head_rotation(&Rotation::new(0.2, 0.4, 1.0));
        assert!((puppet.model().rotation - Vec3::new(0.1, 0.2, 0.3)).length() < 1e-6);
    }

    #[test]
    fn target_mesh_selection() {
        let small = Mesh::new("eyes", vec![Vec3::ZERO; 3]);
        let morphs = Mesh::new("face", vec![Vec3::ZERO; 2]).with_morph_targets(["aa"]);

        let puppet = Puppet3d::new(model(vec![small, head()], vec![]));
        assert_eq!(puppet.load_report().target_mesh.as_deref(), Some("head"));

        let puppet = Puppet3d::new(model(vec![head(), morphs], vec![]));
        assert_eq!(puppet.load_report().target_mesh.as_deref(), Some("face"));
    }

    #[test]
    fn reset_pose() {
        let mut puppet = Puppet3d::new(model(vec![head()], vec![Bone::new("chin")]));

        puppet.visit(&AvatarState {
            rotation: Rotation::new(0.5, 0.5, 0.5),
            viseme: Some(viseme(Viseme::O, 1.0)),
            ..Default::default()
        });
        assert_ne!(puppet.model().bones[0].rotation, Vec3::ZERO);
        assert_ne!(puppet.model().rotation, Vec3::ZERO);

        puppet.reset_pose();

        assert_eq!(puppet.model().bones[0].rotation, Vec3::ZERO);
        assert_eq!(puppet.model().rotation, Vec3::ZERO);
        assert_eq!(puppet.last_strategy(), None);
    }
}
