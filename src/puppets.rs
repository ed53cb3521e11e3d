pub mod face_regions;
pub mod import;
pub mod mesh;
pub mod puppet_2d;
pub mod puppet_3d;

use crate::model::AvatarState;

/// Something that can be posed from tracking data.
///
/// NOTE: this isn't _really_ a visitor since only the data is being passed along,
/// but it's close enough.
pub trait Puppet {
    /// Pose the puppet for one frame. The state is already smoothed.
    fn visit(&mut self, state: &AvatarState);
}
