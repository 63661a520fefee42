//! Posing collaborator: whatever places joints on a skeleton.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::skeleton::{joint_index, Frame, Vec3, JOINT_NAMES};

/// Joint positions of one frame, addressable by canonical joint name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    positions: Frame,
}

impl Pose {
    pub fn new(positions: Frame) -> Self {
        Self { positions }
    }

    pub fn get(&self, joint_name: &str) -> Option<Vec3> {
        joint_index(joint_name).map(|index| self.positions[index])
    }

    pub fn positions(&self) -> &Frame {
        &self.positions
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Vec3)> + '_ {
        JOINT_NAMES.iter().copied().zip(self.positions.iter().copied())
    }
}

/// Receives a pose each time the visible frame changes or is edited.
pub trait Poser: Send {
    fn apply_pose(&mut self, pose: &Pose);
}

/// A skeleton root with named child nodes, each taking the local position
/// of the joint with the same name.
#[derive(Debug, Default, Clone)]
pub struct SkeletonRig {
    children: Vec<String>,
    local_positions: HashMap<String, Vec3>,
    reported: HashSet<String>,
    poses_applied: usize,
}

impl SkeletonRig {
    pub fn new<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            children: children.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Rig with one child per canonical joint.
    pub fn canonical() -> Self {
        Self::new(JOINT_NAMES)
    }

    pub fn local_position(&self, child: &str) -> Option<Vec3> {
        self.local_positions.get(child).copied()
    }

    pub fn poses_applied(&self) -> usize {
        self.poses_applied
    }
}

impl Poser for SkeletonRig {
    fn apply_pose(&mut self, pose: &Pose) {
        for child in &self.children {
            match pose.get(child) {
                Some(position) => {
                    self.local_positions.insert(child.clone(), position);
                }
                None => {
                    if self.reported.insert(child.clone()) {
                        warn!(child = %child, "skeleton child is not a known joint, ignoring");
                    }
                }
            }
        }
        self.poses_applied += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::JOINT_COUNT;

    fn indexed_pose() -> Pose {
        let mut frame = [Vec3::ZERO; JOINT_COUNT];
        for (index, joint) in frame.iter_mut().enumerate() {
            *joint = Vec3::new(index as f32, 0.0, 0.0);
        }
        Pose::new(frame)
    }

    #[test]
    fn places_children_by_joint_name() {
        let mut rig = SkeletonRig::canonical();
        rig.apply_pose(&indexed_pose());

        assert_eq!(rig.local_position("hip"), Some(Vec3::ZERO));
        assert_eq!(rig.local_position("lThighBend"), Some(Vec3::new(2.0, 0.0, 0.0)));
        assert_eq!(rig.local_position("rThumb2"), Some(Vec3::new(22.0, 0.0, 0.0)));
        assert_eq!(rig.poses_applied(), 1);
    }

    #[test]
    fn unknown_children_are_ignored() {
        let mut rig = SkeletonRig::new(["head", "tail"]);
        rig.apply_pose(&indexed_pose());
        rig.apply_pose(&indexed_pose());

        assert_eq!(rig.local_position("head"), Some(Vec3::new(15.0, 0.0, 0.0)));
        assert_eq!(rig.local_position("tail"), None);
        assert_eq!(rig.poses_applied(), 2);
    }

    #[test]
    fn pose_iterates_in_joint_order() {
        let pose = indexed_pose();
        let names: Vec<&str> = pose.iter().map(|(name, _)| name).collect();
        assert_eq!(names[0], "hip");
        assert_eq!(names[23], "lThumb2");
        assert_eq!(pose.get("spine"), Some(Vec3::new(6.0, 0.0, 0.0)));
    }
}
