// src/pose/joint.rs - joint vocabulary and skeleton topology
use serde::{Deserialize, Serialize};

/// Version of the joint vocabulary shared by detectors and the overlay topology.
pub const JOINT_SET_VERSION: u32 = 1;

/// Body joints tracked by the overlay, in skeleton slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum Joint {
    Nose = 0,
    LeftShoulder = 1,
    RightShoulder = 2,
    LeftElbow = 3,
    RightElbow = 4,
    LeftWrist = 5,
    RightWrist = 6,
    LeftHip = 7,
    RightHip = 8,
    LeftKnee = 9,
    RightKnee = 10,
    LeftAnkle = 11,
    RightAnkle = 12,
}

impl Joint {
    pub const COUNT: usize = 13;

    pub const ALL: [Joint; Joint::COUNT] = [
        Joint::Nose,
        Joint::LeftShoulder,
        Joint::RightShoulder,
        Joint::LeftElbow,
        Joint::RightElbow,
        Joint::LeftWrist,
        Joint::RightWrist,
        Joint::LeftHip,
        Joint::RightHip,
        Joint::LeftKnee,
        Joint::RightKnee,
        Joint::LeftAnkle,
        Joint::RightAnkle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Joint::Nose => "nose",
            Joint::LeftShoulder => "left_shoulder",
            Joint::RightShoulder => "right_shoulder",
            Joint::LeftElbow => "left_elbow",
            Joint::RightElbow => "right_elbow",
            Joint::LeftWrist => "left_wrist",
            Joint::RightWrist => "right_wrist",
            Joint::LeftHip => "left_hip",
            Joint::RightHip => "right_hip",
            Joint::LeftKnee => "left_knee",
            Joint::RightKnee => "right_knee",
            Joint::LeftAnkle => "left_ankle",
            Joint::RightAnkle => "right_ankle",
        }
    }
}

/// Joint pairs connected by a line in the overlay.
pub const SKELETON_EDGES: [(Joint, Joint); 12] = [
    // shoulders and arms
    (Joint::LeftShoulder, Joint::RightShoulder),
    (Joint::LeftShoulder, Joint::LeftElbow),
    (Joint::LeftElbow, Joint::LeftWrist),
    (Joint::RightShoulder, Joint::RightElbow),
    (Joint::RightElbow, Joint::RightWrist),
    // torso
    (Joint::LeftShoulder, Joint::LeftHip),
    (Joint::RightShoulder, Joint::RightHip),
    (Joint::LeftHip, Joint::RightHip),
    // legs
    (Joint::LeftHip, Joint::LeftKnee),
    (Joint::LeftKnee, Joint::LeftAnkle),
    (Joint::RightHip, Joint::RightKnee),
    (Joint::RightKnee, Joint::RightAnkle),
];

/// Anything that can sit in a skeleton slot.
pub trait SkeletonPoint {
    fn joint(&self) -> Joint;
    fn is_valid(&self) -> bool;
}

/// One keypoint per [`Joint`] in [`Joint::ALL`] order, or no keypoints at
/// all when no subject was detected.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton<K> {
    keypoints: Vec<K>,
}

impl<K> Default for Skeleton<K> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K> Skeleton<K> {
    pub fn empty() -> Self {
        Self {
            keypoints: Vec::new(),
        }
    }

    /// Builds a full skeleton by asking `f` for every joint in slot order.
    pub fn from_fn(mut f: impl FnMut(Joint) -> K) -> Self {
        Self {
            keypoints: Joint::ALL.iter().map(|&joint| f(joint)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn get(&self, joint: Joint) -> Option<&K> {
        self.keypoints.get(joint.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.keypoints.iter()
    }

    /// Maps every slot, keeping the slot layout.
    pub fn map<U>(&self, f: impl FnMut(&K) -> U) -> Skeleton<U> {
        Skeleton {
            keypoints: self.keypoints.iter().map(f).collect(),
        }
    }
}

impl<K: SkeletonPoint> Skeleton<K> {
    pub fn valid_count(&self) -> usize {
        self.keypoints.iter().filter(|k| k.is_valid()).count()
    }

    /// Topology edges whose endpoints are both valid.
    pub fn valid_edges(&self) -> impl Iterator<Item = (&K, &K)> {
        SKELETON_EDGES.iter().filter_map(move |&(a, b)| {
            let start = self.get(a)?;
            let end = self.get(b)?;
            (start.is_valid() && end.is_valid()).then_some((start, end))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct Slot {
        joint: Joint,
        valid: bool,
    }

    impl SkeletonPoint for Slot {
        fn joint(&self) -> Joint {
            self.joint
        }
        fn is_valid(&self) -> bool {
            self.valid
        }
    }

    #[test]
    fn all_is_in_slot_order() {
        for (i, joint) in Joint::ALL.iter().enumerate() {
            assert_eq!(joint.index(), i);
        }
    }

    #[test]
    fn from_fn_fills_every_slot() {
        let skeleton = Skeleton::from_fn(|joint| Slot { joint, valid: true });
        assert_eq!(skeleton.len(), Joint::COUNT);
        assert_eq!(skeleton.get(Joint::LeftKnee).unwrap().joint, Joint::LeftKnee);
        assert_eq!(skeleton.valid_edges().count(), SKELETON_EDGES.len());
    }

    #[test]
    fn invalid_joint_drops_incident_edges() {
        let skeleton = Skeleton::from_fn(|joint| Slot {
            joint,
            valid: joint != Joint::LeftElbow,
        });
        assert_eq!(skeleton.valid_count(), Joint::COUNT - 1);
        assert_eq!(skeleton.valid_edges().count(), SKELETON_EDGES.len() - 2);
        assert!(skeleton
            .valid_edges()
            .all(|(a, b)| a.joint != Joint::LeftElbow && b.joint != Joint::LeftElbow));
    }

    #[test]
    fn empty_skeleton_has_no_edges() {
        let skeleton: Skeleton<Slot> = Skeleton::empty();
        assert!(skeleton.is_empty());
        assert!(skeleton.get(Joint::Nose).is_none());
        assert_eq!(skeleton.valid_edges().count(), 0);
    }

    #[test]
    fn joint_names_serialize_in_snake_case() {
        let json = serde_json::to_string(&Joint::RightAnkle).unwrap();
        assert_eq!(json, "\"right_ankle\"");
        assert_eq!(Joint::RightAnkle.name(), "right_ankle");
    }
}
