// src/pose/mod.rs - joint vocabulary, detector boundary and landmark replay
pub mod estimator;
pub mod joint;
pub mod landmark_log;

pub use estimator::{
    DetectedPose, Keypoint2D, Landmark, LandmarkLayout, PoseDetector, PoseEstimator,
    DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use joint::{Joint, Skeleton, SkeletonPoint, JOINT_SET_VERSION, SKELETON_EDGES};
pub use landmark_log::{LandmarkLogDetector, LogHeader, LANDMARK_LOG_FILE};
