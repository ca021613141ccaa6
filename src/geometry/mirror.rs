// src/geometry/mirror.rs - camera-space to mirror-space mapping
use nalgebra::Point3;

use super::unproject::Keypoint3D;
use crate::calibration::CalibrationTransform;
use crate::pose::{Joint, Skeleton, SkeletonPoint};

/// A joint expressed in the mirror's coordinate frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MirrorPoint {
    pub joint: Joint,
    pub point: Point3<f64>,
    pub valid: bool,
}

impl SkeletonPoint for MirrorPoint {
    fn joint(&self) -> Joint {
        self.joint
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Applies `calibration` to one keypoint. Invalid keypoints and an
/// uncalibrated transform both produce an invalid result with a zeroed point.
pub fn transform(keypoint: &Keypoint3D, calibration: &CalibrationTransform) -> MirrorPoint {
    if !keypoint.valid || !calibration.valid {
        return MirrorPoint {
            joint: keypoint.joint,
            point: Point3::origin(),
            valid: false,
        };
    }
    MirrorPoint {
        joint: keypoint.joint,
        point: calibration.apply(&keypoint.point),
        valid: true,
    }
}

pub fn transform_skeleton(
    skeleton: &Skeleton<Keypoint3D>,
    calibration: &CalibrationTransform,
) -> Skeleton<MirrorPoint> {
    skeleton.map(|kp| transform(kp, calibration))
}
