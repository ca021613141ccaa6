// src/pose/estimator.rs - adapter between the external detector and the pipeline
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::joint::{Joint, Skeleton, SkeletonPoint};
use crate::error::Result;

/// A landmark as reported by a detector, in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    /// Relative depth estimate from the model; not used for placement.
    #[serde(default)]
    pub z: f32,
    pub visibility: f32,
}

/// Landmark index layouts the adapter knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkLayout {
    /// 33-point BlazePose / MediaPipe Pose topology.
    MediaPipe33,
    /// 17-point COCO keypoints (MoveNet, YOLO-pose).
    Coco17,
}

impl LandmarkLayout {
    pub fn landmark_count(self) -> usize {
        match self {
            LandmarkLayout::MediaPipe33 => 33,
            LandmarkLayout::Coco17 => 17,
        }
    }

    /// Index of `joint` within this layout.
    pub fn index_of(self, joint: Joint) -> usize {
        match self {
            LandmarkLayout::MediaPipe33 => match joint {
                Joint::Nose => 0,
                Joint::LeftShoulder => 11,
                Joint::RightShoulder => 12,
                Joint::LeftElbow => 13,
                Joint::RightElbow => 14,
                Joint::LeftWrist => 15,
                Joint::RightWrist => 16,
                Joint::LeftHip => 23,
                Joint::RightHip => 24,
                Joint::LeftKnee => 25,
                Joint::RightKnee => 26,
                Joint::LeftAnkle => 27,
                Joint::RightAnkle => 28,
            },
            LandmarkLayout::Coco17 => match joint {
                Joint::Nose => 0,
                Joint::LeftShoulder => 5,
                Joint::RightShoulder => 6,
                Joint::LeftElbow => 7,
                Joint::RightElbow => 8,
                Joint::LeftWrist => 9,
                Joint::RightWrist => 10,
                Joint::LeftHip => 11,
                Joint::RightHip => 12,
                Joint::LeftKnee => 13,
                Joint::RightKnee => 14,
                Joint::LeftAnkle => 15,
                Joint::RightAnkle => 16,
            },
        }
    }
}

/// Raw detector output for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPose {
    pub layout: LandmarkLayout,
    pub landmarks: Vec<Landmark>,
}

impl DetectedPose {
    /// Re-encodes an estimated skeleton as a COCO-17 detection so it can be
    /// written to a landmark log. Invalid joints and the face points the
    /// vocabulary lacks get zero visibility.
    pub fn from_skeleton(skeleton: &Skeleton<Keypoint2D>, width: u32, height: u32) -> Option<Self> {
        if skeleton.is_empty() || width == 0 || height == 0 {
            return None;
        }
        let layout = LandmarkLayout::Coco17;
        let mut landmarks = vec![
            Landmark {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                visibility: 0.0,
            };
            layout.landmark_count()
        ];
        for kp in skeleton.iter().filter(|kp| kp.valid) {
            landmarks[layout.index_of(kp.joint)] = Landmark {
                x: (kp.pixel_x / f64::from(width)) as f32,
                y: (kp.pixel_y / f64::from(height)) as f32,
                z: 0.0,
                visibility: kp.confidence,
            };
        }
        Some(Self { layout, landmarks })
    }
}

/// Black-box pose model. Returns `Ok(None)` when nobody is in view.
pub trait PoseDetector: Send {
    fn detect(&mut self, image: &RgbImage) -> Result<Option<DetectedPose>>;
}

/// A joint location in color-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint2D {
    pub joint: Joint,
    pub pixel_x: f64,
    pub pixel_y: f64,
    pub confidence: f32,
    pub valid: bool,
}

impl Keypoint2D {
    pub fn new(joint: Joint, pixel_x: f64, pixel_y: f64, confidence: f32) -> Self {
        Self {
            joint,
            pixel_x,
            pixel_y,
            confidence,
            valid: true,
        }
    }

    pub fn missing(joint: Joint) -> Self {
        Self {
            joint,
            pixel_x: 0.0,
            pixel_y: 0.0,
            confidence: 0.0,
            valid: false,
        }
    }
}

impl SkeletonPoint for Keypoint2D {
    fn joint(&self) -> Joint {
        self.joint
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Wraps a [`PoseDetector`] and normalizes its output onto the joint vocabulary.
pub struct PoseEstimator {
    detector: Box<dyn PoseDetector>,
    confidence_threshold: f32,
}

impl PoseEstimator {
    pub fn new(detector: Box<dyn PoseDetector>) -> Self {
        Self {
            detector,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    /// Runs the detector on one color image.
    ///
    /// Detector failures are logged and reported as "no subject" so a single
    /// bad inference never stops the loop.
    pub fn estimate(&mut self, image: &RgbImage) -> Skeleton<Keypoint2D> {
        match self.detector.detect(image) {
            Ok(Some(pose)) => self.to_skeleton(&pose, image.width(), image.height()),
            Ok(None) => {
                trace!("no subject detected");
                Skeleton::empty()
            }
            Err(e) => {
                warn!(error = %e, "pose detector failed; treating frame as empty");
                Skeleton::empty()
            }
        }
    }

    fn to_skeleton(&self, pose: &DetectedPose, width: u32, height: u32) -> Skeleton<Keypoint2D> {
        if pose.landmarks.len() < pose.layout.landmark_count() {
            warn!(
                expected = pose.layout.landmark_count(),
                got = pose.landmarks.len(),
                "detector returned a short landmark list"
            );
        }

        Skeleton::from_fn(|joint| {
            let Some(lm) = pose.landmarks.get(pose.layout.index_of(joint)) else {
                return Keypoint2D::missing(joint);
            };
            let confidence = lm.visibility.clamp(0.0, 1.0);
            let inside = (0.0..=1.0).contains(&lm.x) && (0.0..=1.0).contains(&lm.y);
            Keypoint2D {
                joint,
                pixel_x: f64::from(lm.x) * f64::from(width),
                pixel_y: f64::from(lm.y) * f64::from(height),
                confidence,
                valid: inside && confidence >= self.confidence_threshold,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MirrorError;

    struct Fixed(Option<DetectedPose>);

    impl PoseDetector for Fixed {
        fn detect(&mut self, _image: &RgbImage) -> Result<Option<DetectedPose>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    impl PoseDetector for Failing {
        fn detect(&mut self, _image: &RgbImage) -> Result<Option<DetectedPose>> {
            Err(MirrorError::fault("model crashed"))
        }
    }

    fn coco_pose(visibility: f32) -> DetectedPose {
        DetectedPose {
            layout: LandmarkLayout::Coco17,
            landmarks: (0..17)
                .map(|i| Landmark {
                    x: 0.05 * i as f32,
                    y: 0.5,
                    z: 0.0,
                    visibility,
                })
                .collect(),
        }
    }

    #[test]
    fn no_subject_yields_empty_skeleton() {
        let mut estimator = PoseEstimator::new(Box::new(Fixed(None)));
        assert!(estimator.estimate(&RgbImage::new(64, 48)).is_empty());
    }

    #[test]
    fn detector_error_yields_empty_skeleton() {
        let mut estimator = PoseEstimator::new(Box::new(Failing));
        assert!(estimator.estimate(&RgbImage::new(64, 48)).is_empty());
    }

    #[test]
    fn maps_coco_landmarks_to_pixels() {
        let mut estimator = PoseEstimator::new(Box::new(Fixed(Some(coco_pose(0.9)))));
        let skeleton = estimator.estimate(&RgbImage::new(640, 480));

        assert_eq!(skeleton.len(), Joint::COUNT);
        let wrist = skeleton.get(Joint::RightWrist).unwrap();
        // COCO index 10
        assert!((wrist.pixel_x - 0.5 * 640.0).abs() < 1e-3);
        assert!((wrist.pixel_y - 240.0).abs() < 1e-9);
        assert!(wrist.valid);
    }

    #[test]
    fn low_confidence_is_marked_not_dropped() {
        let mut estimator =
            PoseEstimator::new(Box::new(Fixed(Some(coco_pose(0.3))))).with_confidence_threshold(0.5);
        let skeleton = estimator.estimate(&RgbImage::new(640, 480));

        assert_eq!(skeleton.len(), Joint::COUNT);
        assert_eq!(skeleton.valid_count(), 0);
        assert_eq!(skeleton.get(Joint::LeftHip).unwrap().joint, Joint::LeftHip);
    }

    #[test]
    fn short_landmark_list_marks_missing_joints() {
        let mut pose = coco_pose(0.9);
        pose.landmarks.truncate(11);
        let mut estimator = PoseEstimator::new(Box::new(Fixed(Some(pose))));
        let skeleton = estimator.estimate(&RgbImage::new(640, 480));

        assert!(skeleton.get(Joint::RightWrist).unwrap().valid);
        assert!(!skeleton.get(Joint::LeftHip).unwrap().valid);
    }

    #[test]
    fn off_image_landmarks_are_invalid() {
        let mut pose = coco_pose(0.9);
        pose.landmarks[0].x = 1.4;
        let mut estimator = PoseEstimator::new(Box::new(Fixed(Some(pose))));
        let skeleton = estimator.estimate(&RgbImage::new(640, 480));
        assert!(!skeleton.get(Joint::Nose).unwrap().valid);
    }

    #[test]
    fn mediapipe_layout_indices() {
        assert_eq!(LandmarkLayout::MediaPipe33.index_of(Joint::LeftShoulder), 11);
        assert_eq!(LandmarkLayout::MediaPipe33.index_of(Joint::RightAnkle), 28);
        for joint in Joint::ALL {
            assert!(LandmarkLayout::Coco17.index_of(joint) < 17);
            assert!(LandmarkLayout::MediaPipe33.index_of(joint) < 33);
        }
    }

    #[test]
    fn skeleton_reencodes_through_coco_layout() {
        let mut estimator = PoseEstimator::new(Box::new(Fixed(Some(coco_pose(0.9)))));
        let mut skeleton = estimator.estimate(&RgbImage::new(640, 480));
        assert!(skeleton.valid_count() > 0);

        let pose = DetectedPose::from_skeleton(&skeleton, 640, 480).unwrap();
        let mut replayed = PoseEstimator::new(Box::new(Fixed(Some(pose))));
        let again = replayed.estimate(&RgbImage::new(640, 480));
        for (a, b) in skeleton.iter().zip(again.iter()) {
            assert_eq!(a.valid, b.valid);
            if a.valid {
                assert!((a.pixel_x - b.pixel_x).abs() < 1e-2);
                assert!((a.pixel_y - b.pixel_y).abs() < 1e-2);
            }
        }

        skeleton = Skeleton::empty();
        assert!(DetectedPose::from_skeleton(&skeleton, 640, 480).is_none());
    }
}
