// src/geometry/unproject.rs - back-projection of keypoints into camera space
use nalgebra::Point3;
use tracing::trace;

use crate::calibration::CameraIntrinsics;
use crate::error::{MirrorError, Result};
use crate::frame::DepthImage;
use crate::pose::{Joint, Keypoint2D, Skeleton, SkeletonPoint};

pub const DEFAULT_MEDIAN_RADIUS: u32 = 1;
pub const DEFAULT_MAX_DEPTH_M: f64 = 10.0;
pub const MAX_MEDIAN_RADIUS: u32 = 64;

/// A joint in camera space, metres. The point is zeroed when `valid` is false.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint3D {
    pub joint: Joint,
    pub point: Point3<f64>,
    pub valid: bool,
}

impl Keypoint3D {
    pub fn invalid(joint: Joint) -> Self {
        Self {
            joint,
            point: Point3::origin(),
            valid: false,
        }
    }
}

impl SkeletonPoint for Keypoint3D {
    fn joint(&self) -> Joint {
        self.joint
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnprojectOptions {
    /// Half-width of the median window; 0 reads the single rounded pixel.
    pub median_radius: u32,
    /// Samples farther than this are treated as sensor noise.
    pub max_depth_m: f64,
}

impl Default for UnprojectOptions {
    fn default() -> Self {
        Self {
            median_radius: DEFAULT_MEDIAN_RADIUS,
            max_depth_m: DEFAULT_MAX_DEPTH_M,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DepthUnprojector {
    options: UnprojectOptions,
}

impl DepthUnprojector {
    pub fn new(options: UnprojectOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &UnprojectOptions {
        &self.options
    }

    /// Lifts one keypoint into camera space.
    ///
    /// Geometry problems (missing depth, out-of-range sample, pixel outside
    /// the image) only invalidate this keypoint.
    pub fn unproject(
        &self,
        keypoint: &Keypoint2D,
        depth: &DepthImage,
        intrinsics: &CameraIntrinsics,
    ) -> Keypoint3D {
        if !keypoint.valid {
            return Keypoint3D::invalid(keypoint.joint);
        }
        match self.metric_depth(keypoint, depth, intrinsics) {
            Ok(z) => Keypoint3D {
                joint: keypoint.joint,
                point: Point3::new(
                    (keypoint.pixel_x - intrinsics.cx) * z / intrinsics.fx,
                    (keypoint.pixel_y - intrinsics.cy) * z / intrinsics.fy,
                    z,
                ),
                valid: true,
            },
            Err(e) => {
                trace!(joint = keypoint.joint.name(), reason = %e, "keypoint dropped");
                Keypoint3D::invalid(keypoint.joint)
            }
        }
    }

    pub fn unproject_skeleton(
        &self,
        skeleton: &Skeleton<Keypoint2D>,
        depth: &DepthImage,
        intrinsics: &CameraIntrinsics,
    ) -> Skeleton<Keypoint3D> {
        skeleton.map(|kp| self.unproject(kp, depth, intrinsics))
    }

    fn metric_depth(
        &self,
        keypoint: &Keypoint2D,
        depth: &DepthImage,
        intrinsics: &CameraIntrinsics,
    ) -> Result<f64> {
        let (width, height) = depth.dimensions();
        let px = keypoint.pixel_x.round();
        let py = keypoint.pixel_y.round();
        if !(px >= 0.0 && py >= 0.0 && px < f64::from(width) && py < f64::from(height)) {
            return Err(MirrorError::geometry(format!(
                "pixel ({px}, {py}) outside {width}x{height} depth image"
            )));
        }

        let raw = sample(depth, px as u32, py as u32, self.options.median_radius);
        if raw == 0 {
            return Err(MirrorError::geometry("no depth at keypoint"));
        }

        let z = f64::from(raw) * intrinsics.depth_scale;
        if z > self.options.max_depth_m {
            return Err(MirrorError::geometry(format!(
                "depth {z:.3} m beyond {:.3} m",
                self.options.max_depth_m
            )));
        }
        Ok(z)
    }
}

/// Median of the non-zero samples in the window centred on `(x, y)`.
/// Returns 0 when the window holds no depth at all.
fn sample(depth: &DepthImage, x: u32, y: u32, radius: u32) -> u16 {
    if radius == 0 {
        return depth.get_pixel(x, y)[0];
    }
    let radius = radius.min(MAX_MEDIAN_RADIUS);
    let (width, height) = depth.dimensions();
    let x0 = x.saturating_sub(radius);
    let y0 = y.saturating_sub(radius);
    let x1 = x.saturating_add(radius).min(width - 1);
    let y1 = y.saturating_add(radius).min(height - 1);

    let mut window: Vec<u16> = (y0..=y1)
        .flat_map(|yy| (x0..=x1).map(move |xx| (xx, yy)))
        .map(|(xx, yy)| depth.get_pixel(xx, yy)[0])
        .filter(|&d| d != 0)
        .collect();
    if window.is_empty() {
        return 0;
    }
    let mid = (window.len() - 1) / 2;
    *window.select_nth_unstable(mid).1
}

/// Forward pinhole projection; `None` for points at or behind the camera.
pub fn project(point: &Point3<f64>, intrinsics: &CameraIntrinsics) -> Option<(f64, f64)> {
    if point.z <= 0.0 {
        return None;
    }
    Some((
        intrinsics.fx * point.x / point.z + intrinsics.cx,
        intrinsics.fy * point.y / point.z + intrinsics.cy,
    ))
}
