// src/source/align.rs - depth registration and color/depth pairing
use std::time::Duration;

use nalgebra::{Isometry3, Point3};
use tracing::debug;

use super::device::{RawFrameSet, StreamGeometry};
use crate::error::{MirrorError, Result};
use crate::frame::DepthImage;
use crate::geometry::project;

/// Re-samples depth frames onto the color pixel grid.
///
/// Output samples are expressed in the raw units of the color intrinsics'
/// `depth_scale`, so downstream unprojection only needs one set of intrinsics.
#[derive(Debug, Clone)]
pub struct DepthAligner {
    geometry: StreamGeometry,
    passthrough: bool,
}

impl DepthAligner {
    pub fn new(geometry: StreamGeometry) -> Result<Self> {
        geometry.color_intrinsics.validate()?;
        geometry.depth_intrinsics.validate()?;
        let passthrough = geometry.color_size == geometry.depth_size
            && geometry.color_intrinsics == geometry.depth_intrinsics
            && geometry.depth_to_color == Isometry3::identity();
        debug!(passthrough, "depth aligner ready");
        Ok(Self {
            geometry,
            passthrough,
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    pub fn align(&self, depth: DepthImage) -> Result<DepthImage> {
        if depth.dimensions() != self.geometry.depth_size {
            return Err(MirrorError::fault(format!(
                "depth frame is {:?}, stream reported {:?}",
                depth.dimensions(),
                self.geometry.depth_size
            )));
        }
        if self.passthrough {
            return Ok(depth);
        }

        let d = &self.geometry.depth_intrinsics;
        let c = &self.geometry.color_intrinsics;
        let (width, height) = self.geometry.color_size;
        let mut out = DepthImage::new(width, height);

        for (u, v, sample) in depth.enumerate_pixels() {
            let raw = sample[0];
            if raw == 0 {
                continue;
            }
            let z = f64::from(raw) * d.depth_scale;
            let camera = Point3::new(
                (f64::from(u) - d.cx) * z / d.fx,
                (f64::from(v) - d.cy) * z / d.fy,
                z,
            );
            let moved = self.geometry.depth_to_color * camera;
            let Some((x, y)) = project(&moved, c) else {
                continue;
            };
            let (x, y) = (x.round(), y.round());
            if x < 0.0 || y < 0.0 || x >= f64::from(width) || y >= f64::from(height) {
                continue;
            }
            let value = (moved.z / c.depth_scale).round();
            if !(1.0..=f64::from(u16::MAX)).contains(&value) {
                continue;
            }
            let value = value as u16;
            let slot = &mut out.get_pixel_mut(x as u32, y as u32)[0];
            // nearest surface wins
            if *slot == 0 || value < *slot {
                *slot = value;
            }
        }
        Ok(out)
    }
}

/// Drops color/depth sets whose capture times are too far apart.
#[derive(Debug, Clone)]
pub struct FrameSync {
    tolerance: Duration,
    max_consecutive_drops: u32,
    consecutive: u32,
    dropped: u64,
}

impl FrameSync {
    pub fn new(tolerance: Duration, max_consecutive_drops: u32) -> Self {
        Self {
            tolerance,
            max_consecutive_drops,
            consecutive: 0,
            dropped: 0,
        }
    }

    /// `Ok(true)` keeps the set, `Ok(false)` drops it. Once more than
    /// `max_consecutive_drops` sets in a row have been dropped the stream is
    /// considered broken.
    pub fn admit(&mut self, frames: &RawFrameSet) -> Result<bool> {
        let skew = if frames.color_timestamp > frames.depth_timestamp {
            frames.color_timestamp - frames.depth_timestamp
        } else {
            frames.depth_timestamp - frames.color_timestamp
        };
        if skew <= self.tolerance {
            self.consecutive = 0;
            return Ok(true);
        }

        self.consecutive += 1;
        self.dropped += 1;
        debug!(
            skew_ms = skew.as_secs_f64() * 1000.0,
            consecutive = self.consecutive,
            "dropping unsynchronized frame set"
        );
        if self.consecutive > self.max_consecutive_drops {
            return Err(MirrorError::fault(format!(
                "frame drop beyond tolerance: {} consecutive sets skewed more than {:?}",
                self.consecutive, self.tolerance
            )));
        }
        Ok(false)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
