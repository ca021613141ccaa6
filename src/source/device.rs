// src/source/device.rs - boundary to the external depth-sensor driver
use std::time::Duration;

use image::RgbImage;
use nalgebra::Isometry3;
use thiserror::Error;

use crate::calibration::CameraIntrinsics;
use crate::error::Result;
use crate::frame::DepthImage;

/// One color and one depth frame as delivered by the driver, before
/// synchronization checks and alignment.
#[derive(Debug, Clone)]
pub struct RawFrameSet {
    pub color: RgbImage,
    pub depth: DepthImage,
    pub color_timestamp: Duration,
    pub depth_timestamp: Duration,
}

/// Static stream layout reported by a device when it is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamGeometry {
    pub color_size: (u32, u32),
    pub color_intrinsics: CameraIntrinsics,
    pub depth_size: (u32, u32),
    /// `depth_scale` here describes the raw depth units.
    pub depth_intrinsics: CameraIntrinsics,
    pub depth_to_color: Isometry3<f64>,
    pub nominal_fps: f64,
}

impl StreamGeometry {
    /// Depth already registered to the color grid by the driver.
    pub fn registered(size: (u32, u32), intrinsics: CameraIntrinsics, nominal_fps: f64) -> Self {
        Self {
            color_size: size,
            color_intrinsics: intrinsics,
            depth_size: size,
            depth_intrinsics: intrinsics,
            depth_to_color: Isometry3::identity(),
            nominal_fps,
        }
    }
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no frames within {0:?}")]
    Timeout(Duration),
    #[error("device disconnected: {0}")]
    Disconnected(String),
    #[error("device failure: {0}")]
    Failure(String),
}

/// A live color+depth sensor.
///
/// Implementations wrap a vendor driver. `wait_for_frames` must return
/// within `timeout`; `stop` releases the hardware and is called exactly once.
pub trait DepthDevice: Send {
    fn name(&self) -> &str;
    fn geometry(&self) -> StreamGeometry;
    fn wait_for_frames(&mut self, timeout: Duration) -> std::result::Result<RawFrameSet, DeviceError>;
    fn stop(&mut self);
}

/// Resolves a device identifier (serial number, index, URI) to an opened device.
pub trait DeviceConnector {
    fn connect(&self, device_id: &str) -> Result<Box<dyn DepthDevice>>;
}
