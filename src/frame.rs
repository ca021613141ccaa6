// src/frame.rs
use std::time::Duration;

use image::{ImageBuffer, Luma, RgbImage};

use crate::error::{MirrorError, Result};

/// Raw depth samples, one `u16` per pixel in sensor units.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Color and depth captured for the same instant on the same pixel grid.
///
/// Created once per acquisition cycle and dropped at the end of the tick.
#[derive(Debug, Clone)]
pub struct FramePair {
    color: RgbImage,
    depth: DepthImage,
    pub timestamp: Duration,
    pub sequence_index: u64,
}

impl FramePair {
    pub fn new(
        color: RgbImage,
        depth: DepthImage,
        timestamp: Duration,
        sequence_index: u64,
    ) -> Result<Self> {
        if color.dimensions() != depth.dimensions() {
            return Err(MirrorError::fault(format!(
                "color {:?} and depth {:?} grids differ",
                color.dimensions(),
                depth.dimensions()
            )));
        }
        Ok(Self {
            color,
            depth,
            timestamp,
            sequence_index,
        })
    }

    pub fn color(&self) -> &RgbImage {
        &self.color
    }

    pub fn depth(&self) -> &DepthImage {
        &self.depth
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.color.dimensions()
    }
}
