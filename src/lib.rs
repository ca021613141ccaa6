// src/lib.rs
//! Depth-aligned pose overlay for calibrated mirror displays.
//!
//! Frames flow from a [`source::FrameSource`] through the
//! [`pose::PoseEstimator`], [`geometry`] unprojection and mirror mapping into
//! the [`overlay::OverlayRenderer`], all driven by [`pipeline::Pipeline`].

pub mod calibration;
pub mod config;
pub mod display;
pub mod error;
pub mod export;
pub mod frame;
pub mod geometry;
pub mod overlay;
pub mod pipeline;
pub mod pose;
pub mod source;

pub use calibration::{CalibrationStore, CalibrationTransform, CameraIntrinsics};
pub use config::Config;
pub use error::{MirrorError, Result};
pub use frame::{DepthImage, FramePair};
pub use pipeline::{Pipeline, PipelineOptions, PipelineState};
