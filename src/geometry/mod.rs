// src/geometry/mod.rs - camera-space lifting and mirror-space mapping
pub mod mirror;
pub mod unproject;

pub use mirror::{transform, transform_skeleton, MirrorPoint};
pub use unproject::{project, DepthUnprojector, Keypoint3D, UnprojectOptions};
