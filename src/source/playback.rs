// src/source/playback.rs - recorded session reader
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MirrorError, Result};
use crate::frame::{DepthImage, FramePair};

pub const MANIFEST_FILE: &str = "session.json";

/// Contents of `session.json` at the root of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
    /// Capture time of each frame relative to the first. When absent the
    /// frames are assumed to be evenly spaced at `fps`.
    #[serde(default)]
    pub timestamps_ms: Vec<f64>,
}

impl SessionManifest {
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(MANIFEST_FILE);
        let content = fs::read_to_string(&path).map_err(|e| {
            MirrorError::fault(format!("cannot read {}: {e}", path.display()))
        })?;
        let manifest: Self = serde_json::from_str(&content).map_err(|e| {
            MirrorError::fault(format!("malformed {}: {e}", path.display()))
        })?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let path = dir.as_ref().join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| MirrorError::io(&path, e))
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MirrorError::fault("recording has zero-sized frames"));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(MirrorError::fault(format!("invalid recording fps {}", self.fps)));
        }
        if self.frame_count == 0 {
            return Err(MirrorError::fault("recording has no frames"));
        }
        if !self.timestamps_ms.is_empty() && self.timestamps_ms.len() as u64 != self.frame_count {
            return Err(MirrorError::fault(format!(
                "{} timestamps for {} frames",
                self.timestamps_ms.len(),
                self.frame_count
            )));
        }
        Ok(())
    }

    pub fn timestamp(&self, index: u64) -> Duration {
        let ms = match self.timestamps_ms.get(index as usize) {
            Some(&ms) => ms,
            None => index as f64 * 1000.0 / self.fps,
        };
        Duration::from_micros((ms.max(0.0) * 1000.0).round() as u64)
    }
}

pub fn color_frame_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("color_{index:06}.png"))
}

pub fn depth_frame_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("depth_{index:06}.png"))
}

/// Reads a recorded session one frame at a time.
#[derive(Debug)]
pub struct PlaybackSource {
    dir: PathBuf,
    manifest: SessionManifest,
    loop_playback: bool,
    cursor: u64,
}

impl PlaybackSource {
    pub fn open(dir: impl AsRef<Path>, loop_playback: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(MirrorError::fault(format!(
                "recording {} is not a directory",
                dir.display()
            )));
        }
        let manifest = SessionManifest::load(&dir)?;
        info!(
            recording = %dir.display(),
            frames = manifest.frame_count,
            fps = manifest.fps,
            loop_playback,
            "playback opened"
        );
        Ok(Self {
            dir,
            manifest,
            loop_playback,
            cursor: 0,
        })
    }

    pub fn manifest(&self) -> &SessionManifest {
        &self.manifest
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Decodes frame `index` from disk.
    pub fn read_frame(&self, index: u64) -> Result<FramePair> {
        if index >= self.manifest.frame_count {
            return Err(MirrorError::fault(format!(
                "frame {index} beyond recording length {}",
                self.manifest.frame_count
            )));
        }
        let color_path = color_frame_path(&self.dir, index);
        let color = image::open(&color_path)
            .map_err(|e| MirrorError::fault(format!("{}: {e}", color_path.display())))?
            .into_rgb8();

        let depth_path = depth_frame_path(&self.dir, index);
        let depth: DepthImage = match image::open(&depth_path) {
            Ok(DynamicImage::ImageLuma16(depth)) => depth,
            Ok(other) => {
                return Err(MirrorError::fault(format!(
                    "{}: expected 16-bit grayscale, found {:?}",
                    depth_path.display(),
                    other.color()
                )))
            }
            Err(e) => {
                return Err(MirrorError::fault(format!("{}: {e}", depth_path.display())));
            }
        };

        let expected = (self.manifest.width, self.manifest.height);
        if color.dimensions() != expected {
            return Err(MirrorError::fault(format!(
                "{} is {:?}, recording says {:?}",
                color_path.display(),
                color.dimensions(),
                expected
            )));
        }
        FramePair::new(color, depth, self.manifest.timestamp(index), index)
    }

    /// Next frame, or `None` once a non-looping recording is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<FramePair>> {
        if self.cursor >= self.manifest.frame_count {
            if !self.loop_playback {
                return Ok(None);
            }
            debug!("recording exhausted, rewinding");
            self.cursor = 0;
        }
        let pair = self.read_frame(self.cursor)?;
        self.cursor += 1;
        Ok(Some(pair))
    }
}
