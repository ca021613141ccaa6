// src/source/recorder.rs - writes sessions in the layout PlaybackSource reads
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use super::playback::{color_frame_path, depth_frame_path, SessionManifest};
use crate::error::{MirrorError, Result};
use crate::frame::FramePair;
use crate::pose::{DetectedPose, LogHeader, LANDMARK_LOG_FILE};

pub struct SessionRecorder {
    dir: PathBuf,
    fps: f64,
    size: Option<(u32, u32)>,
    timestamps_ms: Vec<f64>,
    landmarks: Option<BufWriter<File>>,
    finished: bool,
}

impl SessionRecorder {
    /// Records into `dir`, creating it if needed.
    pub fn create(dir: impl AsRef<Path>, fps: f64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !(fps.is_finite() && fps > 0.0) {
            return Err(MirrorError::config(format!("invalid recording fps {fps}")));
        }
        fs::create_dir_all(&dir).map_err(|e| MirrorError::io(&dir, e))?;
        info!(dir = %dir.display(), fps, "recording session");
        Ok(Self {
            dir,
            fps,
            size: None,
            timestamps_ms: Vec::new(),
            landmarks: None,
            finished: false,
        })
    }

    /// Records into a new `recording_YYYYmmdd_HHMMSS` directory under `parent`.
    pub fn create_timestamped(parent: impl AsRef<Path>, fps: f64) -> Result<Self> {
        let name = Local::now().format("recording_%Y%m%d_%H%M%S").to_string();
        Self::create(parent.as_ref().join(name), fps)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frame_count(&self) -> u64 {
        self.timestamps_ms.len() as u64
    }

    pub fn record(&mut self, pair: &FramePair) -> Result<()> {
        let size = pair.dimensions();
        match self.size {
            None => self.size = Some(size),
            Some(expected) if expected != size => {
                return Err(MirrorError::fault(format!(
                    "frame is {size:?} but the recording is {expected:?}"
                )));
            }
            Some(_) => {}
        }

        let index = self.frame_count();
        pair.color().save(color_frame_path(&self.dir, index))?;
        pair.depth().save(depth_frame_path(&self.dir, index))?;
        self.timestamps_ms.push(pair.timestamp.as_micros() as f64 / 1000.0);
        Ok(())
    }

    /// Appends one line to the landmark log. Call once per recorded frame
    /// to keep the log aligned with the frames. The log starts with a
    /// [`LogHeader`] naming the joint set.
    pub fn record_landmarks(&mut self, pose: Option<&DetectedPose>) -> Result<()> {
        let path = self.dir.join(LANDMARK_LOG_FILE);
        if self.landmarks.is_none() {
            let file = File::create(&path).map_err(|e| MirrorError::io(&path, e))?;
            let mut writer = BufWriter::new(file);
            let header = serde_json::to_string(&LogHeader::current())?;
            writeln!(writer, "{header}").map_err(|e| MirrorError::io(&path, e))?;
            self.landmarks = Some(writer);
        }
        let line = serde_json::to_string(&pose)?;
        if let Some(writer) = self.landmarks.as_mut() {
            writeln!(writer, "{line}").map_err(|e| MirrorError::io(&path, e))?;
        }
        Ok(())
    }

    /// Flushes the landmark log and writes `session.json`.
    pub fn finish(mut self) -> Result<SessionManifest> {
        self.finished = true;
        self.write_manifest()
    }

    fn write_manifest(&mut self) -> Result<SessionManifest> {
        if let Some(writer) = self.landmarks.as_mut() {
            let path = self.dir.join(LANDMARK_LOG_FILE);
            writer.flush().map_err(|e| MirrorError::io(&path, e))?;
        }
        let (width, height) = self
            .size
            .ok_or_else(|| MirrorError::fault("no frames were recorded"))?;
        let manifest = SessionManifest {
            width,
            height,
            fps: self.fps,
            frame_count: self.frame_count(),
            timestamps_ms: self.timestamps_ms.clone(),
        };
        manifest.save(&self.dir)?;
        info!(dir = %self.dir.display(), frames = manifest.frame_count, "recording saved");
        Ok(manifest)
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        if self.finished || self.timestamps_ms.is_empty() {
            return;
        }
        if let Err(e) = self.write_manifest() {
            warn!(error = %e, dir = %self.dir.display(), "failed to finalize recording");
        }
    }
}
