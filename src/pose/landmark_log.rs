// src/pose/landmark_log.rs - replays detections stored next to a recording
use std::fs;
use std::path::Path;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::estimator::{DetectedPose, PoseDetector};
use super::joint::JOINT_SET_VERSION;
use crate::error::{MirrorError, Result};

/// File name used for detections stored next to a recorded session.
pub const LANDMARK_LOG_FILE: &str = "landmarks.jsonl";

/// First line of a landmark log written by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogHeader {
    pub joint_set_version: u32,
}

impl LogHeader {
    pub fn current() -> Self {
        Self {
            joint_set_version: JOINT_SET_VERSION,
        }
    }
}

/// Replays detections captured at record time.
///
/// Each line of the log is either `null` (no subject) or a [`DetectedPose`],
/// optionally preceded by a [`LogHeader`]. Entries are returned in call order
/// and wrap at the end, matching a looping playback source that feeds every
/// frame to the estimator.
#[derive(Debug, Default)]
pub struct LandmarkLogDetector {
    entries: Vec<Option<DetectedPose>>,
    cursor: usize,
}

impl LandmarkLogDetector {
    /// Fails with `ConfigurationError` when the header names another joint set.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| MirrorError::io(path, e))?;
        let mut lines = content.lines().filter(|line| !line.trim().is_empty()).peekable();

        if let Some(header) = lines
            .peek()
            .and_then(|first| serde_json::from_str::<LogHeader>(first).ok())
        {
            if header.joint_set_version != JOINT_SET_VERSION {
                return Err(MirrorError::config(format!(
                    "{} uses joint set v{}, expected v{JOINT_SET_VERSION}",
                    path.display(),
                    header.joint_set_version
                )));
            }
            lines.next();
        }

        let entries = lines
            .map(serde_json::from_str::<Option<DetectedPose>>)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        info!(path = %path.display(), entries = entries.len(), "landmark log loaded");
        Ok(Self { entries, cursor: 0 })
    }

    /// A log with no entries; every frame reports no subject.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replay is by call count, so a log that does not hold exactly one
    /// entry per recorded frame would pair detections with the wrong frames.
    pub fn check_frame_count(&self, frame_count: u64) -> Result<()> {
        if !self.entries.is_empty() && self.entries.len() as u64 != frame_count {
            return Err(MirrorError::config(format!(
                "landmark log has {} entries for {frame_count} frames",
                self.entries.len()
            )));
        }
        Ok(())
    }
}

impl PoseDetector for LandmarkLogDetector {
    fn detect(&mut self, _image: &RgbImage) -> Result<Option<DetectedPose>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        let entry = self.entries[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.entries.len();
        Ok(entry)
    }
}
