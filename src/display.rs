// src/display.rs - boundary to whatever shows the composited frame
use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use tracing::info;

use crate::error::{MirrorError, Result};

/// What the display wants the pipeline to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplaySignal {
    Continue,
    Pause,
    Resume,
    Stop,
}

/// Receives one composited frame per tick.
pub trait DisplaySink {
    fn present(&mut self, frame: &RgbImage, sequence_index: u64) -> Result<DisplaySignal>;
}

/// Discards frames.
#[derive(Debug, Default)]
pub struct NullSink {
    presented: u64,
}

impl NullSink {
    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl DisplaySink for NullSink {
    fn present(&mut self, _frame: &RgbImage, _sequence_index: u64) -> Result<DisplaySignal> {
        self.presented += 1;
        Ok(DisplaySignal::Continue)
    }
}

/// Writes every composited frame as `overlay_NNNNNN.png`.
///
/// Files are numbered by presentation order, so a looping playback keeps
/// producing new files instead of overwriting the first pass.
#[derive(Debug)]
pub struct PngSequenceSink {
    dir: PathBuf,
    written: u64,
}

impl PngSequenceSink {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| MirrorError::io(&dir, e))?;
        info!(dir = %dir.display(), "writing overlay frames");
        Ok(Self { dir, written: 0 })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl DisplaySink for PngSequenceSink {
    fn present(&mut self, frame: &RgbImage, _sequence_index: u64) -> Result<DisplaySignal> {
        let path = self.dir.join(format!("overlay_{:06}.png", self.written));
        frame.save(&path)?;
        self.written += 1;
        Ok(DisplaySignal::Continue)
    }
}
