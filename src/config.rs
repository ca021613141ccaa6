// src/config.rs - config.toml layout and defaults
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{MirrorError, Result};
use crate::geometry::unproject::MAX_MEDIAN_RADIUS;
use crate::geometry::UnprojectOptions;
use crate::overlay::{
    Background, DisplayMapping, OverlayStyle, MAX_LINE_THICKNESS, MAX_MARKER_RADIUS,
};
use crate::pipeline::PipelineOptions;
use crate::pose::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::source::{SourceDescriptor, SourceOptions};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub depth: DepthConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Device identifier passed to the device backend.
    #[serde(default)]
    pub live_device: Option<String>,
    /// Recorded session directory; takes precedence over `live_device`.
    #[serde(default)]
    pub playback: Option<PathBuf>,
    #[serde(default = "default_loop_playback")]
    pub loop_playback: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Largest accepted gap between color and depth capture times.
    #[serde(default = "default_sync_tolerance_ms")]
    pub sync_tolerance_ms: u64,
    #[serde(default = "default_max_consecutive_drops")]
    pub max_consecutive_drops: u32,
}

fn default_loop_playback() -> bool { true }
fn default_timeout_ms() -> u64 { 1000 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_backoff_ms() -> u64 { 50 }
fn default_sync_tolerance_ms() -> u64 { 20 }
fn default_max_consecutive_drops() -> u32 { 30 }

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            live_device: None,
            playback: None,
            loop_playback: default_loop_playback(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            sync_tolerance_ms: default_sync_tolerance_ms(),
            max_consecutive_drops: default_max_consecutive_drops(),
        }
    }
}

impl SourceConfig {
    pub fn descriptor(&self) -> Result<SourceDescriptor> {
        if let Some(dir) = &self.playback {
            return Ok(SourceDescriptor::Playback {
                dir: dir.clone(),
                loop_playback: self.loop_playback,
            });
        }
        if let Some(device_id) = &self.live_device {
            return Ok(SourceDescriptor::Live {
                device_id: device_id.clone(),
            });
        }
        Err(MirrorError::config(
            "no frame source configured: set source.playback or source.live_device",
        ))
    }

    pub fn options(&self) -> SourceOptions {
        SourceOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            sync_tolerance: Duration::from_millis(self.sync_tolerance_ms),
            max_consecutive_drops: self.max_consecutive_drops,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_calibration_path")]
    pub path: PathBuf,
}

fn default_calibration_path() -> PathBuf { PathBuf::from("calibration.json") }

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            path: default_calibration_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoseConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

fn default_confidence_threshold() -> f32 { DEFAULT_CONFIDENCE_THRESHOLD }

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepthConfig {
    /// 0 samples the single pixel under the keypoint.
    #[serde(default = "default_median_radius")]
    pub median_radius: u32,
    #[serde(default = "default_max_depth_m")]
    pub max_depth_m: f64,
}

fn default_median_radius() -> u32 { crate::geometry::unproject::DEFAULT_MEDIAN_RADIUS }
fn default_max_depth_m() -> f64 { crate::geometry::unproject::DEFAULT_MAX_DEPTH_M }

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            median_radius: default_median_radius(),
            max_depth_m: default_max_depth_m(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverlayConfig {
    #[serde(default)]
    pub style: OverlayStyle,
    #[serde(default)]
    pub mapping: DisplayMapping,
    #[serde(default)]
    pub background: Background,
    /// Draw camera-pixel keypoints when no mirror calibration is loaded.
    #[serde(default)]
    pub camera_fallback: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Run pose estimation on its own thread.
    #[serde(default)]
    pub offload_estimation: bool,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default = "default_pace_playback")]
    pub pace_playback: bool,
    #[serde(default)]
    pub max_frames: Option<u64>,
}

fn default_queue_depth() -> usize { 2 }
fn default_pace_playback() -> bool { true }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            offload_estimation: false,
            queue_depth: default_queue_depth(),
            pace_playback: default_pace_playback(),
            max_frames: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
    /// Write a timestamped tracks CSV into `directory` on every run.
    #[serde(default)]
    pub export_tracks: bool,
}

fn default_output_directory() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.document_dir().map(|p| p.join("MirrorOverlay")))
        .unwrap_or_else(|| PathBuf::from("./output"))
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            export_tracks: false,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| MirrorError::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&content).map_err(|e| match e {
            MirrorError::ConfigurationError(reason) => {
                MirrorError::config(format!("{}: {reason}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| MirrorError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.pose.confidence_threshold) {
            return Err(MirrorError::config(format!(
                "pose.confidence_threshold must be within [0, 1], got {}",
                self.pose.confidence_threshold
            )));
        }
        if self.source.timeout_ms == 0 {
            return Err(MirrorError::config("source.timeout_ms must be positive"));
        }
        if !(self.depth.max_depth_m.is_finite() && self.depth.max_depth_m > 0.0) {
            return Err(MirrorError::config("depth.max_depth_m must be positive"));
        }
        if self.pipeline.queue_depth == 0 {
            return Err(MirrorError::config("pipeline.queue_depth must be at least 1"));
        }
        if self.depth.median_radius > MAX_MEDIAN_RADIUS {
            return Err(MirrorError::config(format!(
                "depth.median_radius must be at most {MAX_MEDIAN_RADIUS}, got {}",
                self.depth.median_radius
            )));
        }
        let style = &self.overlay.style;
        if !(0..=MAX_MARKER_RADIUS).contains(&style.marker_radius) {
            return Err(MirrorError::config(format!(
                "overlay.style.marker_radius must be within [0, {MAX_MARKER_RADIUS}], got {}",
                style.marker_radius
            )));
        }
        if !(1..=MAX_LINE_THICKNESS).contains(&style.line_thickness) {
            return Err(MirrorError::config(format!(
                "overlay.style.line_thickness must be within [1, {MAX_LINE_THICKNESS}], got {}",
                style.line_thickness
            )));
        }
        let ppm = self.overlay.mapping.pixels_per_meter;
        if !(ppm.is_finite() && ppm > 0.0) {
            return Err(MirrorError::config(
                "overlay.mapping.pixels_per_meter must be positive",
            ));
        }
        Ok(())
    }

    pub fn unproject_options(&self) -> UnprojectOptions {
        UnprojectOptions {
            median_radius: self.depth.median_radius,
            max_depth_m: self.depth.max_depth_m,
        }
    }

    pub fn pipeline_options(&self) -> Result<PipelineOptions> {
        Ok(PipelineOptions {
            source: self.source.descriptor()?,
            source_options: self.source.options(),
            calibration_path: self.calibration.path.clone(),
            confidence_threshold: self.pose.confidence_threshold,
            unproject: self.unproject_options(),
            mapping: self.overlay.mapping,
            style: self.overlay.style,
            background: self.overlay.background,
            camera_fallback: self.overlay.camera_fallback,
            offload_estimation: self.pipeline.offload_estimation,
            queue_depth: self.pipeline.queue_depth,
            pace_playback: self.pipeline.pace_playback,
            max_frames: self.pipeline.max_frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert!(config.source.loop_playback);
        assert_eq!(config.source.timeout_ms, 1000);
        assert_eq!(config.source.max_retries, 3);
        assert_eq!(config.calibration.path, PathBuf::from("calibration.json"));
        assert_eq!(config.pose.confidence_threshold, 0.5);
        assert_eq!(config.depth.median_radius, 1);
        assert_eq!(config.overlay.style, OverlayStyle::default());
        assert!(!config.overlay.camera_fallback);
        assert_eq!(config.pipeline.queue_depth, 2);
        assert!(config.source.descriptor().is_err());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [source]
            playback = "sessions/demo"
            loop_playback = false
            sync_tolerance_ms = 5

            [overlay]
            background = "blank"

            [overlay.style]
            marker_radius = 7

            [overlay.mapping]
            flip_horizontal = false
            "#,
        )
        .unwrap();

        assert_eq!(
            config.source.descriptor().unwrap(),
            SourceDescriptor::Playback {
                dir: PathBuf::from("sessions/demo"),
                loop_playback: false,
            }
        );
        assert_eq!(config.source.options().sync_tolerance, Duration::from_millis(5));
        assert_eq!(config.source.options().max_consecutive_drops, 30);
        assert_eq!(config.overlay.background, Background::Blank);
        assert_eq!(config.overlay.style.marker_radius, 7);
        assert_eq!(config.overlay.style.line_thickness, 2);
        assert!(!config.overlay.mapping.flip_horizontal);
        assert_eq!(config.overlay.mapping.pixels_per_meter, 500.0);
    }

    #[test]
    fn playback_wins_over_live_device() {
        let config = Config::from_toml(
            r#"
            [source]
            live_device = "cam0"
            playback = "rec"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.source.descriptor().unwrap(),
            SourceDescriptor::Playback { .. }
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        for body in [
            "[pose]\nconfidence_threshold = 1.5",
            "[pipeline]\nqueue_depth = 0",
            "[depth]\nmax_depth_m = -1.0",
            "[source]\ntimeout_ms = 0",
            "[depth]\nmedian_radius = 4294967295",
            "[overlay.style]\nmarker_radius = 50000",
            "[overlay.style]\nmarker_radius = -1",
            "[overlay.style]\nline_thickness = 0",
            "[overlay.style]\nline_thickness = 65",
        ] {
            let err = Config::from_toml(body).unwrap_err();
            assert!(matches!(err, MirrorError::ConfigurationError(_)), "{body}");
        }
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let err = Config::from_toml("[source\nplayback = 3").unwrap_err();
        assert!(matches!(err, MirrorError::ConfigurationError(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[calibration]\npath = \"mirror.json\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.calibration.path, PathBuf::from("mirror.json"));
        assert!(!config.output.export_tracks);

        assert!(Config::load(dir.path().join("missing.toml")).is_err());
    }
}
