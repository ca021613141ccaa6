// src/source/mod.rs - synchronized color+depth acquisition
pub mod align;
pub mod device;
pub mod playback;
pub mod recorder;

use std::fmt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::calibration::CameraIntrinsics;
use crate::error::{MirrorError, Result};
use crate::frame::FramePair;

pub use align::{DepthAligner, FrameSync};
pub use device::{DepthDevice, DeviceConnector, DeviceError, RawFrameSet, StreamGeometry};
pub use playback::{PlaybackSource, SessionManifest, MANIFEST_FILE};
pub use recorder::SessionRecorder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Live,
    Playback,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Live => write!(f, "live"),
            SourceMode::Playback => write!(f, "playback"),
        }
    }
}

/// What to open.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceDescriptor {
    Live { device_id: String },
    Playback { dir: PathBuf, loop_playback: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceOptions {
    /// Upper bound on a single device wait.
    pub timeout: Duration,
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_backoff: Duration,
    pub sync_tolerance: Duration,
    pub max_consecutive_drops: u32,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            max_retries: 3,
            retry_backoff: Duration::from_millis(50),
            sync_tolerance: Duration::from_millis(20),
            max_consecutive_drops: 30,
        }
    }
}

#[derive(Debug)]
pub enum Acquired {
    Frame(FramePair),
    EndOfStream,
}

struct LiveSource {
    device: Box<dyn DepthDevice>,
    aligner: DepthAligner,
    sync: FrameSync,
    options: SourceOptions,
    origin: Option<Duration>,
    next_index: u64,
    faulted: bool,
    stopped: bool,
}

impl LiveSource {
    fn acquire(&mut self) -> Result<FramePair> {
        if self.faulted {
            return Err(MirrorError::fault(format!(
                "{} is no longer delivering frames",
                self.device.name()
            )));
        }

        let mut backoff = self.options.retry_backoff;
        let mut retries = 0;
        loop {
            match self.wait_synchronized() {
                Ok(pair) => return Ok(pair),
                Err(MirrorError::AcquisitionTimeout { waited }) if retries < self.options.max_retries => {
                    retries += 1;
                    warn!(
                        device = self.device.name(),
                        ?waited,
                        retry = retries,
                        max_retries = self.options.max_retries,
                        "acquisition timed out, retrying"
                    );
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                Err(MirrorError::AcquisitionTimeout { waited }) => {
                    self.faulted = true;
                    return Err(MirrorError::fault(format!(
                        "{} delivered no frames after {} retries ({:?} per wait)",
                        self.device.name(),
                        retries,
                        waited
                    )));
                }
                Err(e) => {
                    self.faulted = true;
                    return Err(e);
                }
            }
        }
    }

    fn wait_synchronized(&mut self) -> Result<FramePair> {
        loop {
            let frames = self
                .device
                .wait_for_frames(self.options.timeout)
                .map_err(|e| match e {
                    DeviceError::Timeout(waited) => MirrorError::AcquisitionTimeout { waited },
                    other => MirrorError::fault(other.to_string()),
                })?;
            if !self.sync.admit(&frames)? {
                continue;
            }

            let depth = self.aligner.align(frames.depth)?;
            let origin = *self.origin.get_or_insert(frames.color_timestamp);
            let pair = FramePair::new(
                frames.color,
                depth,
                frames.color_timestamp.saturating_sub(origin),
                self.next_index,
            )?;
            self.next_index += 1;
            return Ok(pair);
        }
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.device.stop();
            info!(device = self.device.name(), "device released");
        }
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Backend {
    Live(LiveSource),
    Playback(PlaybackSource),
    Closed,
}

/// A live sensor or a recorded session behind one `next()` interface.
///
/// Dropping the source releases the device, so error paths that never
/// reach [`FrameSource::close`] still free the hardware.
pub struct FrameSource {
    backend: Backend,
    mode: SourceMode,
    nominal_fps: f64,
    color_intrinsics: Option<CameraIntrinsics>,
}

impl FrameSource {
    pub fn open(
        descriptor: &SourceDescriptor,
        options: &SourceOptions,
        connector: Option<&dyn DeviceConnector>,
    ) -> Result<Self> {
        match descriptor {
            SourceDescriptor::Live { device_id } => {
                let connector = connector.ok_or_else(|| {
                    MirrorError::config(format!(
                        "live device '{device_id}' requested but no device backend is available"
                    ))
                })?;
                let device = connector.connect(device_id)?;
                Self::open_live(device, options)
            }
            SourceDescriptor::Playback { dir, loop_playback } => {
                Self::open_playback(dir, *loop_playback)
            }
        }
    }

    pub fn open_live(mut device: Box<dyn DepthDevice>, options: &SourceOptions) -> Result<Self> {
        let geometry = device.geometry();
        let aligner = match DepthAligner::new(geometry.clone()) {
            Ok(aligner) => aligner,
            Err(e) => {
                device.stop();
                return Err(e);
            }
        };
        info!(
            device = device.name(),
            color = ?geometry.color_size,
            depth = ?geometry.depth_size,
            fps = geometry.nominal_fps,
            registered = aligner.is_passthrough(),
            "live source opened"
        );
        Ok(Self {
            backend: Backend::Live(LiveSource {
                device,
                aligner,
                sync: FrameSync::new(options.sync_tolerance, options.max_consecutive_drops),
                options: options.clone(),
                origin: None,
                next_index: 0,
                faulted: false,
                stopped: false,
            }),
            mode: SourceMode::Live,
            nominal_fps: geometry.nominal_fps,
            color_intrinsics: Some(geometry.color_intrinsics),
        })
    }

    pub fn open_playback(dir: impl AsRef<Path>, loop_playback: bool) -> Result<Self> {
        let playback = PlaybackSource::open(dir, loop_playback)?;
        let nominal_fps = playback.manifest().fps;
        Ok(Self {
            backend: Backend::Playback(playback),
            mode: SourceMode::Playback,
            nominal_fps,
            color_intrinsics: None,
        })
    }

    /// Blocks until the next synchronized pair is available.
    ///
    /// Live sources retry timeouts with backoff and then fail once with
    /// `AcquisitionFault`; every later call fails immediately.
    pub fn next(&mut self) -> Result<Acquired> {
        match &mut self.backend {
            Backend::Live(live) => live.acquire().map(Acquired::Frame),
            Backend::Playback(playback) => Ok(match playback.next_frame()? {
                Some(pair) => Acquired::Frame(pair),
                None => Acquired::EndOfStream,
            }),
            Backend::Closed => Err(MirrorError::fault("frame source is closed")),
        }
    }

    /// Releases the device. Safe to call more than once.
    pub fn close(&mut self) {
        if !matches!(self.backend, Backend::Closed) {
            debug!(mode = %self.mode, "closing frame source");
            self.backend = Backend::Closed;
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.backend, Backend::Closed)
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn nominal_fps(&self) -> f64 {
        self.nominal_fps
    }

    /// Color-stream intrinsics reported by a live device.
    pub fn color_intrinsics(&self) -> Option<&CameraIntrinsics> {
        self.color_intrinsics.as_ref()
    }

    /// Frame sets discarded by the synchronization gate.
    pub fn dropped_frames(&self) -> u64 {
        match &self.backend {
            Backend::Live(live) => live.sync.dropped(),
            _ => 0,
        }
    }
}
