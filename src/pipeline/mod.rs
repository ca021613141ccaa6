// src/pipeline/mod.rs - owns the acquisition-to-display loop
pub mod control;
pub mod stats;
pub mod worker;

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::calibration::{CalibrationStore, CalibrationTransform};
use crate::display::{DisplaySignal, DisplaySink};
use crate::error::{MirrorError, Result};
use crate::export::TrackExporter;
use crate::frame::FramePair;
use crate::geometry::{transform_skeleton, DepthUnprojector, UnprojectOptions};
use crate::overlay::{
    Background, DisplayMapping, OverlayRenderer, OverlayStyle, RenderPoint, RenderStats,
};
use crate::pose::{
    DetectedPose, Keypoint2D, PoseDetector, PoseEstimator, Skeleton, DEFAULT_CONFIDENCE_THRESHOLD,
};
use crate::source::{
    Acquired, DepthDevice, DeviceConnector, FrameSource, SessionRecorder, SourceDescriptor,
    SourceMode, SourceOptions,
};

pub use control::{ControlHandle, ControlRequest};
pub use stats::PipelineStats;
pub use worker::{EstimatedFrame, EstimationWorker};

/// How long a paused tick waits for a control request before returning.
const PAUSE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Init => "Init",
            PipelineState::Running => "Running",
            PipelineState::Paused => "Paused",
            PipelineState::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub source: SourceDescriptor,
    pub source_options: SourceOptions,
    pub calibration_path: PathBuf,
    pub confidence_threshold: f32,
    pub unproject: UnprojectOptions,
    pub mapping: DisplayMapping,
    pub style: OverlayStyle,
    pub background: Background,
    /// Draw camera-pixel keypoints when the mirror transform is not valid.
    pub camera_fallback: bool,
    pub offload_estimation: bool,
    pub queue_depth: usize,
    /// Present recorded frames no faster than the recording's fps.
    pub pace_playback: bool,
    pub max_frames: Option<u64>,
}

impl PipelineOptions {
    pub fn new(source: SourceDescriptor, calibration_path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            source_options: SourceOptions::default(),
            calibration_path: calibration_path.into(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            unproject: UnprojectOptions::default(),
            mapping: DisplayMapping::default(),
            style: OverlayStyle::default(),
            background: Background::default(),
            camera_fallback: false,
            offload_estimation: false,
            queue_depth: 2,
            pace_playback: true,
            max_frames: None,
        }
    }
}

/// What one presented frame looked like.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub sequence_index: u64,
    pub timestamp: Duration,
    /// Valid 2D keypoints from the estimator.
    pub detected: usize,
    /// Keypoints that survived unprojection and the mirror transform.
    pub placed: usize,
    pub render: RenderStats,
    pub processing: Duration,
}

#[derive(Debug)]
pub enum Tick {
    Frame(FrameReport),
    /// Nothing was presented: paused, or the estimation queue is filling.
    Idle,
    Finished,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub frames: u64,
    pub dropped_frames: u64,
    pub stats: PipelineStats,
}

enum Estimation {
    Inline(PoseEstimator),
    Offloaded(EstimationWorker),
}

/// Drives acquisition, estimation, unprojection, mirror mapping and
/// rendering for one session.
///
/// Life cycle: `Init -> Running <-> Paused -> Stopped`. A fatal source or
/// display error moves the pipeline to `Stopped`, releasing the device,
/// before the error is returned.
pub struct Pipeline {
    options: PipelineOptions,
    state: PipelineState,
    detector: Option<Box<dyn PoseDetector>>,
    connector: Option<Box<dyn DeviceConnector>>,
    device: Option<Box<dyn DepthDevice>>,
    sink: Box<dyn DisplaySink>,
    exporter: Option<TrackExporter>,
    recorder: Option<SessionRecorder>,
    store: Option<CalibrationStore>,
    source: Option<FrameSource>,
    estimation: Option<Estimation>,
    unprojector: DepthUnprojector,
    renderer: OverlayRenderer,
    control_tx: Sender<ControlRequest>,
    control_rx: Receiver<ControlRequest>,
    stats: PipelineStats,
    last_present: Option<Instant>,
    dropped_frames: u64,
}

impl Pipeline {
    pub fn new(
        options: PipelineOptions,
        detector: Box<dyn PoseDetector>,
        sink: Box<dyn DisplaySink>,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel();
        Self {
            unprojector: DepthUnprojector::new(options.unproject),
            renderer: OverlayRenderer::new(options.style),
            options,
            state: PipelineState::Init,
            detector: Some(detector),
            connector: None,
            device: None,
            sink,
            exporter: None,
            recorder: None,
            store: None,
            source: None,
            estimation: None,
            control_tx,
            control_rx,
            stats: PipelineStats::default(),
            last_present: None,
            dropped_frames: 0,
        }
    }

    /// Backend used to resolve a live device descriptor.
    pub fn with_connector(mut self, connector: Box<dyn DeviceConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Uses an already opened device instead of the configured descriptor.
    pub fn with_device(mut self, device: Box<dyn DepthDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_exporter(mut self, exporter: TrackExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle::new(self.control_tx.clone())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn calibration(&self) -> Option<&CalibrationStore> {
        self.store.as_ref()
    }

    pub fn source_mode(&self) -> Option<SourceMode> {
        self.source.as_ref().map(FrameSource::mode)
    }

    /// INIT: loads calibration and opens the frame source.
    pub fn start(&mut self) -> Result<()> {
        if self.state != PipelineState::Init {
            return Err(self.invalid("start"));
        }
        match self.initialize() {
            Ok(()) => {
                self.state = PipelineState::Running;
                info!(
                    mode = ?self.source_mode(),
                    calibrated = self.store.as_ref().map(|s| s.transform().valid),
                    offload = self.options.offload_estimation,
                    "pipeline running"
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "pipeline initialization failed");
                self.shutdown();
                Err(e)
            }
        }
    }

    fn initialize(&mut self) -> Result<()> {
        let store = CalibrationStore::load(&self.options.calibration_path)?;
        if !store.transform().valid {
            if self.options.camera_fallback {
                warn!("no mirror calibration; drawing keypoints in camera pixels");
            } else {
                warn!("no mirror calibration; overlay stays empty until recalibrated");
            }
        }

        let source = match self.device.take() {
            Some(device) => FrameSource::open_live(device, &self.options.source_options)?,
            None => FrameSource::open(
                &self.options.source,
                &self.options.source_options,
                self.connector.as_deref(),
            )?,
        };
        if let Some(reported) = source.color_intrinsics() {
            if reported != store.intrinsics() {
                warn!(
                    device_fx = reported.fx,
                    stored_fx = store.intrinsics().fx,
                    "device color intrinsics differ from the calibration file"
                );
            }
        }

        let detector = self
            .detector
            .take()
            .ok_or_else(|| MirrorError::fault("pose detector already consumed"))?;
        let estimator =
            PoseEstimator::new(detector).with_confidence_threshold(self.options.confidence_threshold);
        let estimation = if self.options.offload_estimation {
            Estimation::Offloaded(EstimationWorker::spawn(estimator, self.options.queue_depth)?)
        } else {
            Estimation::Inline(estimator)
        };

        self.store = Some(store);
        self.source = Some(source);
        self.estimation = Some(estimation);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Running => {
                self.state = PipelineState::Paused;
                info!("pipeline paused");
                Ok(())
            }
            PipelineState::Paused => Ok(()),
            _ => Err(self.invalid("pause")),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            PipelineState::Paused => {
                self.state = PipelineState::Running;
                self.last_present = None;
                info!("pipeline resumed");
                Ok(())
            }
            PipelineState::Running => Ok(()),
            _ => Err(self.invalid("resume")),
        }
    }

    /// Releases every resource and enters `Stopped`. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown();
    }

    /// Replaces the mirror transform. Only allowed while paused.
    pub fn recalibrate(&mut self, transform: CalibrationTransform, persist: bool) -> Result<()> {
        if self.state != PipelineState::Paused {
            return Err(self.invalid("recalibrate"));
        }
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| MirrorError::config("no calibration store loaded"))?;
        if persist {
            store.save(store.path(), &transform)?;
        }
        store.replace_transform(transform);
        info!(valid = transform.valid, persisted = persist, "calibration replaced");
        Ok(())
    }

    /// Runs one cycle: applies pending control requests, then acquires,
    /// estimates, places and presents one frame.
    pub fn tick(&mut self) -> Result<Tick> {
        while let Ok(request) = self.control_rx.try_recv() {
            self.apply(request);
        }

        match self.state {
            PipelineState::Init => Err(self.invalid("tick")),
            PipelineState::Stopped => Ok(Tick::Finished),
            PipelineState::Paused => {
                if let Ok(request) = self.control_rx.recv_timeout(PAUSE_POLL) {
                    self.apply(request);
                }
                Ok(if self.state == PipelineState::Stopped {
                    Tick::Finished
                } else {
                    Tick::Idle
                })
            }
            PipelineState::Running => match self.step() {
                Ok(tick) => Ok(tick),
                Err(e) => {
                    error!(error = %e, "stopping pipeline");
                    self.shutdown();
                    Err(e)
                }
            },
        }
    }

    /// Ticks until stopped, the recording ends, or `max_frames` frames
    /// have been presented.
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.state == PipelineState::Init {
            self.start()?;
        }
        loop {
            if let Some(max) = self.options.max_frames {
                if self.stats.frames >= max && self.state != PipelineState::Stopped {
                    info!(max_frames = max, "frame limit reached");
                    self.shutdown();
                }
            }
            if let Tick::Finished = self.tick()? {
                break;
            }
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            frames: self.stats.frames,
            dropped_frames: self.dropped_frames,
            stats: self.stats.clone(),
        }
    }

    fn apply(&mut self, request: ControlRequest) {
        let outcome = match request {
            ControlRequest::Pause => self.pause(),
            ControlRequest::Resume => self.resume(),
            ControlRequest::Stop => {
                self.shutdown();
                Ok(())
            }
        };
        if let Err(e) = outcome {
            debug!(?request, error = %e, "control request ignored");
        }
    }

    fn step(&mut self) -> Result<Tick> {
        let source = self
            .source
            .as_mut()
            .ok_or_else(|| MirrorError::fault("frame source is not open"))?;
        let ready = match source.next()? {
            Acquired::Frame(pair) => self.estimate(pair)?,
            Acquired::EndOfStream => match self.drain_one()? {
                Some(done) => Some(done),
                None => {
                    info!("end of recording");
                    self.shutdown();
                    return Ok(Tick::Finished);
                }
            },
        };
        match ready {
            Some(done) => self.present(done).map(Tick::Frame),
            None => Ok(Tick::Idle),
        }
    }

    fn estimate(&mut self, pair: FramePair) -> Result<Option<EstimatedFrame>> {
        match self.estimation.as_mut() {
            Some(Estimation::Inline(estimator)) => {
                let start = Instant::now();
                let skeleton = estimator.estimate(pair.color());
                Ok(Some(EstimatedFrame {
                    pair,
                    skeleton,
                    inference: start.elapsed(),
                }))
            }
            Some(Estimation::Offloaded(worker)) => {
                let ready = if worker.is_full() {
                    Some(worker.recv()?)
                } else {
                    None
                };
                worker.submit(pair)?;
                Ok(ready)
            }
            None => Err(MirrorError::fault("pose estimator is not running")),
        }
    }

    fn drain_one(&mut self) -> Result<Option<EstimatedFrame>> {
        match self.estimation.as_mut() {
            Some(Estimation::Offloaded(worker)) if worker.in_flight() > 0 => worker.recv().map(Some),
            _ => Ok(None),
        }
    }

    fn present(&mut self, done: EstimatedFrame) -> Result<FrameReport> {
        let started = Instant::now();
        let EstimatedFrame {
            pair,
            skeleton,
            inference,
        } = done;
        self.record(&pair, &skeleton);

        let store = self
            .store
            .as_ref()
            .ok_or_else(|| MirrorError::config("no calibration store loaded"))?;
        let camera = self
            .unprojector
            .unproject_skeleton(&skeleton, pair.depth(), store.intrinsics());
        let mirror = transform_skeleton(&camera, store.transform());
        let points = if !store.transform().valid && self.options.camera_fallback {
            skeleton.map(RenderPoint::from_camera)
        } else {
            self.options.mapping.to_render_skeleton(&mirror)
        };

        let background = self.options.background.frame_for(pair.color());
        let (composited, render) = self.renderer.render_counted(&background, &points);

        let export_error = match self.exporter.as_mut() {
            Some(exporter) => exporter
                .write_frame(pair.sequence_index, pair.timestamp, &mirror)
                .err(),
            None => None,
        };
        if let Some(e) = export_error {
            warn!(error = %e, "track export disabled");
            self.exporter = None;
        }

        self.pace();
        let signal = self.sink.present(&composited, pair.sequence_index)?;
        self.last_present = Some(Instant::now());

        let detected = skeleton.valid_count();
        let placed = mirror.valid_count();
        let processing = inference + started.elapsed();
        self.stats.record(
            processing,
            !skeleton.is_empty(),
            detected.saturating_sub(placed),
            render.markers,
        );
        debug!(
            frame = pair.sequence_index,
            detected,
            placed,
            markers = render.markers,
            "frame presented"
        );

        match signal {
            DisplaySignal::Continue | DisplaySignal::Resume => {}
            DisplaySignal::Pause => {
                self.pause()?;
            }
            DisplaySignal::Stop => {
                info!("display requested stop");
                self.shutdown();
            }
        }

        Ok(FrameReport {
            sequence_index: pair.sequence_index,
            timestamp: pair.timestamp,
            detected,
            placed,
            render,
            processing,
        })
    }

    fn record(&mut self, pair: &FramePair, skeleton: &Skeleton<Keypoint2D>) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        let (width, height) = pair.dimensions();
        let pose = DetectedPose::from_skeleton(skeleton, width, height);
        let result = recorder
            .record(pair)
            .and_then(|_| recorder.record_landmarks(pose.as_ref()));
        if let Err(e) = result {
            warn!(error = %e, "session recording stopped");
            self.recorder = None;
        }
    }

    /// Holds playback to the recording's frame rate.
    fn pace(&self) {
        if !self.options.pace_playback {
            return;
        }
        let Some(source) = self.source.as_ref() else {
            return;
        };
        if source.mode() != SourceMode::Playback || source.nominal_fps() <= 0.0 {
            return;
        }
        let interval = Duration::from_secs_f64(1.0 / source.nominal_fps());
        if let Some(last) = self.last_present {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
    }

    fn shutdown(&mut self) {
        if self.state == PipelineState::Stopped {
            return;
        }
        if let Some(Estimation::Offloaded(worker)) = self.estimation.as_mut() {
            worker.shutdown();
        }
        self.estimation = None;
        if let Some(mut device) = self.device.take() {
            device.stop();
        }
        if let Some(mut source) = self.source.take() {
            self.dropped_frames = source.dropped_frames();
            source.close();
        }
        if let Some(mut exporter) = self.exporter.take() {
            match exporter.flush() {
                Ok(()) => info!(
                    path = %exporter.path().display(),
                    rows = exporter.rows(),
                    "tracks exported"
                ),
                Err(e) => warn!(error = %e, "failed to flush track export"),
            }
        }
        if let Some(recorder) = self.recorder.take() {
            if recorder.frame_count() > 0 {
                if let Err(e) = recorder.finish() {
                    warn!(error = %e, "failed to finalize recording");
                }
            }
        }
        self.state = PipelineState::Stopped;
        info!(frames = self.stats.frames, "pipeline stopped");
    }

    fn invalid(&self, action: &'static str) -> MirrorError {
        MirrorError::InvalidState {
            action,
            state: self.state.to_string(),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
