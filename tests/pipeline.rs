use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Luma, Rgb, RgbImage};
use mirror_overlay::calibration;
use mirror_overlay::display::{DisplaySignal, DisplaySink};
use mirror_overlay::export::TrackExporter;
use mirror_overlay::pipeline::Tick;
use mirror_overlay::pose::{
    DetectedPose, Landmark, LandmarkLayout, LandmarkLogDetector, PoseDetector, LANDMARK_LOG_FILE,
};
use mirror_overlay::source::{
    DepthDevice, DeviceError, RawFrameSet, SessionManifest, SessionRecorder, SourceDescriptor,
    SourceOptions, StreamGeometry,
};
use mirror_overlay::{
    CalibrationStore, CalibrationTransform, CameraIntrinsics, DepthImage, FramePair, MirrorError,
    Pipeline, PipelineOptions, PipelineState,
};
use nalgebra::{Matrix3, Vector3};
use tempfile::TempDir;

const JOINT_COLOR: [u8; 3] = [255, 128, 0];

/// Reports a confident nose at the centre of every frame.
struct CentredNose;

impl PoseDetector for CentredNose {
    fn detect(&mut self, _image: &RgbImage) -> mirror_overlay::Result<Option<DetectedPose>> {
        let mut landmarks = vec![
            Landmark {
                x: 0.0,
                y: 0.0,
                z: 0.0,
                visibility: 0.0,
            };
            17
        ];
        landmarks[0] = Landmark {
            x: 0.5,
            y: 0.5,
            z: 0.0,
            visibility: 0.9,
        };
        Ok(Some(DetectedPose {
            layout: LandmarkLayout::Coco17,
            landmarks,
        }))
    }
}

#[derive(Clone, Default)]
struct Presented {
    frames: Arc<Mutex<Vec<(u64, RgbImage)>>>,
}

impl Presented {
    fn indices(&self) -> Vec<u64> {
        self.frames.lock().unwrap().iter().map(|(i, _)| *i).collect()
    }

    fn last(&self) -> RgbImage {
        self.frames.lock().unwrap().last().unwrap().1.clone()
    }
}

/// Keeps every presented frame and asks to stop after `stop_after` frames.
struct CaptureSink {
    presented: Presented,
    stop_after: Option<usize>,
}

impl DisplaySink for CaptureSink {
    fn present(&mut self, frame: &RgbImage, sequence_index: u64) -> mirror_overlay::Result<DisplaySignal> {
        let mut frames = self.presented.frames.lock().unwrap();
        frames.push((sequence_index, frame.clone()));
        Ok(match self.stop_after {
            Some(n) if frames.len() >= n => DisplaySignal::Stop,
            _ => DisplaySignal::Continue,
        })
    }
}

fn capture(stop_after: Option<usize>) -> (Box<dyn DisplaySink>, Presented) {
    let presented = Presented::default();
    let sink = CaptureSink {
        presented: presented.clone(),
        stop_after,
    };
    (Box::new(sink), presented)
}

fn intrinsics(width: u32, height: u32, focal: f64) -> CameraIntrinsics {
    CameraIntrinsics {
        fx: focal,
        fy: focal,
        cx: f64::from(width) / 2.0,
        cy: f64::from(height) / 2.0,
        depth_scale: 0.001,
    }
}

fn write_calibration(dir: &Path, intrinsics: &CameraIntrinsics, transform: CalibrationTransform) -> PathBuf {
    let path = dir.join("calibration.json");
    calibration::save(&path, intrinsics, &transform).unwrap();
    path
}

/// Records a 64x48 session whose depth is 1.5 m everywhere.
fn write_session(dir: &Path, frames: u64) -> PathBuf {
    let session = dir.join("session");
    let mut recorder = SessionRecorder::create(&session, 30.0).unwrap();
    for i in 0..frames {
        let pair = FramePair::new(
            RgbImage::from_pixel(64, 48, Rgb([i as u8, 40, 40])),
            DepthImage::from_pixel(64, 48, Luma([1500])),
            Duration::from_millis(i * 33),
            i,
        )
        .unwrap();
        recorder.record(&pair).unwrap();
    }
    recorder.finish().unwrap();
    session
}

fn playback_options(dir: &Path, frames: u64, loop_playback: bool) -> PipelineOptions {
    let session = write_session(dir, frames);
    let calibration = write_calibration(dir, &intrinsics(64, 48, 60.0), CalibrationTransform::identity());
    let mut options = PipelineOptions::new(
        SourceDescriptor::Playback {
            dir: session,
            loop_playback,
        },
        calibration,
    );
    options.pace_playback = false;
    options.mapping.origin_px = [32.0, 24.0];
    options
}

#[derive(Default)]
struct DeviceCounters {
    waits: AtomicUsize,
    stops: AtomicUsize,
}

/// 640x480 registered sensor that delivers `remaining` frames at 2 m, then stalls.
struct FakeDevice {
    remaining: usize,
    delivered: u64,
    counters: Arc<DeviceCounters>,
}

impl FakeDevice {
    fn new(remaining: usize) -> (Self, Arc<DeviceCounters>) {
        let counters = Arc::new(DeviceCounters::default());
        let device = Self {
            remaining,
            delivered: 0,
            counters: Arc::clone(&counters),
        };
        (device, counters)
    }
}

impl DepthDevice for FakeDevice {
    fn name(&self) -> &str {
        "fake"
    }

    fn geometry(&self) -> StreamGeometry {
        StreamGeometry::registered((640, 480), intrinsics(640, 480, 600.0), 30.0)
    }

    fn wait_for_frames(&mut self, timeout: Duration) -> Result<RawFrameSet, DeviceError> {
        self.counters.waits.fetch_add(1, Ordering::SeqCst);
        if self.remaining == 0 {
            return Err(DeviceError::Timeout(timeout));
        }
        self.remaining -= 1;
        let stamp = Duration::from_millis(self.delivered * 33);
        self.delivered += 1;
        Ok(RawFrameSet {
            color: RgbImage::from_pixel(640, 480, Rgb([30, 30, 30])),
            depth: DepthImage::from_pixel(640, 480, Luma([2000])),
            color_timestamp: stamp,
            depth_timestamp: stamp,
        })
    }

    fn stop(&mut self) {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
    }
}

fn live_options(dir: &Path, transform: CalibrationTransform) -> PipelineOptions {
    let calibration = write_calibration(dir, &intrinsics(640, 480, 600.0), transform);
    let mut options = PipelineOptions::new(
        SourceDescriptor::Live {
            device_id: "fake".into(),
        },
        calibration,
    );
    options.source_options = SourceOptions {
        timeout: Duration::from_millis(5),
        max_retries: 2,
        retry_backoff: Duration::from_millis(1),
        ..SourceOptions::default()
    };
    options
}

fn expect_frame(pipeline: &mut Pipeline) -> mirror_overlay::pipeline::FrameReport {
    match pipeline.tick().unwrap() {
        Tick::Frame(report) => report,
        other => panic!("expected a frame, got {other:?}"),
    }
}

#[test]
fn centred_keypoint_lands_on_display_origin() {
    let tmp = TempDir::new().unwrap();
    let (device, _) = FakeDevice::new(1);
    let (sink, presented) = capture(None);
    let mut pipeline = Pipeline::new(
        live_options(tmp.path(), CalibrationTransform::identity()),
        Box::new(CentredNose),
        sink,
    )
    .with_device(Box::new(device));

    pipeline.start().unwrap();
    let report = expect_frame(&mut pipeline);
    assert_eq!(report.detected, 1);
    assert_eq!(report.placed, 1);
    assert_eq!(report.render.markers, 1);

    // (320, 240) at 2 m unprojects to (0, 0, 2), which maps to the display origin
    let frame = presented.last();
    assert_eq!(frame.get_pixel(320, 240).0, JOINT_COLOR);
    assert_eq!(frame.get_pixel(10, 10).0, [30, 30, 30]);
}

#[test]
fn missing_transform_draws_nothing() {
    let tmp = TempDir::new().unwrap();
    let (device, _) = FakeDevice::new(1);
    let (sink, presented) = capture(None);
    let mut pipeline = Pipeline::new(
        live_options(tmp.path(), CalibrationTransform::uncalibrated()),
        Box::new(CentredNose),
        sink,
    )
    .with_device(Box::new(device));

    pipeline.start().unwrap();
    assert!(!pipeline.calibration().unwrap().transform().valid);
    let report = expect_frame(&mut pipeline);
    assert_eq!(report.detected, 1);
    assert_eq!(report.placed, 0);
    assert_eq!(report.render.markers, 0);
    assert_eq!(presented.last().get_pixel(320, 240).0, [30, 30, 30]);
    assert_eq!(pipeline.stats().invalid_keypoints, 1);
}

#[test]
fn camera_fallback_draws_in_camera_pixels() {
    let tmp = TempDir::new().unwrap();
    let (device, _) = FakeDevice::new(1);
    let (sink, presented) = capture(None);
    let mut options = live_options(tmp.path(), CalibrationTransform::uncalibrated());
    options.camera_fallback = true;
    let mut pipeline =
        Pipeline::new(options, Box::new(CentredNose), sink).with_device(Box::new(device));

    pipeline.start().unwrap();
    let report = expect_frame(&mut pipeline);
    assert_eq!(report.placed, 0);
    assert_eq!(report.render.markers, 1);
    assert_eq!(presented.last().get_pixel(320, 240).0, JOINT_COLOR);
}

#[test]
fn stalled_device_faults_once_and_is_released() {
    let tmp = TempDir::new().unwrap();
    let (device, counters) = FakeDevice::new(1);
    let (sink, _) = capture(None);
    let mut pipeline = Pipeline::new(
        live_options(tmp.path(), CalibrationTransform::identity()),
        Box::new(CentredNose),
        sink,
    )
    .with_device(Box::new(device));

    pipeline.start().unwrap();
    expect_frame(&mut pipeline);

    let err = pipeline.tick().unwrap_err();
    assert!(matches!(err, MirrorError::AcquisitionFault(_)));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    // one successful wait, then the initial wait plus two retries
    assert_eq!(counters.waits.load(Ordering::SeqCst), 4);
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);

    assert!(matches!(pipeline.tick().unwrap(), Tick::Finished));
    drop(pipeline);
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_calibration_file_fails_start() {
    let tmp = TempDir::new().unwrap();
    let (device, counters) = FakeDevice::new(1);
    let (sink, _) = capture(None);
    let mut options = live_options(tmp.path(), CalibrationTransform::identity());
    options.calibration_path = tmp.path().join("absent.json");
    let mut pipeline =
        Pipeline::new(options, Box::new(CentredNose), sink).with_device(Box::new(device));

    let err = pipeline.start().unwrap_err();
    assert!(matches!(err, MirrorError::ConfigurationError(_)));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(counters.waits.load(Ordering::SeqCst), 0);
    assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn looping_playback_wraps_until_frame_limit() {
    let tmp = TempDir::new().unwrap();
    let mut options = playback_options(tmp.path(), 3, true);
    options.max_frames = Some(7);
    let (sink, presented) = capture(None);
    let mut pipeline = Pipeline::new(options, Box::new(CentredNose), sink);

    let summary = pipeline.run().unwrap();
    assert_eq!(summary.frames, 7);
    assert_eq!(presented.indices(), vec![0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn playback_without_loop_finishes() {
    let tmp = TempDir::new().unwrap();
    let (sink, presented) = capture(None);
    let mut pipeline = Pipeline::new(
        playback_options(tmp.path(), 3, false),
        Box::new(CentredNose),
        sink,
    );

    pipeline.start().unwrap();
    for _ in 0..3 {
        expect_frame(&mut pipeline);
    }
    assert!(matches!(pipeline.tick().unwrap(), Tick::Finished));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(presented.indices(), vec![0, 1, 2]);

    // every frame placed the nose at the display origin
    assert_eq!(presented.last().get_pixel(32, 24).0, JOINT_COLOR);
    assert_eq!(pipeline.stats().frames_with_subject, 3);
}

#[test]
fn control_handle_pauses_resumes_and_stops() {
    let tmp = TempDir::new().unwrap();
    let (sink, presented) = capture(None);
    let mut pipeline = Pipeline::new(
        playback_options(tmp.path(), 3, true),
        Box::new(CentredNose),
        sink,
    );
    let control = pipeline.control_handle();

    pipeline.start().unwrap();
    expect_frame(&mut pipeline);

    assert!(control.pause());
    assert!(matches!(pipeline.tick().unwrap(), Tick::Idle));
    assert_eq!(pipeline.state(), PipelineState::Paused);
    assert_eq!(presented.indices().len(), 1);

    assert!(control.resume());
    expect_frame(&mut pipeline);
    assert_eq!(pipeline.state(), PipelineState::Running);

    assert!(control.stop());
    assert!(matches!(pipeline.tick().unwrap(), Tick::Finished));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(presented.indices(), vec![0, 1]);
}

#[test]
fn recalibration_requires_pause_and_persists() {
    let tmp = TempDir::new().unwrap();
    let options = playback_options(tmp.path(), 3, true);
    let calibration_path = options.calibration_path.clone();
    let (sink, presented) = capture(None);
    let mut pipeline = Pipeline::new(options, Box::new(CentredNose), sink);
    pipeline.start().unwrap();

    // shift the mirror origin 2 cm along x
    let shifted = CalibrationTransform::new(Matrix3::identity(), Vector3::new(0.02, 0.0, 0.0)).unwrap();
    let err = pipeline.recalibrate(shifted, true).unwrap_err();
    assert!(matches!(err, MirrorError::InvalidState { action: "recalibrate", .. }));

    pipeline.pause().unwrap();
    pipeline.recalibrate(shifted, true).unwrap();
    pipeline.resume().unwrap();
    let report = expect_frame(&mut pipeline);
    assert_eq!(report.sequence_index, 0);

    // flipped horizontally the nose moves to x = 32 - 0.02 * 500
    let frame = presented.last();
    assert_eq!(frame.get_pixel(22, 24).0, JOINT_COLOR);
    assert_eq!(frame.get_pixel(32, 24).0, [0, 40, 40]);

    let reloaded = CalibrationStore::load(&calibration_path).unwrap();
    assert!(reloaded.transform().valid);
    assert!((reloaded.transform().translation.x - 0.02).abs() < 1e-12);
}

#[test]
fn offloaded_estimation_presents_every_frame_in_order() {
    let tmp = TempDir::new().unwrap();
    let mut options = playback_options(tmp.path(), 5, false);
    options.offload_estimation = true;
    options.queue_depth = 2;
    let (sink, presented) = capture(None);
    let mut pipeline = Pipeline::new(options, Box::new(CentredNose), sink);

    let summary = pipeline.run().unwrap();
    assert_eq!(summary.frames, 5);
    assert_eq!(presented.indices(), vec![0, 1, 2, 3, 4]);

    // each presented frame is the one its skeleton came from
    for (index, frame) in presented.frames.lock().unwrap().iter() {
        assert_eq!(frame.get_pixel(0, 0).0, [*index as u8, 40, 40]);
    }
}

#[test]
fn display_stop_signal_ends_run() {
    let tmp = TempDir::new().unwrap();
    let (sink, presented) = capture(Some(4));
    let mut pipeline = Pipeline::new(
        playback_options(tmp.path(), 3, true),
        Box::new(CentredNose),
        sink,
    );

    let summary = pipeline.run().unwrap();
    assert_eq!(summary.frames, 4);
    assert_eq!(presented.indices().len(), 4);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[test]
fn exporter_writes_one_row_per_frame() {
    let tmp = TempDir::new().unwrap();
    let csv_path = tmp.path().join("out").join("tracks.csv");
    let (sink, _) = capture(None);
    let mut pipeline = Pipeline::new(
        playback_options(tmp.path(), 3, false),
        Box::new(CentredNose),
        sink,
    )
    .with_exporter(TrackExporter::create(&csv_path).unwrap());

    pipeline.run().unwrap();

    let content = fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("frame,timestamp_ms,nose_x,nose_y,nose_z"));
    assert!(lines[1].starts_with("0,0.000,0,0,1.5"));
    assert!(lines[2].starts_with("1,33.000,"));
}

#[test]
fn recorder_captures_frames_and_landmarks() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("rerecorded");
    let (sink, _) = capture(None);
    let mut pipeline = Pipeline::new(
        playback_options(tmp.path(), 3, false),
        Box::new(CentredNose),
        sink,
    )
    .with_recorder(SessionRecorder::create(&out, 30.0).unwrap());

    pipeline.run().unwrap();

    let manifest = SessionManifest::load(&out).unwrap();
    assert_eq!(manifest.frame_count, 3);
    assert_eq!((manifest.width, manifest.height), (64, 48));
    // header line plus one entry per frame
    let log = fs::read_to_string(out.join(LANDMARK_LOG_FILE)).unwrap();
    assert_eq!(log.lines().count(), 4);
    let replay = LandmarkLogDetector::open(out.join(LANDMARK_LOG_FILE)).unwrap();
    replay.check_frame_count(manifest.frame_count).unwrap();
}

#[test]
fn landmark_log_shorter_than_recording_is_refused() {
    let tmp = TempDir::new().unwrap();
    let session = write_session(tmp.path(), 3);
    let manifest = SessionManifest::load(&session).unwrap();
    let log_path = session.join(LANDMARK_LOG_FILE);
    fs::write(&log_path, "{\"joint_set_version\":1}\nnull\nnull\n").unwrap();

    let log = LandmarkLogDetector::open(&log_path).unwrap();
    assert_eq!(log.len(), 2);
    let err = log.check_frame_count(manifest.frame_count).unwrap_err();
    assert!(matches!(err, MirrorError::ConfigurationError(_)));
}
