// src/main.rs
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};

use mirror_overlay::display::{DisplaySink, NullSink, PngSequenceSink};
use mirror_overlay::export::TrackExporter;
use mirror_overlay::pose::{LandmarkLogDetector, LANDMARK_LOG_FILE};
use mirror_overlay::source::{SessionRecorder, SessionManifest, SourceDescriptor};
use mirror_overlay::{Config, Pipeline};

/// Replays a recorded color+depth session through the mirror overlay pipeline.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// TOML configuration file. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Recorded session directory; overrides `source.playback`.
    #[arg(long)]
    playback: Option<PathBuf>,

    /// Stop at the end of the recording instead of looping.
    #[arg(long)]
    no_loop: bool,

    /// Write composited frames as PNGs into this directory.
    #[arg(long)]
    record_out: Option<PathBuf>,

    /// Write mirror-space joint tracks to this CSV file.
    #[arg(long)]
    export_csv: Option<PathBuf>,

    /// Re-record the processed frames and landmarks under the output directory.
    #[arg(long)]
    rerecord: bool,

    #[arg(long)]
    max_frames: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = &args.playback {
        config.source.playback = Some(dir.clone());
    }
    if args.no_loop {
        config.source.loop_playback = false;
    }
    if args.max_frames.is_some() {
        config.pipeline.max_frames = args.max_frames;
    }

    let mut options = config.pipeline_options()?;
    let session_dir = match &options.source {
        SourceDescriptor::Playback { dir, .. } => dir.clone(),
        SourceDescriptor::Live { device_id } => {
            bail!(
                "live device '{device_id}' requested, but this build has no depth sensor \
                 backend; use --playback"
            )
        }
    };
    if args.rerecord {
        // a looping source would re-record forever
        if let SourceDescriptor::Playback { loop_playback, .. } = &mut options.source {
            *loop_playback = false;
        }
    }

    let manifest = SessionManifest::load(&session_dir)?;
    let log_path = session_dir.join(LANDMARK_LOG_FILE);
    let detector = if log_path.exists() {
        LandmarkLogDetector::open(&log_path)
            .with_context(|| format!("reading {}", log_path.display()))?
    } else {
        warn!(path = %log_path.display(), "no landmark log; every frame will be empty");
        LandmarkLogDetector::empty()
    };
    detector
        .check_frame_count(manifest.frame_count)
        .with_context(|| format!("replaying {}", log_path.display()))?;

    let sink: Box<dyn DisplaySink> = match &args.record_out {
        Some(dir) => Box::new(PngSequenceSink::create(dir)?),
        None => Box::new(NullSink::default()),
    };

    let mut pipeline = Pipeline::new(options, Box::new(detector), sink);
    if let Some(path) = &args.export_csv {
        pipeline = pipeline.with_exporter(TrackExporter::create(path)?);
    } else if config.output.export_tracks {
        pipeline = pipeline.with_exporter(TrackExporter::create_in(&config.output.directory)?);
    }
    if args.rerecord {
        let recorder = SessionRecorder::create_timestamped(&config.output.directory, manifest.fps)?;
        info!(dir = %recorder.dir().display(), "re-recording session");
        pipeline = pipeline.with_recorder(recorder);
    }

    let summary = pipeline.run().context("pipeline failed")?;
    info!(
        frames = summary.frames,
        with_subject = summary.stats.frames_with_subject,
        invalid_keypoints = summary.stats.invalid_keypoints,
        avg_ms = summary.stats.avg_processing_ms,
        "session finished"
    );
    Ok(())
}
