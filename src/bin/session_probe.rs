// src/bin/session_probe.rs - sanity check for a recorded session directory
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use mirror_overlay::pose::{LandmarkLogDetector, LANDMARK_LOG_FILE};
use mirror_overlay::source::PlaybackSource;

#[derive(Debug, Parser)]
#[command(about = "Print a recording's manifest and verify every frame decodes")]
struct Args {
    /// Session directory containing session.json.
    session: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let source = PlaybackSource::open(&args.session, false)
        .with_context(|| format!("opening {}", args.session.display()))?;
    let manifest = source.manifest();

    println!("Session: {}", args.session.display());
    println!("  size:   {}x{}", manifest.width, manifest.height);
    println!("  fps:    {:.2}", manifest.fps);
    println!("  frames: {}", manifest.frame_count);
    if manifest.timestamps_ms.is_empty() {
        println!("  timestamps: derived from fps");
    } else {
        let last = manifest.timestamps_ms.last().copied().unwrap_or_default();
        println!("  duration: {:.1} s", last / 1000.0);
    }

    let log_path = args.session.join(LANDMARK_LOG_FILE);
    if log_path.exists() {
        let log = LandmarkLogDetector::open(&log_path)?;
        println!("  landmark entries: {}", log.len());
        if let Err(e) = log.check_frame_count(manifest.frame_count) {
            println!("  ⚠ {e}");
        }
    } else {
        println!("  landmark log: none");
    }

    let mut failures = 0;
    for index in 0..manifest.frame_count {
        if let Err(e) = source.read_frame(index) {
            println!("✗ frame {index}: {e}");
            failures += 1;
        }
    }

    if failures == 0 {
        println!("✓ all {} frames decode", manifest.frame_count);
        Ok(())
    } else {
        anyhow::bail!("{failures} of {} frames failed to decode", manifest.frame_count)
    }
}
