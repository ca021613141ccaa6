// src/pipeline/worker.rs - pose estimation on a dedicated thread
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{MirrorError, Result};
use crate::frame::FramePair;
use crate::pose::{Keypoint2D, PoseEstimator, Skeleton};

/// A frame together with the skeleton estimated from it.
#[derive(Debug)]
pub struct EstimatedFrame {
    pub pair: FramePair,
    pub skeleton: Skeleton<Keypoint2D>,
    pub inference: Duration,
}

/// Runs a [`PoseEstimator`] off the pipeline thread.
///
/// Jobs go through a bounded channel of `queue_depth` slots, so `submit`
/// blocks while the worker is that far behind. Results come back in
/// submission order, each carrying the frame it was computed from.
pub struct EstimationWorker {
    jobs: Option<SyncSender<FramePair>>,
    results: Receiver<EstimatedFrame>,
    handle: Option<JoinHandle<()>>,
    queue_depth: usize,
    in_flight: usize,
}

impl EstimationWorker {
    pub fn spawn(mut estimator: PoseEstimator, queue_depth: usize) -> Result<Self> {
        let queue_depth = queue_depth.max(1);
        let (job_tx, job_rx) = mpsc::sync_channel::<FramePair>(queue_depth);
        let (result_tx, result_rx) = mpsc::channel();

        let handle = thread::Builder::new()
            .name("pose-estimation".into())
            .spawn(move || {
                for pair in job_rx {
                    let start = Instant::now();
                    let skeleton = estimator.estimate(pair.color());
                    let done = EstimatedFrame {
                        pair,
                        skeleton,
                        inference: start.elapsed(),
                    };
                    if result_tx.send(done).is_err() {
                        break;
                    }
                }
                debug!("estimation worker exiting");
            })
            .map_err(|e| MirrorError::io("pose-estimation thread", e))?;

        Ok(Self {
            jobs: Some(job_tx),
            results: result_rx,
            handle: Some(handle),
            queue_depth,
            in_flight: 0,
        })
    }

    /// Frames submitted but not yet received.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_full(&self) -> bool {
        self.in_flight >= self.queue_depth
    }

    pub fn submit(&mut self, pair: FramePair) -> Result<()> {
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| MirrorError::fault("estimation worker is shut down"))?;
        jobs.send(pair)
            .map_err(|_| MirrorError::fault("estimation worker exited"))?;
        self.in_flight += 1;
        Ok(())
    }

    /// Blocks for the oldest outstanding result.
    pub fn recv(&mut self) -> Result<EstimatedFrame> {
        if self.in_flight == 0 {
            return Err(MirrorError::fault("no estimation in flight"));
        }
        let done = self
            .results
            .recv()
            .map_err(|_| MirrorError::fault("estimation worker exited"))?;
        self.in_flight -= 1;
        Ok(done)
    }

    /// Closes the job queue and joins the thread after queued frames finish.
    pub fn shutdown(&mut self) {
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("estimation worker panicked");
            }
        }
        self.in_flight = 0;
    }
}

impl Drop for EstimationWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
