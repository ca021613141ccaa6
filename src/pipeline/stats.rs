// src/pipeline/stats.rs - rolling frame timing and keypoint counters
use std::collections::VecDeque;
use std::time::Duration;

const WINDOW: usize = 30;

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub frames: u64,
    /// Frames on which the detector reported a subject.
    pub frames_with_subject: u64,
    /// Detected joints that could not be placed in mirror space.
    pub invalid_keypoints: u64,
    pub markers_drawn: u64,
    pub avg_processing_ms: f32,
    pub avg_fps: f32,
    frame_times: VecDeque<f32>,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self {
            frames: 0,
            frames_with_subject: 0,
            invalid_keypoints: 0,
            markers_drawn: 0,
            avg_processing_ms: 0.0,
            avg_fps: 0.0,
            frame_times: VecDeque::with_capacity(WINDOW),
        }
    }
}

impl PipelineStats {
    pub fn record(&mut self, processing: Duration, subject: bool, invalid: usize, markers: usize) {
        self.frames += 1;
        if subject {
            self.frames_with_subject += 1;
        }
        self.invalid_keypoints += invalid as u64;
        self.markers_drawn += markers as u64;

        self.frame_times.push_front(processing.as_secs_f32());
        if self.frame_times.len() > WINDOW {
            self.frame_times.pop_back();
        }
        let avg = self.frame_times.iter().sum::<f32>() / self.frame_times.len() as f32;
        self.avg_processing_ms = avg * 1000.0;
        self.avg_fps = if avg > 0.0 { 1.0 / avg } else { 0.0 };
    }
}
