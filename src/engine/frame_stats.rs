use std::time::{Duration, Instant};

use tracing::info;

use crate::engine::xr::FrameReport;

/// Per-run counters, logged once at shutdown.
#[derive(Debug, Clone)]
pub struct FrameStats {
    pub frames: u64,
    pub layers_submitted: u64,
    pub empty_frames: u64,
    pub rendered_views: u64,
    pub skipped_views: u64,
    pub haptic_pulses: u64,
    started: Instant,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            frames: 0,
            layers_submitted: 0,
            empty_frames: 0,
            rendered_views: 0,
            skipped_views: 0,
            haptic_pulses: 0,
            started: Instant::now(),
        }
    }
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, report: &FrameReport) {
        self.frames += 1;
        if report.layer_submitted {
            self.layers_submitted += 1;
        } else {
            self.empty_frames += 1;
        }
        self.rendered_views += report.rendered_views as u64;
        self.skipped_views += report.skipped_views as u64;
    }

    pub fn record_pulses(&mut self, pulses: u32) {
        self.haptic_pulses += u64::from(pulses);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn log_summary(&self) {
        let secs = self.elapsed().as_secs_f64();
        let fps = if secs > 0.0 { self.frames as f64 / secs } else { 0.0 };
        info!(
            frames = self.frames,
            layers = self.layers_submitted,
            empty = self.empty_frames,
            rendered_views = self.rendered_views,
            skipped_views = self.skipped_views,
            haptic_pulses = self.haptic_pulses,
            seconds = format_args!("{secs:.1}"),
            fps = format_args!("{fps:.1}"),
            "frame statistics"
        );
    }
}
