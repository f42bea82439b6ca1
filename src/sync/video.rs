// ABOUTME: Video path of the stream synchronizer
// ABOUTME: Predicts frame vpts from durations and spreads small drift over following frames

use super::{StreamSynchronizer, SyncState};
use crate::clock::{Pts, PTS_PER_SECOND};
use crate::config::SyncConfig;

/// Durations at or below this (1000 fps) mean "unknown or variable rate"
const MIN_PLAUSIBLE_FRAME_DURATION: Pts = PTS_PER_SECOND / 1000;

/// Durations at or above this (1 fps) mean "unknown or variable rate"
const MAX_PLAUSIBLE_FRAME_DURATION: Pts = PTS_PER_SECOND;

/// How video vpts are derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VideoMode {
    /// Extrapolate from frame durations between timestamps
    Prediction,
    /// Use every frame's own timestamp verbatim
    PtsOnly,
}

impl VideoMode {
    fn for_duration(duration: Pts) -> Self {
        if duration == 0
            || (duration > MIN_PLAUSIBLE_FRAME_DURATION && duration < MAX_PLAUSIBLE_FRAME_DURATION)
        {
            VideoMode::Prediction
        } else {
            VideoMode::PtsOnly
        }
    }
}

/// Presentation timing assigned to one video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    /// When to present the frame, A/V offset included
    pub vpts: Pts,
    /// How long the frame stays up, drift correction included
    pub duration: Pts,
}

/// Per-frame correction for `drift`, spread over `steps` frames
///
/// At least one tick so small drift does not linger forever, and never more
/// than a quarter of the frame so the correction stays invisible.
fn drift_step(drift: Pts, steps: i64, frame_duration: Pts) -> Pts {
    let mut step = drift / steps.max(1);
    if step == 0 {
        step = drift.signum();
    }
    let limit = (frame_duration / 4).max(1);
    step.clamp(-limit, limit)
}

impl SyncState {
    pub(crate) fn video_frame(&mut self, pts: Pts, duration: Pts, config: &SyncConfig) -> FrameTiming {
        self.frames_since_pts += 1;
        self.video_mode = VideoMode::for_duration(duration);
        if duration > 0 && self.video_mode == VideoMode::Prediction {
            self.frame_duration = duration;
        }

        if pts != 0 && pts != self.last_video_pts {
            if duration == 0 && self.last_video_pts != 0 && self.frames_since_pts > 0 {
                let estimate = (pts - self.last_video_pts) / self.frames_since_pts;
                if estimate > 0 {
                    self.frame_duration = estimate;
                    log::trace!("estimated frame duration {}", estimate);
                }
            }
            self.last_video_pts = pts;
            self.frames_since_pts = 0;

            let candidate = pts + self.vpts_offset;
            match self.video_mode {
                VideoMode::Prediction => {
                    let diff = self.video_vpts - candidate;
                    if diff.abs() > config.video_drift_tolerance || self.force_video_jump {
                        if !self.force_video_jump {
                            log::debug!("video jump by {} pts", -diff);
                        }
                        self.snap_video(candidate);
                    } else {
                        self.video_drift = diff;
                        self.video_drift_step =
                            drift_step(diff, config.video_drift_steps, self.frame_duration);
                        if diff != 0 {
                            log::trace!("video drift {} pts, step {}", diff, self.video_drift_step);
                        }
                    }
                }
                VideoMode::PtsOnly => self.snap_video(candidate),
            }
        }

        let vpts = self.video_vpts + self.av_offset;
        self.video_floor = self.video_vpts;

        let mut duration = match self.video_mode {
            VideoMode::Prediction => self.frame_duration,
            VideoMode::PtsOnly => duration,
        };
        if self.video_mode == VideoMode::Prediction {
            if self.video_drift != 0 {
                let step = if self.video_drift_step.abs() > self.video_drift.abs() {
                    self.video_drift
                } else {
                    self.video_drift_step
                };
                duration -= step;
                self.video_drift -= step;
                if self.video_drift == 0 {
                    self.video_drift_step = 0;
                }
            }
            self.video_vpts += duration;
        }

        FrameTiming { vpts, duration }
    }

    fn snap_video(&mut self, candidate: Pts) {
        self.force_video_jump = false;
        if candidate < self.video_floor {
            // Raw timestamps went backwards: keep predicting and move the mapping
            self.vpts_offset += self.video_vpts - candidate;
            log::debug!("video pts went back, vpts offset now {}", self.vpts_offset);
        } else {
            self.video_vpts = candidate;
        }
        self.video_drift = 0;
        self.video_drift_step = 0;
    }
}

impl StreamSynchronizer {
    /// Assign a vpts to a video frame
    ///
    /// `pts` is the frame's raw stream timestamp, or 0 if it has none.
    /// `duration` is its nominal duration, or 0 if unknown; an unknown duration is
    /// estimated from the spacing of timestamps.
    pub fn got_video_frame(&self, pts: Pts, duration: Pts) -> FrameTiming {
        let mut state = self.state.lock();
        self.follow_master(&mut state);
        state.video_frame(pts, duration, &self.config)
    }
}
