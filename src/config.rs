// ABOUTME: Arbiter and synchronizer configuration
// ABOUTME: Defines tolerances, prebuffer and resync parameters with builder setters

use crate::clock::Pts;
use std::time::Duration;

/// Default number of clock sources the arbiter accepts, the default source included
pub const DEFAULT_CLOCK_CAPACITY: usize = 10;

/// Clock arbiter configuration
#[derive(Clone, Debug)]
pub struct ClockConfig {
    /// How often non-master sources are pulled back to the master
    pub resync_interval: Duration,
    /// Maximum number of registered sources, the default source included
    pub capacity: usize,
    /// Whether `adjust` is forwarded to the master source
    pub adjustable: bool,
}

impl ClockConfig {
    /// Set the resync interval
    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Set the registry capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Enable or disable post-hoc clock adjustment
    pub fn adjustable(mut self, adjustable: bool) -> Self {
        self.adjustable = adjustable;
        self
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(5),
            capacity: DEFAULT_CLOCK_CAPACITY,
            adjustable: true,
        }
    }
}

/// Stream synchronizer configuration
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Presentation delay added to "now" when a stream starts or seeks
    pub prebuffer: Pts,
    /// Largest video prediction error corrected gradually instead of by a jump
    pub video_drift_tolerance: Pts,
    /// Largest audio prediction error corrected by rate instead of by a jump
    pub audio_drift_tolerance: Pts,
    /// Number of frames over which video drift is spread
    pub video_drift_steps: i64,
    /// Frame duration assumed before any frame declared or revealed one
    pub default_frame_duration: Pts,
    /// Nominal pts per [`crate::sync::SAMPLE_BLOCK`] samples before `set_audio_rate`
    pub default_pts_per_block: Pts,
    /// How long a discontinuity wait may last before it is reported
    pub barrier_warn_after: Duration,
}

impl SyncConfig {
    /// Set the prebuffer
    pub fn prebuffer(mut self, prebuffer: Pts) -> Self {
        self.prebuffer = prebuffer;
        self
    }

    /// Set both drift tolerances
    pub fn drift_tolerance(mut self, tolerance: Pts) -> Self {
        self.video_drift_tolerance = tolerance;
        self.audio_drift_tolerance = tolerance;
        self
    }

    /// Set the number of frames used for gradual video drift correction
    pub fn video_drift_steps(mut self, steps: i64) -> Self {
        self.video_drift_steps = steps.max(1);
        self
    }

    /// Set the nominal audio rate from a sample rate in Hz
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.default_pts_per_block = crate::sync::pts_per_block(sample_rate);
        self
    }

    /// Set the diagnostic timeout for discontinuity waits
    pub fn barrier_warn_after(mut self, after: Duration) -> Self {
        self.barrier_warn_after = after;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prebuffer: 12_000,
            video_drift_tolerance: 45_000,
            audio_drift_tolerance: 45_000,
            video_drift_steps: 30,
            default_frame_duration: 3_000,
            // 48 kHz
            default_pts_per_block: 61_440,
            barrier_warn_after: Duration::from_secs(5),
        }
    }
}
