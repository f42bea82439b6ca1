// ABOUTME: Clock source abstraction and arbitration
// ABOUTME: Defines the ClockSource trait, speed type and presentation-time units

mod arbiter;
mod manual;
mod system;

pub use arbiter::{ClockArbiter, SourceId};
pub use manual::ManualClock;
pub use system::SystemClock;

/// Presentation time in 90 kHz ticks
pub type Pts = i64;

/// Presentation-time ticks per second
pub const PTS_PER_SECOND: Pts = 90_000;

/// Clock source interface revision understood by [`ClockArbiter`]
pub const CLOCK_INTERFACE_VERSION: u32 = 3;

/// Fixed-point playback speed, [`Speed::NORMAL`] being real time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Speed(pub u32);

impl Speed {
    /// Clock stands still
    pub const PAUSE: Speed = Speed(0);
    /// Real time
    pub const NORMAL: Speed = Speed(1_000_000);

    /// Speed as a multiple of real time
    pub fn factor(self) -> f64 {
        self.0 as f64 / Self::NORMAL.0 as f64
    }

    /// Whether the clock is stopped at this speed
    pub fn is_paused(self) -> bool {
        self.0 == 0
    }

    /// Scale a span of real-time ticks by this speed, rounding toward zero
    pub fn scale(self, ticks: i64) -> i64 {
        (ticks as i128 * self.0 as i128 / Self::NORMAL.0 as i128) as i64
    }
}

/// A provider of "current presentation time"
///
/// Implementations keep their own lock; every method takes `&self` and must be
/// safe to call from the arbiter's resync thread concurrently with the playback
/// controller.
pub trait ClockSource: Send + Sync {
    /// Human-readable name, used in logs
    fn name(&self) -> &str;

    /// Arbitration priority, higher wins
    fn priority(&self) -> i32;

    /// Interface revision this source implements
    fn interface_version(&self) -> u32 {
        CLOCK_INTERFACE_VERSION
    }

    /// Restart the clock at `start` with normal speed
    fn start(&self, start: Pts);

    /// Change speed without a time discontinuity
    ///
    /// Returns the speed actually applied, which may differ from the request.
    fn set_speed(&self, speed: Speed) -> Speed;

    /// Re-base the clock to `pts` at the current instant, keeping its speed
    fn adjust(&self, pts: Pts);

    /// Current presentation time
    fn current_time(&self) -> Pts;
}
