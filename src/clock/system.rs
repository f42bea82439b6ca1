// ABOUTME: Default software clock source
// ABOUTME: Derives presentation time from the monotonic wall clock and a stored speed

use crate::clock::{ClockSource, Pts, Speed, PTS_PER_SECOND};
use parking_lot::Mutex;
use std::time::Instant;

/// Priority of the built-in software clock; hardware clocks register above it
pub const SYSTEM_CLOCK_PRIORITY: i32 = 5;

/// Wall-clock instant paired with the presentation time it maps to
#[derive(Debug, Clone, Copy)]
struct Basis {
    wall: Instant,
    pts: Pts,
    speed: Speed,
}

impl Basis {
    #[inline]
    fn time_at(&self, now: Instant) -> Pts {
        let elapsed = now.saturating_duration_since(self.wall);
        let ticks = (elapsed.as_nanos() * PTS_PER_SECOND as u128 / 1_000_000_000) as i64;
        self.pts + self.speed.scale(ticks)
    }
}

/// Software clock backed by [`Instant`]
///
/// `current_time = basis_pts + (now - basis_wall) * speed`. The basis is moved to
/// the present on every `start`, `set_speed` and `adjust`, so speed changes take
/// effect without a jump.
#[derive(Debug)]
pub struct SystemClock {
    basis: Mutex<Basis>,
    priority: i32,
}

impl SystemClock {
    /// Create a stopped clock at time zero
    pub fn new() -> Self {
        Self::with_priority(SYSTEM_CLOCK_PRIORITY)
    }

    /// Create a clock with a custom arbitration priority
    pub fn with_priority(priority: i32) -> Self {
        Self {
            basis: Mutex::new(Basis {
                wall: Instant::now(),
                pts: 0,
                speed: Speed::PAUSE,
            }),
            priority,
        }
    }

    /// Current speed
    pub fn speed(&self) -> Speed {
        self.basis.lock().speed
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    fn name(&self) -> &str {
        "system"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn start(&self, start: Pts) {
        *self.basis.lock() = Basis {
            wall: Instant::now(),
            pts: start,
            speed: Speed::NORMAL,
        };
    }

    fn set_speed(&self, speed: Speed) -> Speed {
        let mut basis = self.basis.lock();
        let now = Instant::now();
        basis.pts = basis.time_at(now);
        basis.wall = now;
        basis.speed = speed;
        speed
    }

    fn adjust(&self, pts: Pts) {
        let mut basis = self.basis.lock();
        basis.wall = Instant::now();
        basis.pts = pts;
    }

    fn current_time(&self) -> Pts {
        let basis = self.basis.lock();
        basis.time_at(Instant::now())
    }
}
