// ABOUTME: Caller-driven clock source
// ABOUTME: Time only moves when the owner advances it, for offline rendering and tests

use crate::clock::{ClockSource, Pts, Speed};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct ManualState {
    pts: Pts,
    speed: Speed,
}

/// Clock source whose time is advanced explicitly
///
/// Useful where presentation is not paced by the wall clock (offline
/// transcoding, frame stepping) and wherever timing must be deterministic.
#[derive(Debug)]
pub struct ManualClock {
    name: String,
    priority: i32,
    state: Mutex<ManualState>,
}

impl ManualClock {
    /// Create a stopped manual clock at time zero
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            state: Mutex::new(ManualState {
                pts: 0,
                speed: Speed::PAUSE,
            }),
        }
    }

    /// Let `ticks` of real time pass; the clock moves by `ticks` scaled by its speed
    pub fn advance(&self, ticks: Pts) {
        let mut state = self.state.lock();
        state.pts += state.speed.scale(ticks);
    }

    /// Current speed
    pub fn speed(&self) -> Speed {
        self.state.lock().speed
    }
}

impl ClockSource for ManualClock {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn start(&self, start: Pts) {
        *self.state.lock() = ManualState {
            pts: start,
            speed: Speed::NORMAL,
        };
    }

    fn set_speed(&self, speed: Speed) -> Speed {
        self.state.lock().speed = speed;
        speed
    }

    fn adjust(&self, pts: Pts) {
        self.state.lock().pts = pts;
    }

    fn current_time(&self) -> Pts {
        self.state.lock().pts
    }
}
