// ABOUTME: Clock arbiter selecting the master clock source
// ABOUTME: Fans start/stop/speed out to all sources and resyncs them on a background thread

use crate::clock::{ClockSource, Pts, Speed, SystemClock, CLOCK_INTERFACE_VERSION};
use crate::config::ClockConfig;
use crate::error::Error;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Handle for a registered clock source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

struct Entry {
    id: SourceId,
    source: Arc<dyn ClockSource>,
}

/// Registered sources plus global clock state, guarded by one mutex
struct Registry {
    /// Always present, never unregistered
    fallback: Arc<dyn ClockSource>,
    /// Additional sources in registration order
    sources: Vec<Entry>,
    /// `None` while the fallback is master
    master: Option<SourceId>,
    speed: Speed,
    running: bool,
    adjustable: bool,
    resync_active: bool,
    next_id: u64,
}

impl Registry {
    fn master(&self) -> &Arc<dyn ClockSource> {
        self.master
            .and_then(|id| self.sources.iter().find(|e| e.id == id))
            .map(|e| &e.source)
            .unwrap_or(&self.fallback)
    }

    fn all(&self) -> impl Iterator<Item = &Arc<dyn ClockSource>> {
        std::iter::once(&self.fallback).chain(self.sources.iter().map(|e| &e.source))
    }

    fn others(&self) -> impl Iterator<Item = &Arc<dyn ClockSource>> {
        let master = self.master;
        let fallback = master.is_some().then_some(&self.fallback);
        fallback.into_iter().chain(
            self.sources
                .iter()
                .filter(move |e| Some(e.id) != master)
                .map(|e| &e.source),
        )
    }

    /// Highest priority wins, earlier registration wins ties
    fn select_master(&mut self) {
        let mut best = self.fallback.priority();
        let mut master = None;
        for entry in &self.sources {
            let priority = entry.source.priority();
            if priority > best {
                best = priority;
                master = Some(entry.id);
            }
        }
        if master != self.master {
            self.master = master;
            log::info!("Clock master is now '{}'", self.master().name());
        }
    }

    fn resync_others(&self) -> Pts {
        let now = self.master().current_time();
        for source in self.others() {
            source.adjust(now);
        }
        now
    }
}

struct Shared {
    registry: Mutex<Registry>,
    cancel: Condvar,
    config: ClockConfig,
}

/// Process-wide source of "now"
///
/// Owns a fallback source plus any number of registered sources up to the
/// configured capacity. The highest-priority source is the master; every other
/// source is pulled back to it on registry changes and every resync interval.
pub struct ClockArbiter {
    shared: Arc<Shared>,
    resync: Mutex<Option<JoinHandle<()>>>,
}

impl ClockArbiter {
    /// Create an arbiter backed by a [`SystemClock`] and start its resync thread
    pub fn new(config: ClockConfig) -> Self {
        Self::with_default_source(config, Arc::new(SystemClock::new()))
    }

    /// Create an arbiter with a custom always-present fallback source
    pub fn with_default_source(config: ClockConfig, fallback: Arc<dyn ClockSource>) -> Self {
        let adjustable = config.adjustable;
        let shared = Arc::new(Shared {
            registry: Mutex::new(Registry {
                fallback,
                sources: Vec::new(),
                master: None,
                speed: Speed::PAUSE,
                running: false,
                adjustable,
                resync_active: true,
                next_id: 1,
            }),
            cancel: Condvar::new(),
            config,
        });

        let thread_shared = Arc::clone(&shared);
        let resync = std::thread::Builder::new()
            .name("clock-resync".to_string())
            .spawn(move || resync_loop(thread_shared));
        let resync = match resync {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to spawn clock resync thread: {}", e);
                shared.registry.lock().resync_active = false;
                None
            }
        };

        log::info!(
            "Clock arbiter started: resync every {}ms, capacity {}",
            shared.config.resync_interval.as_millis(),
            shared.config.capacity
        );

        Self {
            shared,
            resync: Mutex::new(resync),
        }
    }

    /// Register an additional clock source
    ///
    /// Re-selects the master and pulls every non-master source to its time.
    pub fn register(&self, source: Arc<dyn ClockSource>) -> crate::Result<SourceId> {
        let version = source.interface_version();
        if version != CLOCK_INTERFACE_VERSION {
            log::warn!(
                "Refusing clock source '{}': interface version {} (expected {})",
                source.name(),
                version,
                CLOCK_INTERFACE_VERSION
            );
            return Err(Error::UnsupportedInterfaceVersion {
                found: version,
                expected: CLOCK_INTERFACE_VERSION,
            });
        }

        let mut registry = self.shared.registry.lock();
        let capacity = self.shared.config.capacity;
        if registry.sources.len() + 1 >= capacity {
            return Err(Error::CapacityExceeded { capacity });
        }

        let id = SourceId(registry.next_id);
        registry.next_id += 1;
        log::info!(
            "Clock source '{}' registered (priority {})",
            source.name(),
            source.priority()
        );
        // Late sources join at the current speed; their time is resynced below
        if registry.running {
            source.set_speed(registry.speed);
        }
        registry.sources.push(Entry { id, source });
        registry.select_master();
        registry.resync_others();
        Ok(id)
    }

    /// Remove a registered source
    ///
    /// The time is read from the master before removal and every remaining source
    /// is adjusted to it, so removing the master does not make time jump. Returns
    /// `None` if the id is unknown.
    pub fn unregister(&self, id: SourceId) -> Option<Arc<dyn ClockSource>> {
        let mut registry = self.shared.registry.lock();
        let index = registry.sources.iter().position(|e| e.id == id)?;

        let now = registry.master().current_time();
        let entry = registry.sources.remove(index);
        if registry.master == Some(id) {
            registry.master = None;
        }
        for source in registry.all() {
            source.adjust(now);
        }
        registry.select_master();

        log::info!("Clock source '{}' unregistered", entry.source.name());
        Some(entry.source)
    }

    /// Start every source at `start` and run at normal speed
    pub fn start(&self, start: Pts) {
        let mut registry = self.shared.registry.lock();
        for source in registry.all() {
            source.start(start);
        }
        registry.speed = Speed::NORMAL;
        registry.running = true;
        log::debug!("Clock started at {}", start);
    }

    /// Pause every source
    pub fn stop(&self) {
        let mut registry = self.shared.registry.lock();
        for source in registry.all() {
            source.set_speed(Speed::PAUSE);
        }
        registry.speed = Speed::PAUSE;
        registry.running = false;
    }

    /// Resume every source at normal speed
    pub fn resume(&self) {
        let mut registry = self.shared.registry.lock();
        for source in registry.all() {
            source.set_speed(Speed::NORMAL);
        }
        registry.speed = Speed::NORMAL;
        registry.running = true;
    }

    /// Change speed on all sources
    ///
    /// The master is asked first; whatever speed it actually applied is then
    /// forced on every other source. Returns that speed.
    pub fn set_speed(&self, speed: Speed) -> Speed {
        let mut registry = self.shared.registry.lock();
        let applied = registry.master().set_speed(speed);
        for source in registry.others() {
            source.set_speed(applied);
        }
        if applied != speed {
            log::debug!("Clock speed {:?} requested, {:?} applied", speed, applied);
        }
        registry.speed = applied;
        registry.running = !applied.is_paused();
        applied
    }

    /// Re-base the master to `pts`, if adjustment is enabled
    pub fn adjust(&self, pts: Pts) {
        let registry = self.shared.registry.lock();
        if registry.adjustable {
            registry.master().adjust(pts);
        } else {
            log::debug!("Clock adjust to {} ignored, adjustment disabled", pts);
        }
    }

    /// Current time of the master source
    pub fn current_time(&self) -> Pts {
        self.shared.registry.lock().master().current_time()
    }

    /// Enable or disable `adjust`
    pub fn set_adjustable(&self, adjustable: bool) {
        self.shared.registry.lock().adjustable = adjustable;
    }

    /// Whether `adjust` reaches the master
    pub fn is_adjustable(&self) -> bool {
        self.shared.registry.lock().adjustable
    }

    /// Speed last applied to all sources
    pub fn speed(&self) -> Speed {
        self.shared.registry.lock().speed
    }

    /// Whether the clock is running (started or resumed, not stopped)
    pub fn is_running(&self) -> bool {
        self.shared.registry.lock().running
    }

    /// Name of the current master source
    pub fn master_name(&self) -> String {
        self.shared.registry.lock().master().name().to_string()
    }

    /// Number of sources, the fallback included
    pub fn source_count(&self) -> usize {
        self.shared.registry.lock().sources.len() + 1
    }

    /// Stop the resync thread and wait for it
    ///
    /// Returns within one lock acquisition; the thread observes the flag as soon as
    /// its timed wait is signalled. Calling it again is a no-op.
    pub fn shutdown(&self) {
        {
            let mut registry = self.shared.registry.lock();
            if !registry.resync_active {
                return;
            }
            registry.resync_active = false;
        }
        self.shared.cancel.notify_all();

        if let Some(handle) = self.resync.lock().take() {
            if handle.join().is_err() {
                log::error!("Clock resync thread panicked");
            }
        }
        log::info!("Clock arbiter shut down");
    }
}

impl Drop for ClockArbiter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ClockArbiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.shared.registry.lock();
        f.debug_struct("ClockArbiter")
            .field("master", &registry.master().name())
            .field("sources", &(registry.sources.len() + 1))
            .field("speed", &registry.speed)
            .field("running", &registry.running)
            .finish()
    }
}

fn resync_loop(shared: Arc<Shared>) {
    let interval = shared.config.resync_interval;
    let mut registry = shared.registry.lock();
    while registry.resync_active {
        let now = registry.resync_others();
        log::trace!("Clock sources resynced to {}", now);
        shared.cancel.wait_for(&mut registry, interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::{Duration, Instant};

    fn manual_arbiter(config: ClockConfig) -> (ClockArbiter, Arc<ManualClock>) {
        let fallback = Arc::new(ManualClock::new("fallback", 5));
        let arbiter = ClockArbiter::with_default_source(config, fallback.clone());
        (arbiter, fallback)
    }

    struct OldClock;

    impl ClockSource for OldClock {
        fn name(&self) -> &str {
            "old"
        }
        fn priority(&self) -> i32 {
            100
        }
        fn interface_version(&self) -> u32 {
            2
        }
        fn start(&self, _start: Pts) {}
        fn set_speed(&self, speed: Speed) -> Speed {
            speed
        }
        fn adjust(&self, _pts: Pts) {}
        fn current_time(&self) -> Pts {
            0
        }
    }

    /// Only supports whole and half speeds
    struct CoarseClock(ManualClock);

    impl ClockSource for CoarseClock {
        fn name(&self) -> &str {
            "coarse"
        }
        fn priority(&self) -> i32 {
            50
        }
        fn start(&self, start: Pts) {
            self.0.start(start)
        }
        fn set_speed(&self, speed: Speed) -> Speed {
            let half = Speed::NORMAL.0 / 2;
            let applied = Speed((speed.0 + half / 2) / half * half);
            self.0.set_speed(applied)
        }
        fn adjust(&self, pts: Pts) {
            self.0.adjust(pts)
        }
        fn current_time(&self) -> Pts {
            self.0.current_time()
        }
    }

    #[test]
    fn test_highest_priority_is_master() {
        let (arbiter, _fallback) = manual_arbiter(ClockConfig::default());
        assert_eq!(arbiter.master_name(), "fallback");

        arbiter.register(Arc::new(ManualClock::new("low", 1))).unwrap();
        assert_eq!(arbiter.master_name(), "fallback");

        arbiter.register(Arc::new(ManualClock::new("high", 20))).unwrap();
        arbiter.register(Arc::new(ManualClock::new("tie", 20))).unwrap();
        assert_eq!(arbiter.master_name(), "high", "earlier registration wins ties");
    }

    #[test]
    fn test_capacity_exceeded() {
        let (arbiter, _fallback) = manual_arbiter(ClockConfig::default().capacity(3));
        arbiter.register(Arc::new(ManualClock::new("a", 1))).unwrap();
        arbiter.register(Arc::new(ManualClock::new("b", 1))).unwrap();
        let err = arbiter
            .register(Arc::new(ManualClock::new("c", 1)))
            .unwrap_err();
        assert_eq!(err, Error::CapacityExceeded { capacity: 3 });
        assert_eq!(arbiter.source_count(), 3);
    }

    #[test]
    fn test_unsupported_interface_version() {
        let (arbiter, _fallback) = manual_arbiter(ClockConfig::default());
        let err = arbiter.register(Arc::new(OldClock)).unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedInterfaceVersion {
                found: 2,
                expected: CLOCK_INTERFACE_VERSION
            }
        );
        assert_eq!(arbiter.master_name(), "fallback");
    }

    #[test]
    fn test_register_pulls_others_to_new_master() {
        let (arbiter, fallback) = manual_arbiter(ClockConfig::default());
        arbiter.start(0);
        fallback.advance(9_000);

        let hardware = Arc::new(ManualClock::new("hardware", 10));
        hardware.start(500_000);
        arbiter.register(hardware.clone()).unwrap();

        assert_eq!(arbiter.current_time(), 500_000);
        assert_eq!(fallback.current_time(), 500_000);
    }

    #[test]
    fn test_late_source_joins_running_clock() {
        let (arbiter, fallback) = manual_arbiter(ClockConfig::default());
        arbiter.start(0);
        fallback.advance(3_000);

        let late = Arc::new(ManualClock::new("late", 1));
        arbiter.register(late.clone()).unwrap();
        assert_eq!(late.speed(), Speed::NORMAL);
        assert_eq!(late.current_time(), 3_000);
    }

    #[test]
    fn test_unregister_master_keeps_time() {
        let (arbiter, fallback) = manual_arbiter(ClockConfig::default());
        let hardware = Arc::new(ManualClock::new("hardware", 10));
        let id = arbiter.register(hardware.clone()).unwrap();
        arbiter.start(0);
        hardware.advance(90_000);
        fallback.advance(80_000);

        let before = arbiter.current_time();
        let removed = arbiter.unregister(id);
        assert!(removed.is_some());
        assert_eq!(arbiter.master_name(), "fallback");
        assert_eq!(arbiter.current_time(), before);
        assert!(arbiter.unregister(id).is_none());
    }

    #[test]
    fn test_stop_and_resume_reach_every_source() {
        let (arbiter, fallback) = manual_arbiter(ClockConfig::default());
        let other = Arc::new(ManualClock::new("other", 10));
        arbiter.register(other.clone()).unwrap();
        arbiter.start(0);
        assert!(arbiter.is_running());

        arbiter.stop();
        assert_eq!(fallback.speed(), Speed::PAUSE);
        assert_eq!(other.speed(), Speed::PAUSE);
        assert!(!arbiter.is_running());

        arbiter.resume();
        assert_eq!(fallback.speed(), Speed::NORMAL);
        assert_eq!(other.speed(), Speed::NORMAL);
    }

    #[test]
    fn test_set_speed_uses_master_applied_speed() {
        let (arbiter, fallback) = manual_arbiter(ClockConfig::default());
        arbiter
            .register(Arc::new(CoarseClock(ManualClock::new("inner", 0))))
            .unwrap();
        arbiter.start(0);

        let applied = arbiter.set_speed(Speed(1_400_000));
        assert_eq!(applied, Speed(1_500_000));
        assert_eq!(fallback.speed(), applied);
        assert_eq!(arbiter.speed(), applied);
    }

    #[test]
    fn test_adjust_disabled_is_ignored() {
        let (arbiter, fallback) = manual_arbiter(ClockConfig::default().adjustable(false));
        arbiter.start(0);
        arbiter.adjust(77_000);
        assert_eq!(fallback.current_time(), 0);

        arbiter.set_adjustable(true);
        arbiter.adjust(77_000);
        assert_eq!(arbiter.current_time(), 77_000);
    }

    #[test]
    fn test_resync_thread_converges_sources() {
        let config = ClockConfig::default().resync_interval(Duration::from_millis(10));
        let (arbiter, fallback) = manual_arbiter(config);
        let master = Arc::new(ManualClock::new("master", 10));
        arbiter.register(master.clone()).unwrap();
        arbiter.start(0);
        master.advance(45_000);

        let deadline = Instant::now() + Duration::from_secs(2);
        while fallback.current_time() != 45_000 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(fallback.current_time(), 45_000);
    }

    #[test]
    fn test_shutdown_is_prompt_and_idempotent() {
        let config = ClockConfig::default().resync_interval(Duration::from_secs(60));
        let (arbiter, _fallback) = manual_arbiter(config);
        let started = Instant::now();
        arbiter.shutdown();
        arbiter.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
