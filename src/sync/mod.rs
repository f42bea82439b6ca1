// ABOUTME: Per-stream presentation-time synchronizer
// ABOUTME: Shared state, master/slave chaining and the subtitle path

mod audio;
mod discontinuity;
mod options;
mod video;

pub use discontinuity::{BarrierPhase, DiscontinuityKind};
pub use options::{SyncLock, SyncOption};
pub use video::FrameTiming;

use crate::clock::{ClockArbiter, Pts, PTS_PER_SECOND};
use crate::config::SyncConfig;
use crate::error::Error;
use discontinuity::DiscontinuityBarrier;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use video::VideoMode;

/// Number of samples the audio rate is expressed against
pub const SAMPLE_BLOCK: i64 = 32_768;

/// Nominal pts per [`SAMPLE_BLOCK`] samples at `sample_rate` Hz
pub fn pts_per_block(sample_rate: u32) -> Pts {
    PTS_PER_SECOND * SAMPLE_BLOCK / sample_rate.max(1) as i64
}

/// Serializes master changes across all synchronizers
static MASTER_ATTACH: Mutex<()> = Mutex::new(());

/// Everything a synchronizer owns, guarded by its one mutex
pub(crate) struct SyncState {
    pub(crate) video_vpts: Pts,
    pub(crate) audio_vpts: Pts,
    /// Fractional audio pts in 1/SAMPLE_BLOCK units
    pub(crate) audio_vpts_rmndr: i64,
    pub(crate) vpts_offset: Pts,
    pub(crate) av_offset: Pts,
    pub(crate) spu_offset: Pts,
    pub(crate) prebuffer: Pts,

    pub(crate) video_mode: VideoMode,
    pub(crate) frame_duration: Pts,
    pub(crate) frames_since_pts: i64,
    pub(crate) last_video_pts: Pts,
    /// Last video vpts handed out; snaps never go below it
    pub(crate) video_floor: Pts,
    pub(crate) video_drift: Pts,
    pub(crate) video_drift_step: Pts,
    pub(crate) force_video_jump: bool,

    pub(crate) pts_per_block: Pts,
    pub(crate) last_audio_pts: Pts,
    pub(crate) audio_samples: i64,
    /// Last audio vpts handed out; snaps never go below it
    pub(crate) audio_floor: Pts,
    pub(crate) audio_drift_step: Pts,
    pub(crate) force_audio_jump: bool,

    pub(crate) spu_vpts: Pts,

    pub(crate) barrier: DiscontinuityBarrier,
    pub(crate) master: Option<Arc<StreamSynchronizer>>,
    pub(crate) needs_master_seed: bool,
}

impl SyncState {
    fn new(config: &SyncConfig) -> Self {
        Self {
            video_vpts: config.prebuffer,
            audio_vpts: config.prebuffer,
            audio_vpts_rmndr: 0,
            vpts_offset: 0,
            av_offset: 0,
            spu_offset: 0,
            prebuffer: config.prebuffer,
            video_mode: VideoMode::Prediction,
            frame_duration: config.default_frame_duration,
            frames_since_pts: 0,
            last_video_pts: 0,
            video_floor: Pts::MIN,
            video_drift: 0,
            video_drift_step: 0,
            force_video_jump: false,
            pts_per_block: config.default_pts_per_block,
            last_audio_pts: 0,
            audio_samples: 0,
            audio_floor: Pts::MIN,
            audio_drift_step: 0,
            force_audio_jump: false,
            spu_vpts: 0,
            barrier: DiscontinuityBarrier::default(),
            master: None,
            needs_master_seed: false,
        }
    }

    /// Larger of the two accumulators: how far this stream has been scheduled
    pub(crate) fn combined_vpts(&self) -> Pts {
        self.video_vpts.max(self.audio_vpts)
    }

    fn spu_packet(&mut self, pts: Pts) -> Pts {
        let vpts = (pts + self.vpts_offset + self.spu_offset).max(self.spu_vpts);
        self.spu_vpts = vpts;
        vpts
    }
}

/// Presentation-time synchronizer for one stream
///
/// The video and audio decoder threads of a stream call into the same
/// synchronizer concurrently. Each unit gets a vpts on the shared presentation
/// timeline; the two threads only rendezvous at discontinuities.
///
/// A synchronizer with a master (see [`StreamSynchronizer::set_master`]) reads
/// its offsets from the master on every unit and never originates a
/// discontinuity itself.
pub struct StreamSynchronizer {
    state: Arc<Mutex<SyncState>>,
    /// Signalled when the video side arrives at or resolves a discontinuity
    video_reached: Condvar,
    /// Signalled when the audio side arrives at a discontinuity
    audio_reached: Condvar,
    clock: Arc<ClockArbiter>,
    config: SyncConfig,
    have_video: bool,
    have_audio: bool,
    name: String,
}

impl StreamSynchronizer {
    /// Create a synchronizer for a stream with the given producers
    pub fn new(
        clock: Arc<ClockArbiter>,
        config: SyncConfig,
        have_video: bool,
        have_audio: bool,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(SyncState::new(&config))),
            video_reached: Condvar::new(),
            audio_reached: Condvar::new(),
            clock,
            config,
            have_video,
            have_audio,
            name: "stream".to_string(),
        }
    }

    /// Set the name used in log messages
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Name used in log messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a video producer feeds this stream
    pub fn has_video(&self) -> bool {
        self.have_video
    }

    /// Whether an audio producer feeds this stream
    pub fn has_audio(&self) -> bool {
        self.have_audio
    }

    /// Clock arbiter this synchronizer reads "now" from
    pub fn clock(&self) -> &Arc<ClockArbiter> {
        &self.clock
    }

    /// Assign a vpts to a subtitle packet
    ///
    /// Subtitles get no drift correction; the result is only kept monotonic.
    pub fn got_spu_packet(&self, pts: Pts) -> Pts {
        let mut state = self.state.lock();
        self.follow_master(&mut state);
        state.spu_packet(pts)
    }

    /// Set the nominal audio rate as pts per [`SAMPLE_BLOCK`] samples
    pub fn set_audio_rate(&self, pts_per_block: Pts) {
        if pts_per_block <= 0 {
            log::warn!("{}: ignoring audio rate {}", self.name, pts_per_block);
            return;
        }
        self.state.lock().pts_per_block = pts_per_block;
        log::debug!("{}: audio rate set to {} pts/block", self.name, pts_per_block);
    }

    /// Predicted vpts of the next video frame, without the A/V offset
    pub fn video_vpts(&self) -> Pts {
        self.state.lock().video_vpts
    }

    /// Predicted vpts of the next audio block
    pub fn audio_vpts(&self) -> Pts {
        self.state.lock().audio_vpts
    }

    /// Attach to (or with `None`, detach from) a master synchronizer
    ///
    /// On the next unit after attaching, both accumulators adopt the master's
    /// current position at once instead of drifting towards it.
    pub fn set_master(&self, master: Option<Arc<StreamSynchronizer>>) -> crate::Result<()> {
        // Cycle check and assignment must not interleave with another attach
        let _attach = MASTER_ATTACH.lock();
        if let Some(master) = &master {
            let mut cursor = Some(Arc::clone(master));
            while let Some(node) = cursor {
                if std::ptr::eq(Arc::as_ptr(&node), self) {
                    return Err(Error::MasterCycle);
                }
                cursor = node.state.lock().master.clone();
            }
        }

        let mut state = self.state.lock();
        match &master {
            Some(m) => log::debug!("{}: following master '{}'", self.name, m.name),
            None if state.master.is_some() => log::debug!("{}: detached from master", self.name),
            None => {}
        }
        state.needs_master_seed = master.is_some();
        state.master = master;
        Ok(())
    }

    /// Current master, if any
    pub fn master(&self) -> Option<Arc<StreamSynchronizer>> {
        self.state.lock().master.clone()
    }

    /// Copy offsets from the master into our own state
    ///
    /// Lock order is always slave, then master.
    fn follow_master(&self, state: &mut SyncState) {
        let Some(master) = state.master.clone() else {
            return;
        };
        let master_state = master.state.lock();
        if state.needs_master_seed {
            let vpts = master_state.combined_vpts();
            state.video_vpts = vpts;
            state.audio_vpts = vpts;
            state.audio_vpts_rmndr = 0;
            state.video_floor = Pts::MIN;
            state.audio_floor = Pts::MIN;
            state.force_video_jump = true;
            state.force_audio_jump = true;
            state.needs_master_seed = false;
            log::debug!("{}: seeded from master at vpts {}", self.name, vpts);
        }
        state.vpts_offset = master_state.vpts_offset;
        state.av_offset = master_state.av_offset;
        state.spu_offset = master_state.spu_offset;
    }

    /// Block on `condvar` until `ready` holds, logging while it takes too long
    fn wait_for_peer(
        &self,
        condvar: &Condvar,
        state: &mut MutexGuard<'_, SyncState>,
        ready: impl Fn(&SyncState) -> bool,
        waiting_for: &str,
    ) {
        let started = Instant::now();
        while !ready(state) {
            let timed_out = condvar
                .wait_for(state, self.config.barrier_warn_after)
                .timed_out();
            if timed_out && !ready(state) {
                log::warn!(
                    "{}: still waiting for {} after {:.1}s (unpaired discontinuity?)",
                    self.name,
                    waiting_for,
                    started.elapsed().as_secs_f64()
                );
            }
        }
    }
}

impl fmt::Debug for StreamSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("StreamSynchronizer")
            .field("name", &self.name)
            .field("video_vpts", &state.video_vpts)
            .field("audio_vpts", &state.audio_vpts)
            .field("vpts_offset", &state.vpts_offset)
            .field("has_master", &state.master.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ClockConfig;

    /// Arbiter driven by a manual clock started at zero
    pub(crate) fn manual_clock() -> (Arc<ClockArbiter>, Arc<ManualClock>) {
        let source = Arc::new(ManualClock::new("manual", 5));
        let arbiter = Arc::new(ClockArbiter::with_default_source(
            ClockConfig::default(),
            source.clone(),
        ));
        arbiter.start(0);
        (arbiter, source)
    }

    pub(crate) fn synchronizer(have_video: bool, have_audio: bool) -> StreamSynchronizer {
        let (clock, _source) = manual_clock();
        StreamSynchronizer::new(clock, SyncConfig::default(), have_video, have_audio)
    }

    #[test]
    fn test_pts_per_block() {
        assert_eq!(pts_per_block(48_000), 61_440);
        assert_eq!(pts_per_block(44_100), 66_873);
    }

    #[test]
    fn test_spu_packets_never_go_backwards() {
        let sync = synchronizer(true, false);
        sync.set_option(SyncOption::SpuOffset, 100).unwrap();
        sync.set_option(SyncOption::VptsOffset, 1_000).unwrap();

        assert_eq!(sync.got_spu_packet(9_000), 10_100);
        assert_eq!(sync.got_spu_packet(5_000), 10_100);
        assert_eq!(sync.got_spu_packet(20_000), 21_100);
    }

    #[test]
    fn test_master_cycle_rejected() {
        let (clock, _source) = manual_clock();
        let a = Arc::new(StreamSynchronizer::new(clock.clone(), SyncConfig::default(), true, true));
        let b = Arc::new(StreamSynchronizer::new(clock, SyncConfig::default(), true, true));

        assert_eq!(a.set_master(Some(a.clone())), Err(Error::MasterCycle));
        b.set_master(Some(a.clone())).unwrap();
        assert_eq!(a.set_master(Some(b.clone())), Err(Error::MasterCycle));

        b.set_master(None).unwrap();
        assert!(b.master().is_none());
    }

    #[test]
    fn test_concurrent_attach_never_forms_cycle() {
        let (clock, _source) = manual_clock();
        for _ in 0..200 {
            let a = Arc::new(StreamSynchronizer::new(clock.clone(), SyncConfig::default(), true, true));
            let b = Arc::new(StreamSynchronizer::new(clock.clone(), SyncConfig::default(), true, true));

            let handles: Vec<_> = [(a.clone(), b.clone()), (b.clone(), a.clone())]
                .into_iter()
                .map(|(slave, master)| std::thread::spawn(move || slave.set_master(Some(master))))
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            assert!(results.contains(&Err(Error::MasterCycle)));
            assert!(a.master().is_none() || b.master().is_none());
        }
    }

    #[test]
    fn test_slave_seeds_from_master_and_reads_offsets() {
        let (clock, _source) = manual_clock();
        let master = Arc::new(StreamSynchronizer::new(clock.clone(), SyncConfig::default(), true, false));
        master.handle_video_discontinuity(DiscontinuityKind::StreamStart, 0);
        master.set_option(SyncOption::AvOffset, 450).unwrap();
        for i in 0..10 {
            master.got_video_frame(i * 3_000 + 1, 3_000);
        }

        let slave = StreamSynchronizer::new(clock, SyncConfig::default(), true, true);
        slave.set_master(Some(master.clone())).unwrap();
        let master_vpts = master.video_vpts().max(master.audio_vpts());

        let timing = slave.got_video_frame(0, 3_000);
        assert_eq!(timing.vpts, master_vpts + 450);
        assert_eq!(slave.audio_vpts(), master_vpts);

        // Raw timestamps map through the master's offset
        let offset = master.get_option(SyncOption::VptsOffset);
        let timing = slave.got_video_frame(90_000, 3_000);
        assert_eq!(timing.vpts, 90_000 + offset + 450);
    }
}
