// ABOUTME: Numeric options of the stream synchronizer
// ABOUTME: Get/set by key with master read-through, plus an explicit lock guard

use super::{StreamSynchronizer, SyncState};
use crate::clock::Pts;
use crate::error::Error;
use parking_lot::{ArcMutexGuard, MutexGuard, RawMutex};

/// Option keys for [`StreamSynchronizer::get_option`] / [`StreamSynchronizer::set_option`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOption {
    /// Bias added to every video vpts
    AvOffset,
    /// Bias added to every subtitle vpts
    SpuOffset,
    /// Delay added to "now" when a stream starts or seeks
    Prebuffer,
    /// Mapping from raw stream timestamps to vpts
    VptsOffset,
    /// Current (declared or estimated) frame duration, read-only
    FrameDuration,
    /// Furthest vpts scheduled on either path, read-only
    Vpts,
}

impl SyncOption {
    /// Whether a slave shares this value with its master
    ///
    /// Offsets and the prebuffer belong to the timeline and live on the master;
    /// the frame duration and scheduled vpts describe the stream itself.
    pub fn follows_master(self) -> bool {
        !matches!(self, SyncOption::FrameDuration | SyncOption::Vpts)
    }
}

impl SyncState {
    pub(crate) fn option(&self, option: SyncOption) -> Pts {
        match option {
            SyncOption::AvOffset => self.av_offset,
            SyncOption::SpuOffset => self.spu_offset,
            SyncOption::Prebuffer => self.prebuffer,
            SyncOption::VptsOffset => self.vpts_offset,
            SyncOption::FrameDuration => self.frame_duration,
            SyncOption::Vpts => self.combined_vpts(),
        }
    }

    pub(crate) fn set_option(&mut self, option: SyncOption, value: Pts) -> crate::Result<()> {
        match option {
            SyncOption::AvOffset => self.av_offset = value,
            SyncOption::SpuOffset => self.spu_offset = value,
            SyncOption::Prebuffer => self.prebuffer = value,
            SyncOption::VptsOffset => self.vpts_offset = value,
            SyncOption::FrameDuration | SyncOption::Vpts => {
                return Err(Error::ReadOnlyOption(option))
            }
        }
        Ok(())
    }
}

impl StreamSynchronizer {
    /// Set an option; a slave forwards the write to its master
    pub fn set_option(&self, option: SyncOption, value: Pts) -> crate::Result<()> {
        let mut state = self.state.lock();
        if let Some(master) = state.master.clone() {
            return master.set_option(option, value);
        }
        state.set_option(option, value)?;
        log::debug!("{}: {:?} set to {}", self.name, option, value);
        Ok(())
    }

    /// Read an option; a slave reads shared values from its master
    pub fn get_option(&self, option: SyncOption) -> Pts {
        let state = self.state.lock();
        match state.master.clone() {
            Some(master) if option.follows_master() => master.get_option(option),
            _ => state.option(option),
        }
    }

    /// Hold this synchronizer's lock, and its master's, until the guard drops
    ///
    /// Lets a caller read or write several options atomically. No other method
    /// of this synchronizer (or its master) may be called while the guard lives.
    pub fn lock(&self) -> SyncLock<'_> {
        let state = self.state.lock();
        let master = state.master.as_ref().map(|m| m.state.lock_arc());
        SyncLock { state, master }
    }
}

/// Guard returned by [`StreamSynchronizer::lock`]
///
/// Option access through the guard follows the same master read-through rules
/// as the synchronizer itself, without taking any lock again.
pub struct SyncLock<'a> {
    state: MutexGuard<'a, SyncState>,
    master: Option<ArcMutexGuard<RawMutex, SyncState>>,
}

impl SyncLock<'_> {
    /// Read an option
    pub fn get_option(&self, option: SyncOption) -> Pts {
        match &self.master {
            Some(master) if option.follows_master() => master.option(option),
            _ => self.state.option(option),
        }
    }

    /// Write an option
    pub fn set_option(&mut self, option: SyncOption, value: Pts) -> crate::Result<()> {
        match &mut self.master {
            Some(master) => master.set_option(option, value),
            None => self.state.set_option(option, value),
        }
    }

    /// Whether the guarded synchronizer follows a master
    pub fn is_slave(&self) -> bool {
        self.master.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tests::{manual_clock, synchronizer};
    use crate::SyncConfig;
    use std::sync::Arc;

    #[test]
    fn test_read_only_options() {
        let sync = synchronizer(true, true);
        assert_eq!(
            sync.set_option(SyncOption::Vpts, 1),
            Err(Error::ReadOnlyOption(SyncOption::Vpts))
        );
        assert_eq!(
            sync.set_option(SyncOption::FrameDuration, 1),
            Err(Error::ReadOnlyOption(SyncOption::FrameDuration))
        );
        assert_eq!(sync.get_option(SyncOption::FrameDuration), 3_000);
    }

    #[test]
    fn test_vpts_option_is_furthest_path() {
        let sync = synchronizer(true, true);
        sync.got_audio_samples(0, 48_000);
        assert_eq!(sync.get_option(SyncOption::Vpts), sync.audio_vpts());
        assert!(sync.audio_vpts() > sync.video_vpts());
    }

    #[test]
    fn test_slave_options_go_through_master() {
        let (clock, _source) = manual_clock();
        let master = Arc::new(StreamSynchronizer::new(clock.clone(), SyncConfig::default(), true, true));
        let slave = StreamSynchronizer::new(clock, SyncConfig::default(), true, true);
        slave.set_master(Some(master.clone())).unwrap();

        slave.set_option(SyncOption::AvOffset, 321).unwrap();
        assert_eq!(master.get_option(SyncOption::AvOffset), 321);
        assert_eq!(slave.get_option(SyncOption::AvOffset), 321);
    }

    #[test]
    fn test_slave_keeps_own_stream_measurements() {
        let (clock, _source) = manual_clock();
        let master = Arc::new(StreamSynchronizer::new(clock.clone(), SyncConfig::default(), true, false));
        master.got_video_frame(0, 3_600);
        let slave = StreamSynchronizer::new(clock, SyncConfig::default(), true, false);
        slave.set_master(Some(master.clone())).unwrap();
        slave.got_video_frame(0, 1_800);

        assert_eq!(master.get_option(SyncOption::FrameDuration), 3_600);
        assert_eq!(slave.get_option(SyncOption::FrameDuration), 1_800);
        assert_eq!(slave.lock().get_option(SyncOption::FrameDuration), 1_800);
        assert_eq!(slave.get_option(SyncOption::Vpts), slave.video_vpts().max(slave.audio_vpts()));
        assert_eq!(
            slave.get_option(SyncOption::VptsOffset),
            master.get_option(SyncOption::VptsOffset)
        );
    }

    #[test]
    fn test_lock_guard_reads_master() {
        let (clock, _source) = manual_clock();
        let master = Arc::new(StreamSynchronizer::new(clock.clone(), SyncConfig::default(), true, true));
        master.set_option(SyncOption::SpuOffset, 77).unwrap();
        let slave = StreamSynchronizer::new(clock, SyncConfig::default(), true, true);
        slave.set_master(Some(master.clone())).unwrap();

        {
            let mut guard = slave.lock();
            assert!(guard.is_slave());
            assert_eq!(guard.get_option(SyncOption::SpuOffset), 77);
            guard.set_option(SyncOption::SpuOffset, 78).unwrap();
        }
        assert_eq!(master.get_option(SyncOption::SpuOffset), 78);
    }
}
