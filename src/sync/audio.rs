// ABOUTME: Audio path of the stream synchronizer
// ABOUTME: Advances audio vpts by sample count and feeds rate drift into the shared offset

use super::{StreamSynchronizer, SyncState, SAMPLE_BLOCK};
use crate::clock::Pts;
use crate::config::SyncConfig;

impl SyncState {
    pub(crate) fn audio_samples(&mut self, pts: Pts, samples: u32, config: &SyncConfig) -> Pts {
        let samples = samples as i64;

        if pts != 0 && pts != self.last_audio_pts {
            let candidate = pts + self.vpts_offset;
            let diff = self.audio_vpts - candidate;
            self.last_audio_pts = pts;

            if diff.abs() > config.audio_drift_tolerance || self.force_audio_jump {
                if !self.force_audio_jump {
                    log::debug!("audio jump by {} pts", -diff);
                }
                self.force_audio_jump = false;
                if candidate < self.audio_floor {
                    // Raw timestamps went backwards: keep counting and move the mapping
                    self.vpts_offset += self.audio_vpts - candidate;
                    log::debug!("audio pts went back, vpts offset now {}", self.vpts_offset);
                } else {
                    self.audio_vpts = candidate;
                    self.audio_vpts_rmndr = 0;
                }
                self.audio_drift_step = 0;
            } else if self.audio_samples > 0 {
                // The device cannot be told to play faster, so correct the rate
                // the rest of the stream is mapped with; only a quarter of the
                // measured error per interval for stability
                let step = diff * SAMPLE_BLOCK / (self.audio_samples * 4);
                let limit = self.pts_per_block / 4;
                self.audio_drift_step = step.clamp(-limit, limit);
                log::trace!("audio drift {} pts, step {}", diff, self.audio_drift_step);
            }
            self.audio_samples = 0;
        }

        let vpts = self.audio_vpts;
        self.audio_floor = vpts;

        // Carry the truncated fraction so long playback does not run ahead of the device
        let span = samples * self.pts_per_block;
        self.audio_vpts += span / SAMPLE_BLOCK;
        self.audio_vpts_rmndr += span % SAMPLE_BLOCK;
        if self.audio_vpts_rmndr >= SAMPLE_BLOCK {
            self.audio_vpts += 1;
            self.audio_vpts_rmndr -= SAMPLE_BLOCK;
        }
        self.audio_samples += samples;

        // Audio sets the rate, video follows through the shared offset
        self.vpts_offset += samples * self.audio_drift_step / SAMPLE_BLOCK;

        vpts
    }
}

impl StreamSynchronizer {
    /// Assign a vpts to a block of `samples` audio samples
    ///
    /// `pts` is the block's raw stream timestamp, or 0 if it has none. The
    /// returned vpts is when the first sample should be heard.
    pub fn got_audio_samples(&self, pts: Pts, samples: u32) -> Pts {
        let mut state = self.state.lock();
        self.follow_master(&mut state);
        state.audio_samples(pts, samples, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::tests::synchronizer;
    use crate::sync::{pts_per_block, DiscontinuityKind, SyncOption};

    fn started() -> StreamSynchronizer {
        let sync = synchronizer(false, true);
        sync.handle_audio_discontinuity(DiscontinuityKind::StreamStart, 0);
        sync
    }

    #[test]
    fn test_remainder_carry_matches_exact_total() {
        let sync = started();
        let ppb = pts_per_block(44_100);
        sync.set_audio_rate(ppb);
        let start = sync.audio_vpts();

        let blocks = [1_024u32, 1_152, 441, 7, 2_048, 1_000, 333];
        let mut total_samples = 0i64;
        let mut last = Pts::MIN;
        for round in 0..500 {
            let block = blocks[round % blocks.len()];
            let vpts = sync.got_audio_samples(0, block);
            assert!(vpts >= last);
            last = vpts;
            total_samples += block as i64;
        }

        let exact = total_samples * ppb / SAMPLE_BLOCK;
        assert_eq!(sync.audio_vpts() - start, exact);
    }

    #[test]
    fn test_vpts_assigned_before_advance() {
        let sync = started();
        let prebuffer = sync.get_option(SyncOption::Prebuffer);
        assert_eq!(sync.got_audio_samples(0, 1_024), prebuffer);
        // 1024 samples at 48 kHz are 1920 ticks
        assert_eq!(sync.got_audio_samples(0, 1_024), prebuffer + 1_920);
    }

    #[test]
    fn test_large_error_snaps() {
        let sync = started();
        let offset = sync.get_option(SyncOption::VptsOffset);
        sync.got_audio_samples(1, 1_024);
        let vpts = sync.got_audio_samples(500_000, 1_024);
        assert_eq!(vpts, 500_000 + offset);
    }

    #[test]
    fn test_backward_jump_keeps_timeline_moving() {
        let sync = started();
        // 1024 samples at 48 kHz are exactly 1920 ticks
        let mut vpts: Vec<Pts> = (0..10)
            .map(|i| sync.got_audio_samples(900_000 + i * 1_920, 1_024))
            .collect();
        for i in 0..10 {
            vpts.push(sync.got_audio_samples(1_000 + i * 1_920, 1_024));
        }

        for pair in vpts.windows(2) {
            assert_eq!(pair[1] - pair[0], 1_920, "vpts sequence {:?}", vpts);
        }
        assert_eq!(sync.audio_vpts(), vpts[19] + 1_920);
    }

    #[test]
    fn test_forward_jump_then_steady() {
        let sync = started();
        let offset = sync.get_option(SyncOption::VptsOffset);
        for i in 0..5 {
            sync.got_audio_samples(1 + i * 1_920, 1_024);
        }

        let vpts: Vec<Pts> = (0..10)
            .map(|i| sync.got_audio_samples(700_000 + i * 1_920, 1_024))
            .collect();
        assert_eq!(vpts[0], 700_000 + offset);
        for pair in vpts.windows(2) {
            assert_eq!(pair[1] - pair[0], 1_920);
        }
        assert_eq!(sync.get_option(SyncOption::VptsOffset), offset);
    }

    #[test]
    fn test_rate_drift_bends_vpts_offset() {
        let sync = started();
        sync.got_audio_samples(1, 48_000);
        let offset = sync.get_option(SyncOption::VptsOffset);

        // One second of samples, but the stream only advanced 0.99 s
        let vpts = sync.got_audio_samples(1 + 89_100, 1_024);
        assert_eq!(vpts, offset + 1 + 90_000, "within tolerance, no snap");

        // diff 900 over 48000 samples: 900 * 32768 / (48000 * 4) = 153
        let before = sync.get_option(SyncOption::VptsOffset);
        sync.got_audio_samples(0, 32_768);
        assert_eq!(sync.get_option(SyncOption::VptsOffset) - before, 153);
    }

    #[test]
    fn test_rate_drift_step_clamped() {
        let sync = started();
        sync.got_audio_samples(1, 64);
        let before_offset = sync.get_option(SyncOption::VptsOffset);

        // 64 samples are 120 ticks; the stamp claims 40000 more
        sync.got_audio_samples(1 + 120 + 40_000, 64);
        let after_first = sync.get_option(SyncOption::VptsOffset);
        sync.got_audio_samples(0, 32_768);
        let applied = sync.get_option(SyncOption::VptsOffset) - after_first;

        assert!(applied.abs() <= pts_per_block(48_000) / 4);
        assert!(after_first - before_offset <= 0);
    }
}
