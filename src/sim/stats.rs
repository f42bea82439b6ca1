// ABOUTME: Playback statistics collected by the simulator
// ABOUTME: Thread-safe counters and a serializable report snapshot

use crate::clock::Pts;
use parking_lot::RwLock;
use serde::Serialize;

/// Snapshot of a simulated playback
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackReport {
    /// Video frames scheduled
    pub video_frames: u64,
    /// Audio blocks scheduled
    pub audio_blocks: u64,
    /// Subtitle packets scheduled
    pub spu_packets: u64,
    /// Discontinuities applied (counted once per producer)
    pub discontinuities: u64,
    /// Last vpts handed to the video output
    pub last_video_vpts: Option<Pts>,
    /// Last vpts handed to the audio output
    pub last_audio_vpts: Option<Pts>,
    /// Times a path got a vpts lower than the previous one outside a discontinuity
    pub backsteps: u64,
    /// Current mapping from raw timestamps to vpts
    pub vpts_offset: Pts,
    /// Master clock at the time of the snapshot
    pub clock_now: Pts,
}

impl PlaybackReport {
    /// Video minus audio position, if both paths have run
    pub fn av_gap(&self) -> Option<Pts> {
        Some(self.last_video_vpts? - self.last_audio_vpts?)
    }
}

/// Shared statistics written by the producer threads
#[derive(Debug, Default)]
pub struct PlaybackStats {
    report: RwLock<PlaybackReport>,
}

impl PlaybackStats {
    /// Create empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a scheduled video frame
    pub fn video_frame(&self, vpts: Pts) {
        let mut report = self.report.write();
        report.video_frames += 1;
        if report.last_video_vpts.is_some_and(|last| vpts < last) {
            report.backsteps += 1;
        }
        report.last_video_vpts = Some(vpts);
    }

    /// Record a scheduled audio block
    pub fn audio_block(&self, vpts: Pts) {
        let mut report = self.report.write();
        report.audio_blocks += 1;
        if report.last_audio_vpts.is_some_and(|last| vpts < last) {
            report.backsteps += 1;
        }
        report.last_audio_vpts = Some(vpts);
    }

    /// Record a scheduled subtitle packet
    pub fn spu_packet(&self) {
        self.report.write().spu_packets += 1;
    }

    /// Record a discontinuity on `video` or audio path; the path's history restarts
    pub fn discontinuity(&self, video: bool) {
        let mut report = self.report.write();
        report.discontinuities += 1;
        if video {
            report.last_video_vpts = None;
        } else {
            report.last_audio_vpts = None;
        }
    }

    /// Take a snapshot, filling in the offset and clock
    pub fn snapshot(&self, vpts_offset: Pts, clock_now: Pts) -> PlaybackReport {
        let mut report = self.report.read().clone();
        report.vpts_offset = vpts_offset;
        report.clock_now = clock_now;
        report
    }
}
