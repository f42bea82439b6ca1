// ABOUTME: Discontinuity handling for the stream synchronizer
// ABOUTME: Pairs video and audio discontinuities by sequence and applies them once

use super::{StreamSynchronizer, SyncState};
use crate::clock::Pts;

/// Kind of break in the raw timestamp sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscontinuityKind {
    /// New stream; raw timestamps start over
    StreamStart,
    /// Seek; the given offset is the raw timestamp the stream resumes at
    StreamSeek,
    /// Raw timestamps restart at the given absolute offset
    Absolute,
    /// Raw timestamps shifted by the given amount
    Relative,
}

/// Where the video/audio discontinuity handshake stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierPhase {
    /// No discontinuity in flight
    Steady,
    /// One producer signalled a discontinuity its peer has not reached yet
    AwaitingPeer,
    /// Both producers arrived; the discontinuity is being applied
    Resolved,
}

/// Sequence number of one producer's discontinuity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Ticket(u64);

/// Counters pairing the n-th video discontinuity with the n-th audio one
#[derive(Debug, Default)]
pub(crate) struct DiscontinuityBarrier {
    video: u64,
    audio: u64,
    handled: u64,
}

impl DiscontinuityBarrier {
    fn video_arrived(&mut self) -> Ticket {
        self.video += 1;
        Ticket(self.video)
    }

    fn audio_arrived(&mut self) -> Ticket {
        self.audio += 1;
        Ticket(self.audio)
    }

    fn audio_reached(&self, ticket: Ticket) -> bool {
        self.audio >= ticket.0
    }

    fn is_handled(&self, ticket: Ticket) -> bool {
        self.handled >= ticket.0
    }

    fn resolve(&mut self, ticket: Ticket) {
        self.handled = self.handled.max(ticket.0);
    }

    fn phase(&self, paired: bool) -> BarrierPhase {
        if !paired {
            BarrierPhase::Steady
        } else if self.video != self.audio {
            BarrierPhase::AwaitingPeer
        } else if self.handled < self.video {
            BarrierPhase::Resolved
        } else {
            BarrierPhase::Steady
        }
    }
}

impl SyncState {
    fn restart_at(&mut self, vpts: Pts) {
        self.video_vpts = vpts;
        self.audio_vpts = vpts;
        self.audio_vpts_rmndr = 0;
        self.force_video_jump = true;
        self.force_audio_jump = true;
        self.video_drift = 0;
        self.video_drift_step = 0;
        self.audio_drift_step = 0;
    }

    pub(crate) fn apply_discontinuity(&mut self, kind: DiscontinuityKind, offset: Pts, now: Pts) {
        match kind {
            DiscontinuityKind::StreamStart | DiscontinuityKind::StreamSeek => {
                self.restart_at(now + self.prebuffer);
            }
            DiscontinuityKind::Absolute | DiscontinuityKind::Relative => {
                if self.video_vpts < now {
                    // Video stalled (still frame)
                    if self.audio_vpts > now {
                        self.video_vpts = self.audio_vpts;
                    } else {
                        self.restart_at(now + self.prebuffer);
                    }
                } else if self.audio_vpts < now {
                    self.audio_vpts = self.video_vpts;
                    self.audio_vpts_rmndr = 0;
                }
            }
        }

        match kind {
            DiscontinuityKind::StreamStart => self.vpts_offset = self.video_vpts,
            DiscontinuityKind::StreamSeek | DiscontinuityKind::Absolute => {
                self.vpts_offset = self.video_vpts - offset;
            }
            DiscontinuityKind::Relative => self.vpts_offset -= offset,
        }

        self.last_video_pts = 0;
        self.last_audio_pts = 0;
        self.frames_since_pts = 0;
        self.audio_samples = 0;
        self.video_floor = Pts::MIN;
        self.audio_floor = Pts::MIN;
    }
}

impl StreamSynchronizer {
    /// Signal a discontinuity from the video producer
    ///
    /// With an audio producer present this blocks until the audio producer has
    /// signalled the matching discontinuity; the video side then applies it. A
    /// synchronizer following a master ignores the call.
    pub fn handle_video_discontinuity(&self, kind: DiscontinuityKind, offset: Pts) {
        let mut state = self.state.lock();
        if state.master.is_some() {
            log::debug!("{}: slave ignores video discontinuity {:?}", self.name, kind);
            return;
        }

        let ticket = state.barrier.video_arrived();
        self.video_reached.notify_all();
        log::debug!(
            "{}: video discontinuity #{}, {:?}, offset {}",
            self.name,
            ticket.0,
            kind,
            offset
        );

        if self.have_audio {
            let waiting_for = format!("audio discontinuity #{}", ticket.0);
            self.wait_for_peer(
                &self.audio_reached,
                &mut state,
                |s| s.barrier.audio_reached(ticket),
                &waiting_for,
            );
            if state.video_vpts < state.audio_vpts {
                state.video_vpts = state.audio_vpts;
                log::debug!("{}: video vpts raised to {}", self.name, state.video_vpts);
            }
        }

        let now = self.clock.current_time();
        state.apply_discontinuity(kind, offset, now);
        state.barrier.resolve(ticket);
        self.video_reached.notify_all();
    }

    /// Signal a discontinuity from the audio producer
    ///
    /// Without a video producer the discontinuity is applied at once; otherwise
    /// this blocks until the video producer has applied the matching one. A
    /// synchronizer following a master ignores the call.
    pub fn handle_audio_discontinuity(&self, kind: DiscontinuityKind, offset: Pts) {
        let mut state = self.state.lock();
        if state.master.is_some() {
            log::debug!("{}: slave ignores audio discontinuity {:?}", self.name, kind);
            return;
        }

        let ticket = state.barrier.audio_arrived();
        self.audio_reached.notify_all();
        log::debug!(
            "{}: audio discontinuity #{}, {:?}, offset {}",
            self.name,
            ticket.0,
            kind,
            offset
        );

        if self.have_video {
            let waiting_for = format!("video to handle discontinuity #{}", ticket.0);
            self.wait_for_peer(
                &self.video_reached,
                &mut state,
                |s| s.barrier.is_handled(ticket),
                &waiting_for,
            );
        } else {
            let now = self.clock.current_time();
            state.apply_discontinuity(kind, offset, now);
            state.barrier.resolve(ticket);
        }
    }

    /// Current state of the discontinuity handshake
    pub fn discontinuity_phase(&self) -> BarrierPhase {
        let paired = self.have_video && self.have_audio;
        self.state.lock().barrier.phase(paired)
    }
}
