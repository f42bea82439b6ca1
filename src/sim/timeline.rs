// ABOUTME: Synthetic demuxer for the playback simulator
// ABOUTME: Interleaves timestamped video frames, audio blocks and seek discontinuities

use crate::clock::{Pts, PTS_PER_SECOND};
use crate::error::Error;
use crate::sync::DiscontinuityKind;
use std::collections::VecDeque;

/// Which producer a unit is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    /// Video decoder thread
    Video,
    /// Audio decoder thread
    Audio,
}

/// One unit handed to a producer thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// A decoded frame; `pts` is 0 when the frame carries no timestamp
    Video {
        /// Raw stream timestamp
        pts: Pts,
        /// Nominal frame duration
        duration: Pts,
    },
    /// A block of decoded samples; `pts` is 0 when the block carries no timestamp
    Audio {
        /// Raw stream timestamp
        pts: Pts,
        /// Samples in the block
        samples: u32,
    },
    /// Break in the raw timestamp sequence
    Discontinuity {
        /// Kind of break
        kind: DiscontinuityKind,
        /// Offset passed along with it
        offset: Pts,
    },
}

/// Shape of the synthetic stream
#[derive(Debug, Clone)]
pub struct StreamProfile {
    /// Video frame rate, 0 for an audio-only stream
    pub fps: f64,
    /// Audio sample rate, 0 for a video-only stream
    pub sample_rate: u32,
    /// Samples per audio block
    pub block_samples: u32,
    /// How far the audio timestamps' clock is off from the sample clock, in ppm
    pub audio_skew_ppm: i32,
    /// Only every n-th unit carries a timestamp
    pub pts_every: u32,
    /// Seek once the stream reaches this time: `(at, to)` in pts
    pub seek: Option<(Pts, Pts)>,
    /// Stream length in pts
    pub length: Pts,
}

impl StreamProfile {
    /// Check the profile describes a playable stream
    pub fn validate(&self) -> crate::Result<()> {
        if !self.has_video() && !self.has_audio() {
            return Err(Error::InvalidConfig("stream has neither video nor audio".into()));
        }
        if self.has_audio() && self.block_samples == 0 {
            return Err(Error::InvalidConfig("audio blocks must hold samples".into()));
        }
        if self.pts_every == 0 {
            return Err(Error::InvalidConfig("pts interval must be at least 1".into()));
        }
        if self.fps < 0.0 || self.fps > 1_000.0 {
            return Err(Error::InvalidConfig(format!("unsupported frame rate {}", self.fps)));
        }
        Ok(())
    }

    /// Whether the stream has a video track
    pub fn has_video(&self) -> bool {
        self.fps > 0.0
    }

    /// Whether the stream has an audio track
    pub fn has_audio(&self) -> bool {
        self.sample_rate > 0
    }

    fn frame_duration(&self) -> Pts {
        (PTS_PER_SECOND as f64 / self.fps).round() as Pts
    }

    /// Stream-time length of one audio block, skew included
    fn block_span(&self) -> f64 {
        let nominal = self.block_samples as f64 * PTS_PER_SECOND as f64 / self.sample_rate as f64;
        nominal * (1.0 + self.audio_skew_ppm as f64 / 1_000_000.0)
    }
}

/// Demuxer producing units of both tracks in stream-time order
pub struct SyntheticDemuxer {
    profile: StreamProfile,
    frame_duration: Pts,
    block_span: f64,
    video_pos: f64,
    audio_pos: f64,
    frames: u64,
    blocks: u64,
    pending: VecDeque<(Track, Unit)>,
    seek_done: bool,
    started: bool,
}

impl SyntheticDemuxer {
    /// Create a demuxer for `profile`
    pub fn new(profile: StreamProfile) -> Self {
        let frame_duration = if profile.has_video() { profile.frame_duration() } else { 0 };
        let block_span = if profile.has_audio() { profile.block_span() } else { 0.0 };
        Self {
            profile,
            frame_duration,
            block_span,
            video_pos: 0.0,
            audio_pos: 0.0,
            frames: 0,
            blocks: 0,
            pending: VecDeque::new(),
            seek_done: false,
            started: false,
        }
    }

    /// Stream profile
    pub fn profile(&self) -> &StreamProfile {
        &self.profile
    }

    fn discontinuity(&mut self, kind: DiscontinuityKind, offset: Pts) {
        let unit = Unit::Discontinuity { kind, offset };
        if self.profile.has_video() {
            self.pending.push_back((Track::Video, unit));
        }
        if self.profile.has_audio() {
            self.pending.push_back((Track::Audio, unit));
        }
    }

    fn stamp(&self, count: u64, pos: f64) -> Pts {
        if count % self.profile.pts_every as u64 == 0 {
            // Raw timestamp 0 means "none", so streams start at tick 1
            pos as Pts + 1
        } else {
            0
        }
    }
}

impl Iterator for SyntheticDemuxer {
    type Item = (Track, Unit);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.started {
            self.started = true;
            self.discontinuity(DiscontinuityKind::StreamStart, 0);
        }
        if let Some(item) = self.pending.pop_front() {
            return Some(item);
        }

        let video_next = self.profile.has_video().then_some(self.video_pos);
        let audio_next = self.profile.has_audio().then_some(self.audio_pos);
        let position = match (video_next, audio_next) {
            (Some(v), Some(a)) => v.min(a),
            (Some(v), None) => v,
            (None, Some(a)) => a,
            (None, None) => return None,
        };

        if let Some((at, to)) = self.profile.seek {
            if !self.seek_done && position >= at as f64 {
                self.seek_done = true;
                self.video_pos = to as f64;
                self.audio_pos = to as f64;
                self.frames = 0;
                self.blocks = 0;
                self.discontinuity(DiscontinuityKind::StreamSeek, to + 1);
                return self.pending.pop_front();
            }
        }
        if position >= self.profile.length as f64 {
            return None;
        }

        match (video_next, audio_next) {
            (Some(v), a) if a.map_or(true, |a| v <= a) => {
                let pts = self.stamp(self.frames, v);
                self.frames += 1;
                self.video_pos += self.frame_duration as f64;
                Some((
                    Track::Video,
                    Unit::Video {
                        pts,
                        duration: self.frame_duration,
                    },
                ))
            }
            _ => {
                let pts = self.stamp(self.blocks, self.audio_pos);
                self.blocks += 1;
                self.audio_pos += self.block_span;
                Some((
                    Track::Audio,
                    Unit::Audio {
                        pts,
                        samples: self.profile.block_samples,
                    },
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> StreamProfile {
        StreamProfile {
            fps: 25.0,
            sample_rate: 48_000,
            block_samples: 1_920,
            audio_skew_ppm: 0,
            pts_every: 1,
            seek: None,
            length: PTS_PER_SECOND,
        }
    }

    #[test]
    fn test_starts_with_paired_stream_start() {
        let mut demux = SyntheticDemuxer::new(profile());
        let start = Unit::Discontinuity {
            kind: DiscontinuityKind::StreamStart,
            offset: 0,
        };
        assert_eq!(demux.next(), Some((Track::Video, start)));
        assert_eq!(demux.next(), Some((Track::Audio, start)));
    }

    #[test]
    fn test_one_second_of_units() {
        let units: Vec<_> = SyntheticDemuxer::new(profile()).collect();
        let frames = units.iter().filter(|(t, u)| *t == Track::Video && matches!(u, Unit::Video { .. })).count();
        let blocks = units.iter().filter(|(_, u)| matches!(u, Unit::Audio { .. })).count();
        // 25 frames of 3600 ticks and 25 blocks of 40ms
        assert_eq!(frames, 25);
        assert_eq!(blocks, 25);
    }

    #[test]
    fn test_sparse_timestamps() {
        let mut p = profile();
        p.sample_rate = 0;
        p.pts_every = 3;
        let stamps: Vec<Pts> = SyntheticDemuxer::new(p)
            .filter_map(|(_, u)| match u {
                Unit::Video { pts, .. } => Some(pts),
                _ => None,
            })
            .take(4)
            .collect();
        assert_eq!(stamps, vec![1, 0, 0, 10_801]);
    }

    #[test]
    fn test_seek_emits_discontinuity_on_both_tracks() {
        let mut p = profile();
        p.seek = Some((45_000, 900_000));
        p.length = 1_000_000;
        let seeks: Vec<_> = SyntheticDemuxer::new(p)
            .filter(|(_, u)| {
                matches!(
                    u,
                    Unit::Discontinuity {
                        kind: DiscontinuityKind::StreamSeek,
                        ..
                    }
                )
            })
            .map(|(t, _)| t)
            .collect();
        assert_eq!(seeks, vec![Track::Video, Track::Audio]);
    }

    #[test]
    fn test_rejects_empty_profile() {
        let mut p = profile();
        p.fps = 0.0;
        p.sample_rate = 0;
        assert!(p.validate().is_err());
    }
}
