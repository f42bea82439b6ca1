// ABOUTME: Main library entry point for metronom
// ABOUTME: Exports the clock arbitration layer and the per-stream synchronizer

//! # metronom
//!
//! Presentation-clock synchronizer for media playback.
//!
//! Audio sample blocks, video frames and subtitle packets arrive from independent
//! decoder threads, each carrying timestamps from its own (possibly drifting) stream
//! clock. The [`StreamSynchronizer`] maps all of them onto one monotonic presentation
//! timeline, while the [`ClockArbiter`] provides the process-wide notion of "now" from a
//! priority-ranked set of [`ClockSource`]s.
//!
//! All times are `i64` ticks of a 90 kHz clock (see [`clock::PTS_PER_SECOND`]).
//!
//! ## Features
//!
//! - **Clock arbitration**: highest-priority source is master, the rest are resynced
//!   to it on a background thread
//! - **Video prediction**: sparse timestamps are extrapolated and small drift is
//!   corrected gradually
//! - **Audio rate correction**: the audio device sets the real rate, video bends to it
//! - **Discontinuities**: seeks and stream switches are paired across the video and
//!   audio threads
//! - **Master/slave chaining**: secondary streams follow a primary stream's timeline
//!
//! ## Example
//!
//! ```no_run
//! use metronom::{ClockArbiter, ClockConfig, DiscontinuityKind, StreamSynchronizer, SyncConfig};
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ClockArbiter::new(ClockConfig::default()));
//! clock.start(0);
//!
//! let sync = StreamSynchronizer::new(Arc::clone(&clock), SyncConfig::default(), true, false);
//! sync.handle_video_discontinuity(DiscontinuityKind::StreamStart, 0);
//!
//! let timing = sync.got_video_frame(0, 3000);
//! println!("present first frame at {}", timing.vpts);
//! ```

#![warn(missing_docs)]

/// Clock sources and the clock arbiter
pub mod clock;
/// Configuration for the arbiter and synchronizers
pub mod config;
/// Per-stream presentation-time synchronizer
pub mod sync;
/// Playback simulator driving a synchronizer from synthetic decoder threads
pub mod sim;

pub use clock::{ClockArbiter, ClockSource, ManualClock, SourceId, Speed, SystemClock};
pub use config::{ClockConfig, SyncConfig};
pub use sync::{
    BarrierPhase, DiscontinuityKind, FrameTiming, StreamSynchronizer, SyncLock, SyncOption,
};

/// Result type for metronom operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for metronom
pub mod error {
    use crate::sync::SyncOption;
    use thiserror::Error;

    /// Error types for metronom operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        /// The clock-source registry has no free slot
        #[error("clock source registry is full ({capacity} sources)")]
        CapacityExceeded {
            /// Maximum number of sources, the default source included
            capacity: usize,
        },

        /// The clock source implements a different interface revision
        #[error("unsupported clock source interface version {found} (expected {expected})")]
        UnsupportedInterfaceVersion {
            /// Version the source declared
            found: u32,
            /// Version this arbiter understands
            expected: u32,
        },

        /// Attaching the master would make a synchronizer follow itself
        #[error("master chain would contain a cycle")]
        MasterCycle,

        /// The option can be read but not written
        #[error("option {0:?} is read-only")]
        ReadOnlyOption(SyncOption),

        /// Configuration rejected
        #[error("invalid configuration: {0}")]
        InvalidConfig(String),
    }
}
