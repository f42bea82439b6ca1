// ABOUTME: Playback simulator module
// ABOUTME: Drives a stream synchronizer from synthetic demuxer and decoder threads

mod cli;
mod engine;
mod stats;
mod timeline;

pub use cli::SimArgs;
pub use engine::{spawn_playback, EngineConfig, Playback};
pub use stats::{PlaybackReport, PlaybackStats};
pub use timeline::{StreamProfile, SyntheticDemuxer, Track, Unit};
