// ABOUTME: CLI argument parsing for the playback simulator
// ABOUTME: Builds clock, synchronizer and stream configuration from command-line flags

use crate::clock::{Pts, PTS_PER_SECOND};
use crate::config::{ClockConfig, SyncConfig};
use crate::error::Error;
use crate::sim::engine::EngineConfig;
use crate::sim::timeline::StreamProfile;
use clap::Args;
use std::time::Duration;

/// Simulator arguments
///
/// Use with `#[command(flatten)]` in the binary's Args struct.
#[derive(Args, Debug, Clone)]
pub struct SimArgs {
    /// Video frame rate (0 for audio only)
    #[arg(long, default_value = "25")]
    pub fps: f64,

    /// Audio sample rate in Hz (0 for video only)
    #[arg(short, long, default_value = "48000")]
    pub sample_rate: u32,

    /// Samples per audio block
    #[arg(long, default_value = "1024")]
    pub block_samples: u32,

    /// Audio timestamp clock error against the sample clock, in ppm
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub skew_ppm: i32,

    /// Only every n-th unit carries a timestamp
    #[arg(long, default_value = "1")]
    pub pts_every: u32,

    /// Seek when playback reaches this many seconds
    #[arg(long)]
    pub seek_at: Option<f64>,

    /// Seek target in seconds
    #[arg(long, default_value = "0")]
    pub seek_to: f64,

    /// Stream length in seconds
    #[arg(short, long, default_value = "10")]
    pub duration: f64,

    /// Prebuffer in milliseconds
    #[arg(long, default_value = "133")]
    pub prebuffer_ms: u64,

    /// Emit a subtitle packet every n timestamped frames (0 = none)
    #[arg(long, default_value = "0")]
    pub spu_every: u32,

    /// Run as fast as possible instead of in real time
    #[arg(long)]
    pub fast: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

fn seconds(secs: f64) -> Pts {
    (secs * PTS_PER_SECOND as f64).round() as Pts
}

impl SimArgs {
    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let filter = if self.verbose {
            "metronom=debug"
        } else {
            "metronom=info"
        };

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    /// Log startup information
    pub fn log_startup_info(&self) {
        tracing::info!("Metronom simulator v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!(
            "Stream: {} fps, {} Hz audio in {}-sample blocks, {} s",
            self.fps,
            self.sample_rate,
            self.block_samples,
            self.duration
        );
        if self.skew_ppm != 0 {
            tracing::info!("Audio clock skew: {} ppm", self.skew_ppm);
        }
        if let Some(at) = self.seek_at {
            tracing::info!("Seek at {} s to {} s", at, self.seek_to);
        }
    }

    /// Build the stream profile
    pub fn build_profile(&self) -> crate::Result<StreamProfile> {
        if self.duration <= 0.0 {
            return Err(Error::InvalidConfig("duration must be positive".into()));
        }
        let profile = StreamProfile {
            fps: self.fps,
            sample_rate: self.sample_rate,
            block_samples: self.block_samples,
            audio_skew_ppm: self.skew_ppm,
            pts_every: self.pts_every,
            seek: self.seek_at.map(|at| (seconds(at), seconds(self.seek_to))),
            length: seconds(self.duration),
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Build the clock arbiter configuration
    pub fn build_clock_config(&self) -> ClockConfig {
        ClockConfig::default().resync_interval(Duration::from_secs(5))
    }

    /// Build the synchronizer configuration
    pub fn build_sync_config(&self) -> SyncConfig {
        let config = SyncConfig::default().prebuffer(self.prebuffer_ms as Pts * PTS_PER_SECOND / 1_000);
        if self.sample_rate > 0 {
            config.sample_rate(self.sample_rate)
        } else {
            config
        }
    }

    /// Build the engine configuration
    pub fn build_engine_config(&self) -> EngineConfig {
        EngineConfig {
            paced: !self.fast,
            spu_every: self.spu_every,
            ..Default::default()
        }
    }
}
