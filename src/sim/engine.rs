// ABOUTME: Playback simulator engine
// ABOUTME: Runs a demuxer thread feeding video and audio producer threads into a synchronizer

use crate::clock::Pts;
use crate::sim::stats::{PlaybackReport, PlaybackStats};
use crate::sim::timeline::{SyntheticDemuxer, Track, Unit};
use crate::sync::{StreamSynchronizer, SyncOption};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Units buffered between the demuxer and each producer
const QUEUE_DEPTH: usize = 64;

/// Producer threads stop decoding this far ahead of the clock when paced
const DEFAULT_MAX_LEAD: Pts = 45_000;

/// Decoder-side options of the simulator
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hold producers back so they stay at most `max_lead` ahead of the clock
    pub paced: bool,
    /// Maximum lead over the clock when paced
    pub max_lead: Pts,
    /// Emit a subtitle packet with every n-th timestamped video frame (0 = none)
    pub spu_every: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            paced: true,
            max_lead: DEFAULT_MAX_LEAD,
            spu_every: 0,
        }
    }
}

/// A running simulated playback
pub struct Playback {
    sync: Arc<StreamSynchronizer>,
    stats: Arc<PlaybackStats>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Playback {
    /// Ask the demuxer to stop; producers finish what is queued
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Current statistics
    pub fn report(&self) -> PlaybackReport {
        self.stats.snapshot(
            self.sync.get_option(SyncOption::VptsOffset),
            self.sync.clock().current_time(),
        )
    }

    /// Whether every thread has finished
    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(|t| t.is_finished())
    }

    /// Wait for all threads and return the final report
    pub fn join(self) -> PlaybackReport {
        for handle in self.threads {
            if handle.join().is_err() {
                log::error!("Playback thread panicked");
            }
        }
        self.stats.snapshot(
            self.sync.get_option(SyncOption::VptsOffset),
            self.sync.clock().current_time(),
        )
    }
}

/// Spawn the demuxer and one producer thread per track
pub fn spawn_playback(
    sync: Arc<StreamSynchronizer>,
    demuxer: SyntheticDemuxer,
    config: EngineConfig,
) -> std::io::Result<Playback> {
    let stats = Arc::new(PlaybackStats::new());
    let stop = Arc::new(AtomicBool::new(false));
    let mut threads = Vec::new();

    let (video_tx, video_rx) = bounded(QUEUE_DEPTH);
    let (audio_tx, audio_rx) = bounded(QUEUE_DEPTH);
    let video_tx = demuxer.profile().has_video().then_some(video_tx);
    let audio_tx = demuxer.profile().has_audio().then_some(audio_tx);

    if video_tx.is_some() {
        let producer = Producer::new(&sync, &stats, &config);
        threads.push(
            std::thread::Builder::new()
                .name("video-decoder".to_string())
                .spawn(move || producer.run_video(video_rx))?,
        );
    }
    if audio_tx.is_some() {
        let producer = Producer::new(&sync, &stats, &config);
        threads.push(
            std::thread::Builder::new()
                .name("audio-decoder".to_string())
                .spawn(move || producer.run_audio(audio_rx))?,
        );
    }

    let demux_stop = Arc::clone(&stop);
    threads.push(
        std::thread::Builder::new()
            .name("demuxer".to_string())
            .spawn(move || run_demuxer(demuxer, video_tx, audio_tx, demux_stop))?,
    );

    log::info!("Playback started for '{}'", sync.name());
    Ok(Playback {
        sync,
        stats,
        stop,
        threads,
    })
}

fn run_demuxer(
    demuxer: SyntheticDemuxer,
    video_tx: Option<Sender<Unit>>,
    audio_tx: Option<Sender<Unit>>,
    stop: Arc<AtomicBool>,
) {
    for (track, unit) in demuxer {
        // Only stop between units so paired discontinuities are never split
        if stop.load(Ordering::Relaxed) && !matches!(unit, Unit::Discontinuity { .. }) {
            break;
        }
        let tx = match track {
            Track::Video => video_tx.as_ref(),
            Track::Audio => audio_tx.as_ref(),
        };
        if let Some(tx) = tx {
            if tx.send(unit).is_err() {
                log::warn!("{:?} producer went away", track);
                break;
            }
        }
    }
    log::debug!("Demuxer finished");
}

/// State shared by a producer thread
struct Producer {
    sync: Arc<StreamSynchronizer>,
    stats: Arc<PlaybackStats>,
    config: EngineConfig,
}

impl Producer {
    fn new(sync: &Arc<StreamSynchronizer>, stats: &Arc<PlaybackStats>, config: &EngineConfig) -> Self {
        Self {
            sync: Arc::clone(sync),
            stats: Arc::clone(stats),
            config: config.clone(),
        }
    }

    /// Sleep while `vpts` is too far ahead of the clock, like a full output queue
    fn pace(&self, vpts: Pts) {
        if !self.config.paced {
            return;
        }
        let clock = self.sync.clock();
        loop {
            let lead = vpts - clock.current_time() - self.config.max_lead;
            if lead <= 0 || !clock.is_running() {
                return;
            }
            let micros = (lead as u64 * 1_000_000 / crate::clock::PTS_PER_SECOND as u64).min(50_000);
            std::thread::sleep(Duration::from_micros(micros.max(1_000)));
        }
    }

    fn run_video(self, rx: Receiver<Unit>) {
        let mut stamped = 0u32;
        for unit in rx {
            match unit {
                Unit::Video { pts, duration } => {
                    let timing = self.sync.got_video_frame(pts, duration);
                    self.stats.video_frame(timing.vpts);
                    if pts != 0 && self.config.spu_every > 0 {
                        stamped += 1;
                        if stamped % self.config.spu_every == 0 {
                            self.sync.got_spu_packet(pts);
                            self.stats.spu_packet();
                        }
                    }
                    self.pace(timing.vpts);
                }
                Unit::Discontinuity { kind, offset } => {
                    self.sync.handle_video_discontinuity(kind, offset);
                    self.stats.discontinuity(true);
                }
                Unit::Audio { .. } => log::warn!("Audio unit routed to video decoder"),
            }
        }
    }

    fn run_audio(self, rx: Receiver<Unit>) {
        for unit in rx {
            match unit {
                Unit::Audio { pts, samples } => {
                    let vpts = self.sync.got_audio_samples(pts, samples);
                    self.stats.audio_block(vpts);
                    self.pace(vpts);
                }
                Unit::Discontinuity { kind, offset } => {
                    self.sync.handle_audio_discontinuity(kind, offset);
                    self.stats.discontinuity(false);
                }
                Unit::Video { .. } => log::warn!("Video unit routed to audio decoder"),
            }
        }
    }
}
