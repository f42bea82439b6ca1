// ABOUTME: Playback simulator binary
// ABOUTME: Runs a synthetic A/V stream through the synchronizer and reports timing

use clap::Parser;
use metronom::sim::{spawn_playback, PlaybackReport, SimArgs, SyntheticDemuxer};
use metronom::{ClockArbiter, StreamSynchronizer};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "metronom-sim")]
#[command(author, version, about = "Presentation clock synchronizer simulator", long_about = None)]
struct Args {
    #[command(flatten)]
    sim: SimArgs,
}

fn log_report(report: &PlaybackReport) {
    tracing::info!(
        "clock={} video={} frames audio={} blocks offset={} gap={:?}",
        report.clock_now,
        report.video_frames,
        report.audio_blocks,
        report.vpts_offset,
        report.av_gap()
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Initialize tracing
    args.sim.init_tracing();

    // Log startup info
    args.sim.log_startup_info();

    let profile = args.sim.build_profile()?;
    let clock = Arc::new(ClockArbiter::new(args.sim.build_clock_config()));
    let sync = Arc::new(
        StreamSynchronizer::new(
            Arc::clone(&clock),
            args.sim.build_sync_config(),
            profile.has_video(),
            profile.has_audio(),
        )
        .with_name("sim"),
    );

    clock.start(0);
    let playback = Arc::new(spawn_playback(
        sync,
        SyntheticDemuxer::new(profile),
        args.sim.build_engine_config(),
    )?);

    // Spawn a task to periodically report progress
    let report_playback = Arc::clone(&playback);
    let report_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(1));
        loop {
            interval.tick().await;
            log_report(&report_playback.report());
        }
    });

    tracing::info!("Press Ctrl+C to stop");

    let mut finished = tokio::time::interval(tokio::time::Duration::from_millis(50));
    loop {
        tokio::select! {
            _ = finished.tick() => {
                if playback.is_finished() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                playback.stop();
                break;
            }
        }
    }
    report_task.abort();
    let _ = report_task.await;

    let playback = match Arc::try_unwrap(playback) {
        Ok(playback) => playback,
        Err(_) => return Err("playback still shared at shutdown".into()),
    };
    let report = tokio::task::spawn_blocking(move || playback.join()).await?;
    clock.shutdown();

    if args.sim.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        log_report(&report);
        if report.backsteps > 0 {
            tracing::warn!("{} vpts backsteps observed", report.backsteps);
        }
    }
    Ok(())
}
