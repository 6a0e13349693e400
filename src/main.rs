//! Thermal Fusion demo session with synthetic visible and thermal sources

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use thermal_fusion::capture::{Pattern, SyntheticSource};
use thermal_fusion::utils::monotonic_ns;
use thermal_fusion::{ChannelSink, Config, FusionPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Load configuration
    let config_path = std::env::var_os("TF_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Thermal Fusion launching...");
    info!(
        "Output {}x{} @ {} fps, alpha {}, staleness {} ms",
        config.fusion.output_width,
        config.fusion.output_height,
        config.fusion.output_fps,
        config.fusion.blend_weight,
        config.fusion.staleness_threshold_ns as f64 / 1e6,
    );

    let pipeline = Arc::new(FusionPipeline::new(config.fusion.clone())?);
    let format = config.fusion.pixel_format;
    let demo = config.demo.clone();

    // Spawn secondary (thermal) source
    let secondary_handle = {
        let pipeline = pipeline.clone();
        let demo = demo.clone();
        tokio::spawn(async move {
            let mut source = SyntheticSource::new(
                demo.secondary_width,
                demo.secondary_height,
                format,
                Pattern::HotSpot,
            );
            let mut ticker = interval(Duration::from_secs(1) / demo.secondary_fps.max(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let dropout = demo.secondary_dropout_secs.map(Duration::from_secs);
            let started = tokio::time::Instant::now();

            loop {
                ticker.tick().await;
                if dropout.is_some_and(|d| started.elapsed() >= d) {
                    warn!("Secondary source dropped out");
                    break;
                }
                match source.capture_frame(monotonic_ns()) {
                    Ok(frame) => {
                        let (w, h, ts) = (frame.width(), frame.height(), frame.timestamp_ns());
                        if let Err(e) = pipeline.on_secondary_frame(frame.into_pixels(), w, h, ts) {
                            error!("Secondary frame rejected: {}", e);
                        }
                    }
                    Err(e) => error!("Secondary capture error: {}", e),
                }
            }
        })
    };

    // Spawn primary (visible) source, pacing the output
    let primary_handle = {
        let pipeline = pipeline.clone();
        let fps = config.fusion.output_fps;
        let (width, height) = (demo.primary_width, demo.primary_height);
        tokio::spawn(async move {
            let mut source = SyntheticSource::new(
                width,
                height,
                format,
                Pattern::Gradient,
            );
            let mut ticker = interval(Duration::from_secs(1) / fps);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let frame = match source.capture_frame(monotonic_ns()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Primary capture error: {}", e);
                        continue;
                    }
                };
                let (w, h, ts) = (frame.width(), frame.height(), frame.timestamp_ns());
                let pipeline = pipeline.clone();
                // Composition is CPU-bound; keep it off the async workers
                let result = tokio::task::spawn_blocking(move || {
                    pipeline.on_primary_frame(frame.into_pixels(), w, h, ts)
                })
                .await;
                match result {
                    Ok(Ok(thermal_fusion::FrameOutcome::Ignored)) => break,
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Primary frame rejected: {}", e),
                    Err(e) => {
                        error!("Composition task failed: {}", e);
                        break;
                    }
                }
            }
        })
    };

    // Attach output and drain it, reporting once per second
    let (sink, rx) = ChannelSink::bounded(demo.sink_capacity.max(1));
    pipeline.attach_output(sink)?;

    let report_handle = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            let mut received = 0u64;
            let mut report = interval(Duration::from_secs(1));
            report.tick().await;

            loop {
                tokio::select! {
                    frame = rx.recv_async() => {
                        let Ok(frame) = frame else { break };
                        received += 1;
                        let lag_ms = monotonic_ns().saturating_sub(frame.timestamp_ns()) as f64 / 1e6;
                        metrics::histogram!("fusion_output_latency_ms").record(lag_ms);
                    }
                    _ = report.tick() => {
                        let stats = pipeline.stats();
                        info!(
                            "Output: {} frames received, {} delivered, {} dropped, {} stale, {} secondary",
                            received,
                            stats.frames_delivered,
                            stats.frames_dropped,
                            stats.frames_stale,
                            stats.secondary_frames,
                        );
                    }
                }
            }
        })
    };

    if demo.run_secs > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(demo.run_secs)) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Interrupted");
    }

    pipeline.stop();
    secondary_handle.abort();
    join_task("Primary", primary_handle).await;
    join_task("Output", report_handle).await;

    info!("Final stats: {:?}", pipeline.stats());
    info!("Thermal Fusion shutting down");
    Ok(())
}

/// Wait for a session task to finish, logging a panic instead of dropping it.
async fn join_task(name: &str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!("{} task failed: {}", name, e);
            false
        }
    }
}
