use anyhow::{Context, bail};
use cosmic::{BrainConfig, BrainEvent, CapturePipeline, Frame};
use log::{info, warn};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        println!("Usage: cosmic_tester <dark_frames_dir> <exposure_frames_dir> [threshold]");
        return Ok(());
    }
    let dark_dir = PathBuf::from(&args[1]);
    let exposure_dir = PathBuf::from(&args[2]);

    let dark_paths = image_paths(&dark_dir)?;
    let exposure_paths = image_paths(&exposure_dir)?;
    if dark_paths.is_empty() {
        bail!("no dark frames found in {}", dark_dir.display());
    }

    // --- 2. Detector Initialization ---
    let mut config = BrainConfig {
        calibration_frames: dark_paths.len() as u32,
        auto_run: false,
        ..BrainConfig::default()
    };
    if let Some(threshold) = args.get(3) {
        config.threshold = threshold.parse().context("threshold must be a number")?;
    }
    if let Ok(strength) = env::var("COSMIC_FILTER_STRENGTH") {
        config.filter_strength = strength.parse().context("COSMIC_FILTER_STRENGTH must be a number")?;
    }
    info!(
        "{} dark frames, {} exposures, threshold {}, filter strength {}",
        dark_paths.len(),
        exposure_paths.len(),
        config.threshold,
        config.filter_strength
    );

    let pipeline = CapturePipeline::new(config)?;
    let reporter = tokio::spawn(report_stamps(pipeline.subscribe()));

    // --- 3. Dark Calibration ---
    pipeline.begin_calibration().await?;
    for path in &dark_paths {
        pipeline.process_frame(load_frame(path)?).await?;
    }
    pipeline.begin_run().await?;

    // --- 4. Main Processing Loop ---
    for path in &exposure_paths {
        match load_frame(path) {
            Ok(frame) => pipeline.submit_frame(frame)?,
            Err(err) => warn!("skipping {}: {err:#}", path.display()),
        }
        // Mimic a camera that waits for the detector; without it frames would be dropped.
        pipeline.flush().await?;
    }

    let status = pipeline.status().await?;
    let stamps = pipeline.stamps();
    let dropped = pipeline.dropped_frames();
    pipeline.shutdown().await;
    reporter.await.ok();

    println!(
        "Processing complete. {} exposures, {} stamps, {} frames dropped.",
        status.exposure_count,
        stamps.len(),
        dropped
    );
    Ok(())
}

/// Logs every stamp until the pipeline closes its event channel. Returns how many
/// stamps were reported; events missed by a slow reader are logged and skipped.
async fn report_stamps(mut events: broadcast::Receiver<BrainEvent>) -> usize {
    let mut reported = 0;
    loop {
        match events.recv().await {
            Ok(BrainEvent::StampAdded(stamp)) => {
                reported += 1;
                info!(
                    "stamp: exposure {} pixel {} at {} ms",
                    stamp.exposure_count(),
                    stamp.max_pixel_index(),
                    stamp.elapsed_ms()
                );
            }
            Ok(BrainEvent::ExposureCountChanged(_)) => {}
            Err(RecvError::Lagged(missed)) => warn!("reporter fell behind, {missed} events missed"),
            Err(RecvError::Closed) => break,
        }
    }
    reported
}

/// Image files in `dir`, sorted by name so frame order is reproducible.
fn image_paths(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && image::ImageFormat::from_path(&path).is_ok() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn load_frame(path: &Path) -> anyhow::Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgb8();
    Ok(Frame::try_from(image)?.with_timestamp(Instant::now()))
}
