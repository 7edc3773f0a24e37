use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use cbct_volume::{
    volume_loader::{LoadOptions, VolumeLoader},
    windowing::{DEFAULT_WINDOW_LEVEL, DEFAULT_WINDOW_WIDTH, NEUTRAL_ADJUSTMENT, WindowSettings},
    renderer::SliceRenderer,
};
use clap::Parser;
use log::info;

/// Decode a CBCT scan (folder or ZIP archive) and save one slice as PNG.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Scan folder or ZIP archive.
    path: PathBuf,

    /// Slice index along z, defaults to the center slice.
    #[arg(short, long)]
    slice: Option<usize>,

    #[arg(short, long, default_value_t = DEFAULT_WINDOW_LEVEL, allow_negative_numbers = true)]
    level: i32,

    #[arg(short, long, default_value_t = DEFAULT_WINDOW_WIDTH, allow_negative_numbers = true)]
    width: i32,

    #[arg(long, default_value_t = NEUTRAL_ADJUSTMENT)]
    brightness: f32,

    #[arg(long, default_value_t = NEUTRAL_ADJUSTMENT)]
    contrast: f32,

    /// Tolerated relative difference between scan geometry and file size.
    #[arg(long, default_value_t = LoadOptions::default().dimension_tolerance)]
    tolerance: f64,

    #[arg(short, long, default_value = "slice.png")]
    output: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();
    let args = Args::parse();

    let settings = WindowSettings::new(args.level, args.width)
        .with_adjustment(args.brightness, args.contrast);
    settings.validate()?;

    let loader = VolumeLoader::new(LoadOptions {
        dimension_tolerance: args.tolerance,
        ..LoadOptions::default()
    });
    let scan = loader
        .load_from_path_async(&args.path)
        .await
        .with_context(|| format!("failed to load scan from {}", args.path.display()))?;

    let meta = &scan.metadata;
    info!(
        "Patient {} '{}' ({}, born {}), task {} on {}",
        meta.patient_id, meta.patient_name, meta.sex, meta.birth_date, meta.scan_task_id, meta.scan_date
    );
    info!(
        "Radius {}mm, voxel {}mm, filter '{}', {}kV {}mA",
        meta.volume_radius_mm,
        meta.voxel_size_mm,
        meta.reconstruction_filter_name,
        meta.technical.tube_voltage_kv_or_zero(),
        meta.technical.tube_current_ma_or_zero()
    );
    info!(
        "Dimensions {} from {:?} (geometry {}, file {})",
        scan.resolution.dimensions,
        scan.resolution.source,
        scan.resolution.geometry_estimate,
        scan.resolution.size_estimate
    );

    let index = args.slice.unwrap_or(scan.dimensions().z / 2);
    let renderer = SliceRenderer::new(Arc::new(scan.volume));
    let image = renderer
        .request(index, settings)
        .wait()
        .await?
        .context("render request was superseded")?;
    image
        .save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!("Saved slice {index} to {}", args.output.display());
    Ok(())
}
