//! `drought`: run the drought-severity pipeline over local assets.
//!
//! Reads a JSON config (every field optional), loads the region boundary and
//! training points, runs all stages, then waits for the exports and reports
//! their status.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};

use drought_core::export::{ExportStatus, Exporter, LocalFolder};
use drought_core::{DroughtPipeline, PipelineConfig, PipelineInputs};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "drought", about = "Random-forest drought severity mapping from downscaled indicators")]
struct Args {
    /// Pipeline config (JSON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Region boundary (GeoJSON), overrides the config
    #[arg(long)]
    region: Option<PathBuf>,

    /// Training points CSV with lon,lat,class columns, overrides the config
    #[arg(long)]
    points: Option<PathBuf>,

    /// Export folder, overrides the config
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Random seed for sampling, splitting and forest training
    #[arg(long)]
    seed: Option<u64>,

    /// Print the effective config as JSON and exit
    #[arg(long)]
    print_config: bool,
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("Cannot load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(region) = &args.region {
        cfg.assets.region = region.clone();
    }
    if let Some(points) = &args.points {
        cfg.assets.training_points = points.clone();
    }
    if let Some(output) = &args.output {
        cfg.export.folder = output.clone();
    }
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }
    cfg.validate().context("Invalid configuration")?;
    Ok(cfg)
}

fn run(args: &Args) -> Result<bool> {
    let cfg = build_config(args)?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(true);
    }

    let inputs = PipelineInputs::load(&cfg.assets).context("Failed to load region or training points")?;
    info!(
        "[drought] region {} with {} training points, exporting to {}",
        inputs.region.name,
        inputs.training_points.len(),
        cfg.export.folder.display()
    );

    let exporter = Exporter::new(LocalFolder::new(&cfg.export.folder));
    let result = DroughtPipeline::new().run(&cfg, &inputs, &exporter).context("Pipeline failed")?;

    let r = &result.report;
    info!("[drought] training accuracy   {:.4}", r.training_accuracy);
    info!("[drought] validation accuracy {:.4} (kappa {:.4})", r.validation_accuracy, r.validation_kappa);
    for (band, pct) in &r.normalized_importance {
        info!("[drought]   importance {band:<5} {pct:6.2} %");
    }
    info!("[drought] risk distribution {:?}", r.risk_distribution);

    let mut all_ok = true;
    for handle in result.handles {
        let name = handle.name().to_string();
        match handle.wait() {
            ExportStatus::Completed(path) => info!("[export] {name}: {}", path.display()),
            status => {
                error!("[export] {name}: {status}");
                all_ok = false;
            }
        }
    }
    Ok(all_ok)
}

fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args = Args::parse();
    Ok(if run(&args)? { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
