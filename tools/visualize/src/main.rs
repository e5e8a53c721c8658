//! Preview renderer: turns the exported GeoTIFFs into PNG quick-looks with
//! the same stretches used for on-screen display. Not part of the pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbImage;
use log::{info, warn};

use drought_core::config::PipelineConfig;
use drought_core::export::palette::{visualize, Palette};
use drought_core::export::{DEM_EXPORT, NDVI_EXPORT, RISK_MAP_EXPORT};
use drought_core::geotiff::read_geotiff;
use drought_core::raster::Raster;

#[derive(Parser, Debug)]
#[command(name = "visualize", about = "Render PNG previews of exported drought maps")]
struct Args {
    /// Export folder written by `drought`
    #[arg(short, long, default_value = "GEE_Exports")]
    input: PathBuf,

    /// Where the PNGs go (created if absent)
    #[arg(short, long, default_value = "data/preview")]
    output: PathBuf,

    /// Pipeline config, for the legend colours
    #[arg(short, long)]
    config: Option<PathBuf>,
}

struct Layer {
    export: &'static str,
    band: &'static str,
    min: f64,
    max: f64,
    palette: Palette,
}

fn to_png(raster: &Raster, rgb: Vec<u8>, path: &Path) -> Result<()> {
    let img = RgbImage::from_raw(raster.width() as u32, raster.height() as u32, rgb)
        .context("RGB buffer does not match raster size")?;
    img.save(path).with_context(|| format!("Cannot write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}

fn read_export(folder: &Path, export: &str, band: &str) -> Result<Option<Raster>> {
    let src = folder.join(format!("{export}.tif"));
    if !src.exists() {
        warn!("{} not found, skipping", src.display());
        return Ok(None);
    }
    let raster = read_geotiff(&src, band, None).with_context(|| format!("Cannot read {}", src.display()))?;
    Ok(Some(raster))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => PipelineConfig::load(path).with_context(|| format!("Cannot load {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    fs::create_dir_all(&args.output).with_context(|| format!("Cannot create {}", args.output.display()))?;

    let layers = [
        Layer {
            export: NDVI_EXPORT,
            band: "NDVI",
            min: 0.0,
            max: 1.0,
            palette: Palette::parse(&["brown", "yellow", "green"])?,
        },
        Layer {
            export: DEM_EXPORT,
            band: "elevation",
            min: 0.0,
            max: 3000.0,
            palette: Palette::default(),
        },
    ];

    for layer in &layers {
        let Some(raster) = read_export(&args.input, layer.export, layer.band)? else { continue };
        let rgb = visualize(&raster, 0, layer.min, layer.max, &layer.palette);
        to_png(&raster, rgb, &args.output.join(format!("{}.png", layer.export)))?;
    }

    // Class map: one legend colour per class, no stretch.
    if let Some(risk) = read_export(&args.input, RISK_MAP_EXPORT, "classification")? {
        let rgb = cfg.export.legend.colorize(&risk, 0).context("Invalid legend colour")?;
        to_png(&risk, rgb, &args.output.join(format!("{RISK_MAP_EXPORT}.png")))?;
    }

    let legend_path = args.output.join("legend.png");
    cfg.export.legend.write_png(&legend_path).context("Cannot render legend")?;
    info!("Wrote {}", legend_path.display());
    Ok(())
}
