//! End-to-end drought-severity run.
//!
//! Stages run in a fixed order, each a function of the previous stage's
//! output: Load → Downscale → Stack → Sample → Train → Evaluate → Export.
//! Every input error surfaces before the first export is submitted.

use std::collections::BTreeMap;
use std::time::Instant;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::classify::{class_frequency, classify_raster, normalize_importance, smooth_majority, train_classifier};
use crate::config::{AssetPaths, PipelineConfig};
use crate::downscale::{downscale, DownscaleParams, TargetKind};
use crate::error::{Error, Result};
use crate::evaluate::{evaluate, ConfusionMatrix};
use crate::export::tables::{accuracy_table, validation_table};
use crate::export::{
    ExportHandle, ExportPayload, ExportTask, Exporter, ACCURACY_EXPORT, DEM_EXPORT, NDVI_EXPORT, RISK_MAP_EXPORT,
    SEVERITY_MAP_EXPORT, VALIDATION_EXPORT,
};
use crate::forest::ForestParams;
use crate::geotiff::read_geotiff;
use crate::loader::{clip, reproject, resample_bilinear, resample_nearest, ImageCollection};
use crate::raster::{Grid, Raster};
use crate::region::Region;
use crate::sampler::{class_distribution, random_split, read_training_points, sample_regions, TrainingPoint};
use crate::stack::FeatureStack;

pub const LEGEND_EXPORT: &str = "Drought_Severity_Legend";
pub const REPORT_EXPORT: &str = "run_report";

/// A coarse drought indicator: its band name on load, its name in the
/// feature stack, and how it is downscaled.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorSpec {
    pub source_band: &'static str,
    pub stack_band: &'static str,
    pub kind: TargetKind,
}

/// Predictor names of the classification stack, in stacking order.
pub const STACK_BANDS: [&str; 4] = ["VCI", "SPI", "TCI", "LULC"];

/// Indicators in stacking order.
pub const INDICATORS: [IndicatorSpec; 4] = [
    IndicatorSpec { source_band: "VCI", stack_band: STACK_BANDS[0], kind: TargetKind::Continuous },
    IndicatorSpec { source_band: "SPI3", stack_band: STACK_BANDS[1], kind: TargetKind::Continuous },
    IndicatorSpec { source_band: "TCI", stack_band: STACK_BANDS[2], kind: TargetKind::Continuous },
    IndicatorSpec { source_band: "LULC", stack_band: STACK_BANDS[3], kind: TargetKind::Categorical },
];

/// Study area and labelled points, supplied by the caller.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub region: Region,
    pub training_points: Vec<TrainingPoint>,
}

impl PipelineInputs {
    pub fn load(assets: &AssetPaths) -> Result<Self> {
        Ok(Self {
            region: Region::from_geojson_file(&assets.region)?,
            training_points: read_training_points(&assets.training_points)?,
        })
    }
}

/// Everything the Load stage produces.
#[derive(Debug, Clone)]
pub struct Layers {
    /// Mean scaled NDVI on the fine grid, clipped.
    pub ndvi: Raster,
    /// Elevation at native resolution, clipped.
    pub dem: Raster,
    /// NDVI + elevation on the NDVI grid.
    pub predictors: Raster,
    /// Coarse indicators in [`INDICATORS`] order.
    pub indicators: Vec<Raster>,
    pub n_ndvi_scenes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTime {
    pub stage: String,
    pub millis: u64,
}

/// Summary of a run, written next to the exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub region: String,
    pub n_ndvi_scenes: usize,
    pub class_distribution: BTreeMap<i32, usize>,
    /// Samples drawn per downscaled indicator.
    pub downscale_samples: BTreeMap<String, usize>,
    pub band_names: Vec<String>,
    pub n_points: usize,
    pub n_samples: usize,
    pub n_train: usize,
    pub n_test: usize,
    pub raw_importance: BTreeMap<String, f64>,
    /// Percent of total, key order. Empty when every score is zero.
    pub normalized_importance: Vec<(String, f64)>,
    pub training_matrix: ConfusionMatrix,
    pub training_accuracy: f64,
    pub validation_matrix: ConfusionMatrix,
    pub validation_accuracy: f64,
    pub validation_kappa: f64,
    /// Pixel count per class of the smoothed map at export scale.
    pub risk_distribution: BTreeMap<i32, usize>,
    pub stages: Vec<StageTime>,
}

pub struct PipelineResult {
    pub report: PipelineReport,
    /// Classified map at export scale, clipped.
    pub risk_map: Raster,
    pub handles: Vec<ExportHandle>,
}

fn stage<T>(name: &str, times: &mut Vec<StageTime>, f: impl FnOnce() -> Result<T>) -> Result<T> {
    info!("[pipeline] {name} ...");
    let t0 = Instant::now();
    let out = f()?;
    let millis = t0.elapsed().as_millis() as u64;
    info!("[pipeline] {name} done in {millis} ms");
    times.push(StageTime { stage: name.to_string(), millis });
    Ok(out)
}

/// Regrid onto `scale_m` cells over the region and clip. Rasters already at
/// that scale are only clipped.
fn at_export_scale(raster: &Raster, scale_m: f64, crs: &str, region: &Region, categorical: bool) -> Result<Raster> {
    if (raster.grid.scale_m() - scale_m).abs() < 1e-6 {
        return Ok(clip(raster, region));
    }
    let regridded = if categorical {
        resample_nearest(raster, &Grid::covering(&region.bbox(), scale_m)?)
    } else {
        reproject(raster, crs, scale_m, &region.bbox())?
    };
    Ok(clip(&regridded, region))
}

/// Load stage: NDVI composite, elevation and the four coarse indicators.
pub fn load_layers(config: &PipelineConfig, region: &Region) -> Result<Layers> {
    let assets = &config.assets;
    let bbox = region.bbox();

    let (start, end) = config.ndvi.date_range()?;
    let collection = ImageCollection::open(&assets.ndvi_collection)?.filter_date(start, end).filter_bounds(bbox);
    let mean = collection.mean_scaled(&config.ndvi.band, &config.ndvi.scale)?;
    let n_ndvi_scenes = mean.n_scenes;
    let ndvi = clip(&reproject(&mean.raster, &config.export.crs, config.ndvi.scale_m, &bbox)?, region);

    let dem = clip(&read_geotiff(&assets.dem, &config.dem_band, None)?, region);
    let predictors = ndvi.add_bands(&resample_bilinear(&dem, &ndvi.grid))?;

    let paths = [&assets.vci, &assets.spi, &assets.tci, &assets.lulc];
    let indicators = INDICATORS
        .iter()
        .zip(paths)
        .map(|(spec, path)| read_geotiff(path, spec.source_band, None))
        .collect::<Result<Vec<_>>>()?;

    info!(
        "[pipeline] NDVI {}x{} from {n_ndvi_scenes} scenes, DEM {}x{}",
        ndvi.width(),
        ndvi.height(),
        dem.width(),
        dem.height()
    );
    Ok(Layers { ndvi, dem, predictors, indicators, n_ndvi_scenes })
}

/// Downscale + Stack stages: one forest per indicator, stacked under the
/// canonical band names.
pub fn build_feature_stack(
    layers: &Layers,
    region: &Region,
    params: &DownscaleParams,
    seed: u64,
) -> Result<(Raster, BTreeMap<String, usize>)> {
    let mut stack = FeatureStack::new();
    let mut samples = BTreeMap::new();
    for (i, (spec, coarse)) in INDICATORS.iter().zip(&layers.indicators).enumerate() {
        let params = DownscaleParams {
            forest: ForestParams { seed: seed.wrapping_add(i as u64 + 1), ..params.forest.clone() },
            ..params.clone()
        };
        let out = downscale(&layers.predictors, coarse, spec.source_band, spec.kind, region, &params)?;
        samples.insert(spec.source_band.to_string(), out.n_samples);
        stack = stack.push(spec.stack_band, out.raster)?;
    }
    Ok((stack.build()?, samples))
}

/// The pipeline orchestrator.
#[derive(Debug, Default)]
pub struct DroughtPipeline;

impl DroughtPipeline {
    pub fn new() -> Self {
        Self
    }

    /// Run every stage and submit the exports. Returns once all exports are
    /// submitted; the handles report their completion.
    pub fn run(&self, config: &PipelineConfig, inputs: &PipelineInputs, exporter: &Exporter) -> Result<PipelineResult> {
        config.validate()?;
        let region = &inputs.region;
        let mut stages = Vec::new();

        // ── 1. Load ─────────────────────────────────────────────────────────
        let layers = stage("load", &mut stages, || load_layers(config, region))?;

        // ── 2. Downscale + stack ────────────────────────────────────────────
        let (stack, downscale_samples) = stage("downscale", &mut stages, || {
            build_feature_stack(&layers, region, &config.downscale, config.seed)
        })?;

        // ── 3. Sample + split ───────────────────────────────────────────────
        let class_counts = class_distribution(&inputs.training_points);
        info!("[pipeline] class distribution {class_counts:?}");
        let (table, split) = stage("sample", &mut stages, || {
            let table = sample_regions(&stack, &inputs.training_points, config.extraction_scale_m)?;
            let split = random_split(&table, config.split_threshold, config.seed);
            Ok((table, split))
        })?;
        info!("[pipeline] {} samples: {} train, {} test", table.len(), split.train.len(), split.test.len());

        // ── 4. Train + classify ─────────────────────────────────────────────
        let classifier_params = ForestParams { seed: config.seed ^ 0x5A5A, ..config.classifier.clone() };
        let (trained, risk_map) = stage("train", &mut stages, || {
            let trained = train_classifier(&split.train, &classifier_params)?;
            let classified = clip(&classify_raster(&stack, &trained.forest)?, region);
            let risk_map =
                at_export_scale(&classified, config.export.map_scale_m, &config.export.crs, region, true)?;
            Ok((trained, risk_map))
        })?;
        let normalized_importance = match normalize_importance(&trained.importance) {
            Ok(v) => v,
            Err(Error::DegenerateImportance) => {
                warn!("[pipeline] every feature importance is zero; no split was ever made");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        info!("[pipeline] normalized importance (%) {normalized_importance:?}");

        // ── 5. Evaluate ─────────────────────────────────────────────────────
        let evaluation = stage("evaluate", &mut stages, || Ok(evaluate(&trained.forest, &split.train, &split.test)))?;
        let risk_distribution = class_frequency(&smooth_majority(&risk_map, config.smoothing_radius));
        info!("[pipeline] risk distribution {risk_distribution:?}");

        // ── 6. Export ───────────────────────────────────────────────────────
        let ex = &config.export;
        let ndvi_out = at_export_scale(&layers.ndvi, ex.ndvi_scale_m, &ex.crs, region, false)?;
        let dem_out = at_export_scale(&layers.dem, ex.dem_scale_m, &ex.crs, region, false)?;
        let rgb = ex.legend.colorize(&risk_map, 0)?;
        let accuracy = accuracy_table(&evaluation.training)?;
        let validation = validation_table(&table.band_names, &evaluation.validated);

        let report = PipelineReport {
            region: region.name.clone(),
            n_ndvi_scenes: layers.n_ndvi_scenes,
            class_distribution: class_counts,
            downscale_samples,
            band_names: table.band_names.clone(),
            n_points: inputs.training_points.len(),
            n_samples: table.len(),
            n_train: split.train.len(),
            n_test: split.test.len(),
            raw_importance: trained.importance.clone(),
            normalized_importance,
            training_accuracy: evaluation.training.accuracy(),
            training_matrix: evaluation.training,
            validation_accuracy: evaluation.validation.accuracy(),
            validation_kappa: evaluation.validation.kappa(),
            validation_matrix: evaluation.validation,
            risk_distribution,
            stages,
        };

        let tasks = vec![
            ExportTask::new(NDVI_EXPORT, ExportPayload::Band { raster: ndvi_out, band: 0 }),
            ExportTask::new(DEM_EXPORT, ExportPayload::Band { raster: dem_out, band: 0 }),
            ExportTask::new(RISK_MAP_EXPORT, ExportPayload::Band { raster: risk_map.clone(), band: 0 }),
            ExportTask::new(ACCURACY_EXPORT, ExportPayload::Table(accuracy)),
            ExportTask::new(VALIDATION_EXPORT, ExportPayload::Table(validation)),
            ExportTask::new(SEVERITY_MAP_EXPORT, ExportPayload::Rgb { grid: risk_map.grid, rgb }),
            ExportTask::new(LEGEND_EXPORT, ExportPayload::Legend(ex.legend.clone())),
            ExportTask::new(REPORT_EXPORT, ExportPayload::Json(serde_json::to_value(&report)?)),
        ];
        let handles: Vec<ExportHandle> = tasks.into_iter().map(|t| exporter.submit(t)).collect();
        info!("[pipeline] {} exports submitted to {}", handles.len(), exporter.destination().describe());

        Ok(PipelineResult { report, risk_map, handles })
    }
}
