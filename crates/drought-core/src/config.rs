//! Pipeline configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Defaults reproduce the Marsabit County run.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::classify::default_classifier_params;
use crate::downscale::DownscaleParams;
use crate::error::{Error, Result};
use crate::export::legend::Legend;
use crate::export::LocalFolder;
use crate::forest::ForestParams;
use crate::loader::{parse_date, ScaleSpec};
use crate::raster::EPSG_4326;

/// Input locations. Relative paths resolve against the config file's folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetPaths {
    pub vci: PathBuf,
    pub spi: PathBuf,
    pub tci: PathBuf,
    pub lulc: PathBuf,
    pub dem: PathBuf,
    /// Directory or `.tar(.gz)` of dated NDVI scenes.
    pub ndvi_collection: PathBuf,
    /// GeoJSON boundary of the study region.
    pub region: PathBuf,
    /// CSV of labelled points (`lon,lat,class`).
    pub training_points: PathBuf,
}

impl Default for AssetPaths {
    fn default() -> Self {
        Self {
            vci: "assets/VCI_Export.tif".into(),
            spi: "assets/SPI3_Drought_2005_2010_2011_Clipped.tif".into(),
            tci: "assets/TCI_Export.tif".into(),
            lulc: "assets/LULC_Export.tif".into(),
            dem: "assets/SRTMGL1_003.tif".into(),
            ndvi_collection: "assets/MOD13Q1".into(),
            region: "assets/marsabit.geojson".into(),
            training_points: "assets/training_points.csv".into(),
        }
    }
}

impl AssetPaths {
    fn resolve_against(&mut self, base: &Path) {
        for p in [
            &mut self.vci,
            &mut self.spi,
            &mut self.tci,
            &mut self.lulc,
            &mut self.dem,
            &mut self.ndvi_collection,
            &mut self.region,
            &mut self.training_points,
        ] {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NdviConfig {
    pub band: String,
    /// Inclusive start, `YYYY-MM-DD`.
    pub start_date: String,
    /// Exclusive end, `YYYY-MM-DD`.
    pub end_date: String,
    pub scale: ScaleSpec,
    pub scale_m: f64,
}

impl Default for NdviConfig {
    fn default() -> Self {
        Self {
            band: "NDVI".into(),
            start_date: "2000-01-01".into(),
            end_date: "2024-12-31".into(),
            scale: ScaleSpec::modis_ndvi(),
            scale_m: 250.0,
        }
    }
}

impl NdviConfig {
    /// Start inclusive, end exclusive.
    pub fn date_range(&self) -> Result<(NaiveDate, NaiveDate)> {
        let start = parse_date(&self.start_date)?;
        let end = parse_date(&self.end_date)?;
        if end <= start {
            return Err(Error::InvalidConfig {
                name: "ndvi.end_date",
                value: self.end_date.clone(),
                reason: format!("must be after start date {}", self.start_date),
            });
        }
        Ok((start, end))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub folder: PathBuf,
    pub crs: String,
    pub ndvi_scale_m: f64,
    pub dem_scale_m: f64,
    pub map_scale_m: f64,
    /// Class colours of the severity map and its legend.
    pub legend: Legend,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            folder: LocalFolder::DEFAULT_NAME.into(),
            crs: EPSG_4326.into(),
            ndvi_scale_m: 250.0,
            dem_scale_m: 30.0,
            map_scale_m: 1000.0,
            legend: Legend::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub assets: AssetPaths,
    pub ndvi: NdviConfig,
    pub dem_band: String,
    pub downscale: DownscaleParams,
    pub classifier: ForestParams,
    /// Draws below this go to training.
    pub split_threshold: f64,
    pub extraction_scale_m: f64,
    /// Focal-mode radius (pixels) of the map used for risk statistics.
    pub smoothing_radius: usize,
    pub export: ExportConfig,
    pub seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            assets: AssetPaths::default(),
            ndvi: NdviConfig::default(),
            dem_band: "elevation".into(),
            downscale: DownscaleParams::default(),
            classifier: default_classifier_params(),
            split_threshold: 0.8,
            extraction_scale_m: 1000.0,
            smoothing_radius: 1,
            export: ExportConfig::default(),
            seed: 42,
        }
    }
}

fn positive(name: &'static str, v: f64) -> Result<()> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfig { name, value: v.to_string(), reason: "must be positive".into() })
    }
}

impl PipelineConfig {
    /// Read a JSON config; relative asset paths resolve against its folder.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingAsset(path.to_path_buf()));
        }
        let mut cfg: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        if let Some(base) = path.parent() {
            cfg.assets.resolve_against(base);
        }
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.ndvi.date_range()?;
        positive("ndvi.scale_m", self.ndvi.scale_m)?;
        positive("downscale.sample_scale_m", self.downscale.sample_scale_m)?;
        positive("extraction_scale_m", self.extraction_scale_m)?;
        positive("export.ndvi_scale_m", self.export.ndvi_scale_m)?;
        positive("export.dem_scale_m", self.export.dem_scale_m)?;
        positive("export.map_scale_m", self.export.map_scale_m)?;
        if self.downscale.num_pixels < 2 {
            return Err(Error::InvalidConfig {
                name: "downscale.num_pixels",
                value: self.downscale.num_pixels.to_string(),
                reason: "need at least 2 samples".into(),
            });
        }
        if !(self.split_threshold > 0.0 && self.split_threshold < 1.0) {
            return Err(Error::InvalidConfig {
                name: "split_threshold",
                value: self.split_threshold.to_string(),
                reason: "must be in (0, 1)".into(),
            });
        }
        for (name, forest) in [("downscale.forest", &self.downscale.forest), ("classifier", &self.classifier)] {
            if forest.n_trees == 0 || !(forest.bag_fraction > 0.0 && forest.bag_fraction <= 1.0) {
                return Err(Error::InvalidConfig {
                    name,
                    value: format!("{} trees, bag {}", forest.n_trees, forest.bag_fraction),
                    reason: "need at least one tree and a bag fraction in (0, 1]".into(),
                });
            }
        }
        self.export.legend.palette()?;
        if !self.export.crs.eq_ignore_ascii_case(EPSG_4326) {
            return Err(Error::UnsupportedCrs(self.export.crs.clone()));
        }
        Ok(())
    }
}
