//! Downscaling of coarse indicators onto the fine predictor grid.
//!
//! For each target: draw random sample cells inside the study region on a
//! sampling grid, read predictors (NDVI, elevation) and the coarse target
//! there, train a regression forest predictors → target, and evaluate it on
//! every pixel of the predictor raster. Targets are modelled independently.

use std::collections::BTreeSet;

use log::info;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::forest::{ForestParams, RandomForest};
use crate::raster::{Grid, Raster};
use crate::region::Region;

/// How predicted values are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    Continuous,
    /// Regression output is snapped to the nearest category code present in
    /// the coarse input. The forest still treats codes as numbers while
    /// training, so this approximates rather than preserves classes.
    Categorical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownscaleParams {
    pub num_pixels: usize,
    pub sample_scale_m: f64,
    pub forest: ForestParams,
}

impl Default for DownscaleParams {
    fn default() -> Self {
        Self {
            num_pixels: 5000,
            sample_scale_m: 1000.0,
            forest: ForestParams { n_trees: 100, ..ForestParams::default() },
        }
    }
}

/// Predictor vectors and targets at the sampled cells.
#[derive(Debug, Clone, Default)]
pub struct TrainingSamples {
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct Downscaled {
    /// Single band named after the target, on the predictor grid.
    pub raster: Raster,
    pub n_samples: usize,
    /// Category codes used for snapping (categorical targets only).
    pub categories: Vec<i32>,
}

/// Draw up to `num_pixels` sample cells of a `scale_m` grid over the region.
///
/// Cells are visited in seeded random order; cells whose predictors or
/// target are nodata are skipped.
pub fn random_sample(
    predictors: &Raster,
    target: &Raster,
    region: &Region,
    scale_m: f64,
    num_pixels: usize,
    seed: u64,
) -> Result<TrainingSamples> {
    let grid = Grid::covering(&region.bbox(), scale_m)?;
    let mut cells: Vec<(f64, f64)> = (0..grid.height)
        .flat_map(|r| (0..grid.width).map(move |c| (r, c)))
        .map(|(r, c)| grid.cell_centre(r, c))
        .filter(|&(lon, lat)| region.contains(lon, lat))
        .collect();
    let mut rng = StdRng::seed_from_u64(seed);
    cells.shuffle(&mut rng);

    let mut samples = TrainingSamples::default();
    let n_bands = predictors.bands.len();
    for (lon, lat) in cells {
        if samples.y.len() >= num_pixels {
            break;
        }
        let Some(t) = target.value_at(0, lon, lat) else { continue };
        let row: Option<Vec<f64>> =
            (0..n_bands).map(|b| predictors.sample_bilinear(b, lon, lat).map(f64::from)).collect();
        if let Some(row) = row {
            samples.x.push(row);
            samples.y.push(t as f64);
        }
    }
    Ok(samples)
}

/// Nearest code to `v`; ties go to the lower code. NaN stays NaN.
pub fn snap_to_category(v: f32, codes: &[i32]) -> f32 {
    if !v.is_finite() || codes.is_empty() {
        return f32::NAN;
    }
    let mut best = codes[0];
    for &code in &codes[1..] {
        if (code as f32 - v).abs() < (best as f32 - v).abs() {
            best = code;
        }
    }
    best as f32
}

/// Distinct rounded codes present in band 0.
fn category_codes(raster: &Raster) -> Vec<i32> {
    raster
        .first()
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| v.round() as i32)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Downscale one coarse `target` onto the grid of `predictors`.
pub fn downscale(
    predictors: &Raster,
    target: &Raster,
    target_name: &str,
    kind: TargetKind,
    region: &Region,
    params: &DownscaleParams,
) -> Result<Downscaled> {
    let samples = random_sample(
        predictors,
        target,
        region,
        params.sample_scale_m,
        params.num_pixels,
        params.forest.seed,
    )?;
    if samples.y.len() < 2 {
        return Err(Error::InsufficientSamples {
            what: format!("downscaling {target_name}"),
            needed: 2,
            got: samples.y.len(),
        });
    }

    let feature_names: Vec<String> = predictors.band_names().iter().map(|s| s.to_string()).collect();
    let forest = RandomForest::fit_regression(&feature_names, &samples.x, &samples.y, &params.forest)?;
    let mut raster = forest.predict_raster(predictors, target_name)?;

    let categories = match kind {
        TargetKind::Continuous => Vec::new(),
        TargetKind::Categorical => {
            let codes = category_codes(target);
            raster = raster.map_values(|v| snap_to_category(v, &codes));
            codes
        }
    };

    info!(
        "[downscale] {target_name}: {} samples, {} trees, avg depth {:.1}",
        samples.y.len(),
        forest.n_trees(),
        forest.avg_depth()
    );
    Ok(Downscaled { raster, n_samples: samples.y.len(), categories })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Band, Bounds};

    fn bounds() -> Bounds {
        Bounds::new(36.0, 37.0, 2.0, 3.0)
    }

    /// Fine predictors: NDVI rises west→east, elevation north→south.
    fn predictors() -> Raster {
        let grid = Grid::new(40, 40, bounds());
        let mut ndvi = Vec::with_capacity(grid.len());
        let mut elev = Vec::with_capacity(grid.len());
        for r in 0..40 {
            for c in 0..40 {
                ndvi.push(c as f32 / 40.0);
                elev.push(500.0 + r as f32 * 10.0);
            }
        }
        Raster::new(
            grid,
            vec![Band { name: "NDVI".into(), data: ndvi }, Band { name: "elevation".into(), data: elev }],
        )
        .unwrap()
    }

    /// Coarse 4×4 target.
    fn coarse(values: impl Fn(usize, usize) -> f32) -> Raster {
        let grid = Grid::new(4, 4, bounds());
        let data = (0..4).flat_map(|r| (0..4).map(move |c| (r, c))).map(|(r, c)| values(r, c)).collect();
        Raster::single(grid, "t", data).unwrap()
    }

    fn params() -> DownscaleParams {
        DownscaleParams {
            num_pixels: 500,
            sample_scale_m: 2000.0,
            forest: ForestParams { n_trees: 20, seed: 1, ..ForestParams::default() },
        }
    }

    #[test]
    fn sampling_respects_budget_and_region() {
        let region = Region::rectangle("half", Bounds::new(36.0, 36.5, 2.0, 3.0));
        let target = coarse(|_, c| c as f32);
        let s = random_sample(&predictors(), &target, &region, 2000.0, 100, 7).unwrap();
        assert_eq!(s.y.len(), 100);
        // Western half only: NDVI < ~0.5, target columns 0..=1.
        assert!(s.x.iter().all(|row| row[0] <= 0.52), "sample outside region");
        assert!(s.y.iter().all(|&t| t <= 1.0));
    }

    #[test]
    fn continuous_target_follows_predictor() {
        let region = Region::rectangle("all", bounds());
        let target = coarse(|_, c| c as f32 * 10.0);
        let out = downscale(&predictors(), &target, "VCI", TargetKind::Continuous, &region, &params()).unwrap();

        assert_eq!(out.raster.band_names(), vec!["VCI"]);
        assert_eq!(out.raster.grid, predictors().grid);
        let west = out.raster.get(0, 20, 2);
        let east = out.raster.get(0, 20, 37);
        assert!(west < 10.0 && east > 20.0, "west {west} east {east}");
    }

    #[test]
    fn categorical_values_stay_within_input_codes() {
        let region = Region::rectangle("all", bounds());
        let codes = [10.0f32, 40.0, 60.0];
        let target = coarse(|r, c| codes[(r + c) % 3]);
        let out = downscale(&predictors(), &target, "LULC", TargetKind::Categorical, &region, &params()).unwrap();

        assert_eq!(out.categories, vec![10, 40, 60]);
        for &v in out.raster.first() {
            if v.is_finite() {
                assert!(codes.contains(&v), "invented category {v}");
            }
        }
    }

    #[test]
    fn snapping_picks_nearest_and_lower_on_tie() {
        let codes = [1, 3, 7];
        assert_eq!(snap_to_category(2.9, &codes), 3.0);
        assert_eq!(snap_to_category(2.0, &codes), 1.0);
        assert_eq!(snap_to_category(100.0, &codes), 7.0);
        assert!(snap_to_category(f32::NAN, &codes).is_nan());
    }

    #[test]
    fn region_without_coverage_is_an_error() {
        let region = Region::rectangle("away", Bounds::new(50.0, 51.0, 10.0, 11.0));
        let target = coarse(|_, _| 1.0);
        let err = downscale(&predictors(), &target, "TCI", TargetKind::Continuous, &region, &params()).unwrap_err();
        assert!(matches!(err, Error::InsufficientSamples { got: 0, .. }));
    }
}
