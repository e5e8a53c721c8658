//! Drought-severity classifier: training, importance, map production.

use std::collections::BTreeMap;

use log::info;

use crate::error::{Error, Result};
use crate::forest::{ForestParams, RandomForest};
use crate::raster::{Band, Raster};
use crate::sampler::SampleTable;

/// Output band of [`classify_raster`].
pub const CLASSIFICATION_BAND: &str = "classification";

/// Forest settings of the severity classifier.
pub fn default_classifier_params() -> ForestParams {
    ForestParams {
        n_trees: 100,
        min_leaf_population: 3,
        bag_fraction: 0.7,
        ..ForestParams::default()
    }
}

#[derive(Debug, Clone)]
pub struct TrainedClassifier {
    pub forest: RandomForest,
    /// Raw impurity-decrease importance per band, key-sorted.
    pub importance: BTreeMap<String, f64>,
}

/// Train on every band of the table with the class label as target.
pub fn train_classifier(table: &SampleTable, params: &ForestParams) -> Result<TrainedClassifier> {
    if table.is_empty() {
        return Err(Error::InsufficientSamples { what: "classifier training".into(), needed: 1, got: 0 });
    }
    let forest = RandomForest::fit_classification(&table.band_names, &table.features(), &table.labels(), params)?;
    let importance = forest.importance();
    info!(
        "[classify] {} trees on {} rows, {} classes, bands {:?}",
        forest.n_trees(),
        table.len(),
        forest.classes().len(),
        table.band_names
    );
    Ok(TrainedClassifier { forest, importance })
}

/// Importance as percentages of the total, in the mapping's key order.
///
/// An empty mapping yields an empty list; an all-zero mapping cannot be
/// normalized.
pub fn normalize_importance(importance: &BTreeMap<String, f64>) -> Result<Vec<(String, f64)>> {
    if importance.is_empty() {
        return Ok(Vec::new());
    }
    let total: f64 = importance.values().sum();
    if total == 0.0 || !total.is_finite() {
        return Err(Error::DegenerateImportance);
    }
    Ok(importance.iter().map(|(k, &v)| (k.clone(), v / total * 100.0)).collect())
}

/// Per-pixel class of the stacked predictors.
pub fn classify_raster(stack: &Raster, forest: &RandomForest) -> Result<Raster> {
    forest.predict_raster(stack, CLASSIFICATION_BAND)
}

/// Focal majority filter over a `(2·radius+1)²` window. Ties keep the
/// centre class if it is among the tied, else the lowest class. Nodata
/// cells stay nodata and do not vote.
pub fn smooth_majority(raster: &Raster, radius: usize) -> Raster {
    if radius == 0 {
        return raster.clone();
    }
    let (w, h) = (raster.width(), raster.height());
    let src = raster.first();
    let mut out = vec![f32::NAN; src.len()];
    let mut votes: BTreeMap<i32, usize> = BTreeMap::new();

    for r in 0..h {
        for c in 0..w {
            let centre = src[r * w + c];
            if !centre.is_finite() {
                continue;
            }
            votes.clear();
            for rr in r.saturating_sub(radius)..=(r + radius).min(h - 1) {
                for cc in c.saturating_sub(radius)..=(c + radius).min(w - 1) {
                    let v = src[rr * w + cc];
                    if v.is_finite() {
                        *votes.entry(v.round() as i32).or_insert(0) += 1;
                    }
                }
            }
            let top = votes.values().copied().max().unwrap_or(0);
            let centre_class = centre.round() as i32;
            let winner = if votes.get(&centre_class) == Some(&top) {
                centre_class
            } else {
                votes.iter().find(|(_, n)| **n == top).map_or(centre_class, |(&k, _)| k)
            };
            out[r * w + c] = winner as f32;
        }
    }

    let name = raster.bands.first().map_or(CLASSIFICATION_BAND, |b| b.name.as_str());
    Raster { grid: raster.grid, bands: vec![Band { name: name.to_string(), data: out }] }
}

/// Pixel count per class (frequency histogram of the map).
pub fn class_frequency(raster: &Raster) -> BTreeMap<i32, usize> {
    let mut hist = BTreeMap::new();
    for &v in raster.first() {
        if v.is_finite() {
            *hist.entry(v.round() as i32).or_insert(0) += 1;
        }
    }
    hist
}
