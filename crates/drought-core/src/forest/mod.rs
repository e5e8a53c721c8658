//! Random forest: bagged CART trees with random feature subsets per split.
//!
//! Classification predicts by majority vote, regression by the mean of the
//! tree outputs. Trees are grown from independent per-tree seeds, so a forest
//! is identical whether it was trained with or without the `threading`
//! feature.

pub mod tree;

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::maybe_rayon::*;
use crate::raster::Raster;
use tree::{DecisionTree, Task, TreeParams};

/// Training hyper-parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub min_leaf_population: usize,
    /// Fraction of the input rows drawn (with replacement) for each tree.
    pub bag_fraction: f64,
    /// Candidate features per split; `None` means floor(sqrt(n_features)).
    #[serde(default)]
    pub variables_per_split: Option<usize>,
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            min_leaf_population: 1,
            bag_fraction: 0.5,
            variables_per_split: None,
            max_depth: None,
            seed: 0,
        }
    }
}

impl ForestParams {
    fn validate(&self) -> Result<()> {
        if self.n_trees == 0 {
            return Err(Error::InvalidConfig {
                name: "n_trees",
                value: "0".into(),
                reason: "a forest needs at least one tree".into(),
            });
        }
        if !(self.bag_fraction > 0.0 && self.bag_fraction <= 1.0) {
            return Err(Error::InvalidConfig {
                name: "bag_fraction",
                value: self.bag_fraction.to_string(),
                reason: "must be in (0, 1]".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    task: Task,
    /// Class label per class index (classification only).
    classes: Vec<i32>,
    feature_names: Vec<String>,
    /// Summed impurity decrease per feature over all trees.
    importance: Vec<f64>,
}

impl RandomForest {
    /// Fit a regression forest mapping rows of `x` to `y`.
    pub fn fit_regression(feature_names: &[String], x: &[Vec<f64>], y: &[f64], params: &ForestParams) -> Result<Self> {
        check_inputs(feature_names, x, y.len())?;
        Self::fit(feature_names, x, y, Task::Regression, Vec::new(), params)
    }

    /// Fit a classification forest over integer class labels.
    pub fn fit_classification(
        feature_names: &[String],
        x: &[Vec<f64>],
        labels: &[i32],
        params: &ForestParams,
    ) -> Result<Self> {
        check_inputs(feature_names, x, labels.len())?;
        let mut classes: Vec<i32> = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        let y: Vec<f64> = labels
            .iter()
            .map(|l| classes.binary_search(l).map_or(0.0, |i| i as f64))
            .collect();
        let task = Task::Classification { n_classes: classes.len() };
        Self::fit(feature_names, x, &y, task, classes, params)
    }

    fn fit(
        feature_names: &[String],
        x: &[Vec<f64>],
        y: &[f64],
        task: Task,
        classes: Vec<i32>,
        params: &ForestParams,
    ) -> Result<Self> {
        params.validate()?;
        let n = x.len();
        let n_features = feature_names.len();
        let bag = ((params.bag_fraction * n as f64).round() as usize).clamp(1, n);
        let tree_params = TreeParams {
            min_leaf_population: params.min_leaf_population,
            max_features: params
                .variables_per_split
                .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize)
                .max(1),
            max_depth: params.max_depth.unwrap_or(usize::MAX),
        };

        let grown: Vec<(DecisionTree, Vec<f64>)> = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed ^ (t as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
                let rows: Vec<usize> = (0..bag).map(|_| rng.gen_range(0..n)).collect();
                let mut importance = vec![0.0f64; n_features];
                let tree = DecisionTree::fit(x, y, rows, task, &tree_params, &mut rng, &mut importance);
                (tree, importance)
            })
            .collect();

        let mut importance = vec![0.0f64; n_features];
        let mut trees = Vec::with_capacity(grown.len());
        for (tree, imp) in grown {
            for (total, v) in importance.iter_mut().zip(imp) {
                *total += v;
            }
            trees.push(tree);
        }

        Ok(Self { trees, task, classes, feature_names: feature_names.to_vec(), importance })
    }

    /// Regression: mean tree output. Classification: the winning class
    /// label as f64.
    pub fn predict(&self, features: &[f64]) -> f64 {
        match self.task {
            Task::Regression => {
                self.trees.iter().map(|t| t.predict(features)).sum::<f64>() / self.trees.len() as f64
            }
            Task::Classification { .. } => self.predict_class(features) as f64,
        }
    }

    /// Majority vote; ties go to the lowest class label.
    pub fn predict_class(&self, features: &[f64]) -> i32 {
        let mut votes = vec![0usize; self.classes.len().max(1)];
        for tree in &self.trees {
            let idx = tree.predict(features) as usize;
            if idx < votes.len() {
                votes[idx] += 1;
            }
        }
        let (best, _) = votes
            .iter()
            .enumerate()
            .fold((0usize, 0usize), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) });
        self.classes.get(best).copied().unwrap_or(0)
    }

    /// Apply the forest to every pixel of `raster`, producing one band named
    /// `band_name`. Bands are looked up by the forest's feature names, so the
    /// raster's own band order does not matter. Pixels with any nodata input
    /// stay nodata.
    pub fn predict_raster(&self, raster: &Raster, band_name: &str) -> Result<Raster> {
        let columns: Vec<&[f32]> = self
            .feature_names
            .iter()
            .map(|name| raster.band(name).map(|b| b.data.as_slice()))
            .collect::<Result<_>>()?;
        let width = raster.width();

        let rows: Vec<Vec<f32>> = (0..raster.height())
            .into_par_iter()
            .map(|r| {
                let mut features = vec![0.0f64; columns.len()];
                (0..width)
                    .map(|c| {
                        let idx = r * width + c;
                        for (slot, col) in features.iter_mut().zip(&columns) {
                            *slot = col[idx] as f64;
                        }
                        if features.iter().all(|v| v.is_finite()) {
                            self.predict(&features) as f32
                        } else {
                            f32::NAN
                        }
                    })
                    .collect()
            })
            .collect();

        Raster::single(raster.grid, band_name, rows.into_iter().flatten().collect())
    }

    /// Raw importance per feature name, key-sorted.
    pub fn importance(&self) -> BTreeMap<String, f64> {
        self.feature_names.iter().cloned().zip(self.importance.iter().copied()).collect()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn classes(&self) -> &[i32] {
        &self.classes
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn avg_depth(&self) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(DecisionTree::depth).sum::<usize>() as f64 / self.trees.len() as f64
    }
}

fn check_inputs(feature_names: &[String], x: &[Vec<f64>], n_targets: usize) -> Result<()> {
    if x.is_empty() {
        return Err(Error::InsufficientSamples { what: "forest training".into(), needed: 1, got: 0 });
    }
    if x.len() != n_targets {
        return Err(Error::GridMismatch(format!("{} feature rows, {} targets", x.len(), n_targets)));
    }
    if let Some(bad) = x.iter().find(|row| row.len() != feature_names.len()) {
        return Err(Error::BandCountMismatch { bands: bad.len(), names: feature_names.len() });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    /// Two informative clusters on feature 0, feature 1 is noise.
    fn clusters() -> (Vec<Vec<f64>>, Vec<i32>) {
        let mut rng = StdRng::seed_from_u64(11);
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..200 {
            let class = (i % 2) as i32;
            let centre = if class == 0 { 0.2 } else { 0.8 };
            x.push(vec![centre + rng.gen_range(-0.1..0.1), rng.gen_range(0.0..1.0)]);
            y.push(class * 3 + 1); // labels 1 and 4
        }
        (x, y)
    }

    #[test]
    fn classifier_separates_clusters_and_ranks_features() {
        let (x, y) = clusters();
        let params = ForestParams { n_trees: 25, min_leaf_population: 3, bag_fraction: 0.7, seed: 5, ..Default::default() };
        let rf = RandomForest::fit_classification(&names(&["VCI", "noise"]), &x, &y, &params).unwrap();

        assert_eq!(rf.classes(), &[1, 4]);
        assert_eq!(rf.predict_class(&[0.2, 0.5]), 1);
        assert_eq!(rf.predict_class(&[0.8, 0.5]), 4);
        let imp = rf.importance();
        assert!(imp["VCI"] > imp["noise"], "{imp:?}");
    }

    #[test]
    fn regression_tracks_a_smooth_target() {
        let x: Vec<Vec<f64>> = (0..400).map(|i| vec![i as f64 / 400.0, ((i * 7) % 13) as f64]).collect();
        let y: Vec<f64> = x.iter().map(|r| 2.0 * r[0] + 1.0).collect();
        let params = ForestParams { n_trees: 30, seed: 9, ..Default::default() };
        let rf = RandomForest::fit_regression(&names(&["NDVI", "elevation"]), &x, &y, &params).unwrap();
        assert_abs_diff_eq!(rf.predict(&[0.5, 3.0]), 2.0, epsilon = 0.1);
        assert_abs_diff_eq!(rf.predict(&[0.1, 3.0]), 1.2, epsilon = 0.1);
    }

    #[test]
    fn same_seed_same_forest() {
        let (x, y) = clusters();
        let params = ForestParams { n_trees: 10, seed: 3, ..Default::default() };
        let a = RandomForest::fit_classification(&names(&["a", "b"]), &x, &y, &params).unwrap();
        let b = RandomForest::fit_classification(&names(&["a", "b"]), &x, &y, &params).unwrap();
        assert_eq!(a.importance(), b.importance());
    }

    #[test]
    fn rejects_empty_and_ragged_input() {
        let params = ForestParams::default();
        assert!(matches!(
            RandomForest::fit_regression(&names(&["a"]), &[], &[], &params),
            Err(Error::InsufficientSamples { .. })
        ));
        assert!(matches!(
            RandomForest::fit_regression(&names(&["a"]), &[vec![1.0, 2.0]], &[1.0], &params),
            Err(Error::BandCountMismatch { .. })
        ));
        let bad = ForestParams { bag_fraction: 0.0, ..Default::default() };
        assert!(RandomForest::fit_regression(&names(&["a"]), &[vec![1.0]], &[1.0], &bad).is_err());
    }
}
