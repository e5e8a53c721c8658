//! Confusion matrices and accuracy statistics.

use log::info;
use serde::{Deserialize, Serialize};

use crate::forest::RandomForest;
use crate::sampler::{SampleRow, SampleTable};

/// Square count matrix, rows = actual class, columns = predicted class,
/// both indexed by `order`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub order: Vec<i32>,
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// Tally `(actual, predicted)` pairs. `order` is the sorted union of all
    /// labels seen on either side.
    pub fn from_pairs(actual: &[i32], predicted: &[i32]) -> Self {
        let mut order: Vec<i32> = actual.iter().chain(predicted).copied().collect();
        order.sort_unstable();
        order.dedup();

        let k = order.len();
        let mut counts = vec![vec![0usize; k]; k];
        for (a, p) in actual.iter().zip(predicted) {
            if let (Ok(i), Ok(j)) = (order.binary_search(a), order.binary_search(p)) {
                counts[i][j] += 1;
            }
        }
        Self { order, counts }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    fn trace(&self) -> usize {
        (0..self.order.len()).map(|i| self.counts[i][i]).sum()
    }

    /// Actual per-class counts.
    pub fn row_sums(&self) -> Vec<usize> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    /// Predicted per-class counts.
    pub fn col_sums(&self) -> Vec<usize> {
        (0..self.order.len()).map(|j| self.counts.iter().map(|row| row[j]).sum()).collect()
    }

    /// Overall accuracy; 0 for an empty matrix.
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.trace() as f64 / total as f64
    }

    /// Cohen's kappa. When chance agreement is already total, a perfect
    /// matrix scores 1 and anything else 0.
    pub fn kappa(&self) -> f64 {
        let total = self.total() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let observed = self.accuracy();
        let expected = self
            .row_sums()
            .iter()
            .zip(self.col_sums())
            .map(|(&r, c)| r as f64 * c as f64)
            .sum::<f64>()
            / (total * total);
        if (1.0 - expected).abs() < f64::EPSILON {
            return if observed >= 1.0 { 1.0 } else { 0.0 };
        }
        (observed - expected) / (1.0 - expected)
    }

    /// Per actual class: correct / actual count.
    pub fn producers_accuracy(&self) -> Vec<f64> {
        self.row_sums().iter().enumerate().map(|(i, &n)| ratio(self.counts[i][i], n)).collect()
    }

    /// Per predicted class: correct / predicted count.
    pub fn consumers_accuracy(&self) -> Vec<f64> {
        self.col_sums().iter().enumerate().map(|(j, &n)| ratio(self.counts[j][j], n)).collect()
    }

    pub fn get(&self, actual: i32, predicted: i32) -> usize {
        match (self.order.binary_search(&actual), self.order.binary_search(&predicted)) {
            (Ok(i), Ok(j)) => self.counts[i][j],
            _ => 0,
        }
    }

    pub fn to_rows(&self) -> Vec<Vec<usize>> {
        self.counts.clone()
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// A held-out row with the classifier's answer attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedRow {
    #[serde(flatten)]
    pub row: SampleRow,
    pub classification: i32,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Resubstitution on the training rows; optimistic.
    pub training: ConfusionMatrix,
    pub validation: ConfusionMatrix,
    pub validated: Vec<ValidatedRow>,
}

fn predict_rows(forest: &RandomForest, table: &SampleTable) -> Vec<i32> {
    table.rows.iter().map(|r| forest.predict_class(&r.values)).collect()
}

/// Training and validation matrices for a trained classifier.
pub fn evaluate(forest: &RandomForest, train: &SampleTable, test: &SampleTable) -> Evaluation {
    let training = ConfusionMatrix::from_pairs(&train.labels(), &predict_rows(forest, train));

    let predicted = predict_rows(forest, test);
    let validation = ConfusionMatrix::from_pairs(&test.labels(), &predicted);
    let validated = test
        .rows
        .iter()
        .zip(predicted)
        .map(|(row, classification)| ValidatedRow { row: row.clone(), classification })
        .collect();

    info!(
        "[evaluate] training accuracy {:.3} on {} rows, validation accuracy {:.3} (kappa {:.3}) on {} rows",
        training.accuracy(),
        training.total(),
        validation.accuracy(),
        validation.kappa(),
        validation.total()
    );
    Evaluation { training, validation, validated }
}
