//! Tabular exports: accuracy summary and validated sample rows.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::evaluate::{ConfusionMatrix, ValidatedRow};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Single row: the matrix as a nested list, overall accuracy, kappa.
pub fn accuracy_table(matrix: &ConfusionMatrix) -> Result<Table> {
    Ok(Table {
        header: vec!["ConfusionMatrix".into(), "Accuracy".into(), "Kappa".into()],
        rows: vec![vec![
            serde_json::to_string(&matrix.to_rows())?,
            matrix.accuracy().to_string(),
            matrix.kappa().to_string(),
        ]],
    })
}

/// One row per validated sample: location, band values, label, split draw
/// and predicted class.
pub fn validation_table(band_names: &[String], rows: &[ValidatedRow]) -> Table {
    let mut header = vec!["lon".to_string(), "lat".to_string()];
    header.extend(band_names.iter().cloned());
    header.extend(["class", "random", "classification"].map(String::from));

    let rows = rows
        .iter()
        .map(|v| {
            let mut out = vec![v.row.lon.to_string(), v.row.lat.to_string()];
            out.extend(v.row.values.iter().map(f64::to_string));
            out.push(v.row.class.to_string());
            out.push(v.row.random.to_string());
            out.push(v.classification.to_string());
            out
        })
        .collect();
    Table { header, rows }
}
