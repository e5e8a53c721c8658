//! Training-point extraction and the random train/test split.

use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::{Raster, METRES_PER_DEGREE};

/// A labelled location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingPoint {
    pub lon: f64,
    pub lat: f64,
    pub class: i32,
}

/// Read points from a CSV with `lon`, `lat` and `class` columns. Other
/// columns are ignored.
pub fn read_training_points(path: &Path) -> Result<Vec<TrainingPoint>> {
    if !path.exists() {
        return Err(Error::MissingAsset(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut points = Vec::new();
    for record in reader.deserialize() {
        let p: TrainingPoint = record?;
        points.push(p);
    }
    info!("[sampler] {} training points from {}", points.len(), path.display());
    Ok(points)
}

/// Count of points per class label.
pub fn class_distribution(points: &[TrainingPoint]) -> BTreeMap<i32, usize> {
    let mut hist = BTreeMap::new();
    for p in points {
        *hist.entry(p.class).or_insert(0) += 1;
    }
    hist
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRow {
    pub lon: f64,
    pub lat: f64,
    pub class: i32,
    /// One value per band of the table, in `band_names` order.
    pub values: Vec<f64>,
    /// Uniform draw in [0, 1) assigned by [`random_split`]; 0 before.
    pub random: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleTable {
    pub band_names: Vec<String>,
    pub rows: Vec<SampleRow>,
}

impl SampleTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn features(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.values.clone()).collect()
    }

    pub fn labels(&self) -> Vec<i32> {
        self.rows.iter().map(|r| r.class).collect()
    }
}

/// Read every band of `stack` at each point.
///
/// The point is first snapped to the centre of its `scale_m` cell in a grid
/// anchored at the stack's north-west corner, then read bilinearly. Points
/// outside the raster or on nodata are dropped.
pub fn sample_regions(stack: &Raster, points: &[TrainingPoint], scale_m: f64) -> Result<SampleTable> {
    if !(scale_m.is_finite() && scale_m > 0.0) {
        return Err(Error::InvalidConfig {
            name: "extraction_scale_m",
            value: scale_m.to_string(),
            reason: "must be positive".into(),
        });
    }
    let cell = scale_m / METRES_PER_DEGREE;
    let b = stack.grid.bounds;
    let n_bands = stack.bands.len();

    let mut rows = Vec::with_capacity(points.len());
    let mut dropped = 0usize;
    for p in points {
        if !b.contains(p.lon, p.lat) {
            dropped += 1;
            continue;
        }
        let lon = b.min_lon + (((p.lon - b.min_lon) / cell).floor() + 0.5) * cell;
        let lat = b.max_lat - (((b.max_lat - p.lat) / cell).floor() + 0.5) * cell;
        // The snapped centre can fall just past the raster edge.
        let (lon, lat) = (lon.min(b.max_lon), lat.max(b.min_lat));

        let values: Option<Vec<f64>> = (0..n_bands).map(|i| stack.sample_bilinear(i, lon, lat).map(f64::from)).collect();
        match values {
            Some(values) => rows.push(SampleRow { lon: p.lon, lat: p.lat, class: p.class, values, random: 0.0 }),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!("[sampler] {dropped} of {} points fell outside the stack or on nodata", points.len());
    }

    Ok(SampleTable { band_names: stack.band_names().iter().map(|s| s.to_string()).collect(), rows })
}

#[derive(Debug, Clone)]
pub struct Split {
    pub train: SampleTable,
    pub test: SampleTable,
}

/// One uniform draw per row: `< threshold` → train, otherwise test.
///
/// The train share converges to `threshold` but is not exact for any given
/// table.
pub fn random_split(table: &SampleTable, threshold: f64, seed: u64) -> Split {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = SampleTable { band_names: table.band_names.clone(), rows: Vec::new() };
    let mut test = train.clone();
    for row in &table.rows {
        let random: f64 = rng.gen();
        let row = SampleRow { random, ..row.clone() };
        if random < threshold {
            train.rows.push(row);
        } else {
            test.rows.push(row);
        }
    }
    Split { train, test }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Band, Bounds, Grid};

    fn stack() -> Raster {
        let grid = Grid::new(10, 10, Bounds::new(36.0, 37.0, 2.0, 3.0));
        let a: Vec<f32> = (0..100).map(|i| (i % 10) as f32).collect();
        let b = vec![5.0f32; 100];
        Raster::new(grid, vec![Band { name: "VCI".into(), data: a }, Band { name: "SPI".into(), data: b }]).unwrap()
    }

    fn table(n: usize) -> SampleTable {
        SampleTable {
            band_names: vec!["VCI".into()],
            rows: (0..n)
                .map(|i| SampleRow { lon: i as f64, lat: 0.0, class: (i % 5) as i32, values: vec![i as f64], random: 0.0 })
                .collect(),
        }
    }

    #[test]
    fn distribution_counts_each_class() {
        let pts = [
            TrainingPoint { lon: 0.0, lat: 0.0, class: 1 },
            TrainingPoint { lon: 0.0, lat: 0.0, class: 3 },
            TrainingPoint { lon: 0.0, lat: 0.0, class: 1 },
        ];
        let hist = class_distribution(&pts);
        assert_eq!(hist.get(&1), Some(&2));
        assert_eq!(hist.get(&3), Some(&1));
        assert_eq!(hist.len(), 2);
    }

    #[test]
    fn extraction_reads_all_bands_and_drops_outside_points() {
        let pts = [
            TrainingPoint { lon: 36.55, lat: 2.55, class: 2 },
            TrainingPoint { lon: 40.0, lat: 2.5, class: 1 },
        ];
        let t = sample_regions(&stack(), &pts, 1000.0).unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.band_names, vec!["VCI", "SPI"]);
        let row = &t.rows[0];
        assert_eq!(row.class, 2);
        assert!((row.values[1] - 5.0).abs() < 1e-9);
        assert!((row.values[0] - 5.0).abs() < 0.2, "VCI near column 5, got {}", row.values[0]);
    }

    #[test]
    fn split_is_disjoint_and_complete() {
        let t = table(1000);
        let s = random_split(&t, 0.8, 42);
        assert_eq!(s.train.len() + s.test.len(), t.len());

        let mut ids: Vec<i64> = s.train.rows.iter().chain(&s.test.rows).map(|r| r.lon as i64).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..1000).collect::<Vec<i64>>());
        assert!(s.train.rows.iter().all(|r| r.random < 0.8));
        assert!(s.test.rows.iter().all(|r| r.random >= 0.8));
    }

    #[test]
    fn split_proportion_is_within_binomial_bounds() {
        let n = 5000usize;
        let t = table(n);
        // 4 sigma of Binomial(n, 0.8).
        let sigma = (n as f64 * 0.8 * 0.2).sqrt();
        for seed in [1u64, 2, 3] {
            let s = random_split(&t, 0.8, seed);
            let dev = (s.train.len() as f64 - 0.8 * n as f64).abs();
            assert!(dev < 4.0 * sigma, "seed {seed}: {} train rows", s.train.len());
        }
    }

    #[test]
    fn points_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("points.csv");
        std::fs::write(&path, "lon,lat,class,name\n37.1,2.4,3,a\n37.9,3.1,0,b\n").unwrap();
        let pts = read_training_points(&path).unwrap();
        assert_eq!(pts, vec![
            TrainingPoint { lon: 37.1, lat: 2.4, class: 3 },
            TrainingPoint { lon: 37.9, lat: 3.1, class: 0 },
        ]);
    }
}
