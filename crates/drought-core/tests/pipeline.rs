//! Whole-pipeline run on small synthetic assets.

use std::fs;
use std::path::Path;

use drought_core::config::PipelineConfig;
use drought_core::export::{ExportStatus, Exporter, LocalFolder};
use drought_core::geotiff::{read_geotiff, write_band_f32};
use drought_core::raster::{Bounds, Grid, Raster, METRES_PER_DEGREE};
use drought_core::{DroughtPipeline, Error, PipelineInputs};

const REGION: &str = r#"{
  "type": "FeatureCollection",
  "features": [{
    "type": "Feature",
    "properties": { "name": "Marsabit" },
    "geometry": {
      "type": "Polygon",
      "coordinates": [[[37.0, 2.0], [37.2, 2.0], [37.2, 2.2], [37.0, 2.2], [37.0, 2.0]]]
    }
  }]
}"#;

/// Slightly larger than the region, as source rasters usually are.
fn source_bounds() -> Bounds {
    Bounds::new(36.9, 37.3, 1.9, 2.3)
}

fn write_layer(path: &Path, band: &str, w: usize, h: usize, f: impl Fn(usize, usize) -> f32) {
    let grid = Grid::new(w, h, source_bounds());
    let data = (0..h).flat_map(|r| (0..w).map(move |c| (r, c))).map(|(r, c)| f(r, c)).collect();
    write_band_f32(&Raster::single(grid, band, data).unwrap(), 0, path).unwrap();
}

/// Region, points, NDVI scenes, DEM and the four indicators. Indicators and
/// labels all follow longitude so the classifier has something to learn.
fn write_assets(dir: &Path) -> PipelineConfig {
    fs::write(dir.join("marsabit.geojson"), REGION).unwrap();

    let mut csv = String::from("lon,lat,class\n");
    for i in 0..15 {
        for j in 0..15 {
            let lon = 37.0 + (i as f64 + 0.5) * 0.2 / 15.0;
            let lat = 2.0 + (j as f64 + 0.5) * 0.2 / 15.0;
            csv.push_str(&format!("{lon},{lat},{}\n", i * 4 / 15));
        }
    }
    fs::write(dir.join("points.csv"), csv).unwrap();

    let scenes = dir.join("MOD13Q1");
    fs::create_dir_all(&scenes).unwrap();
    let ndvi_raw = |_: usize, c: usize| (0.1 + 0.8 * c as f32 / 40.0) * 10_000.0;
    write_layer(&scenes.join("MOD13Q1.A2005001.tif"), "NDVI", 40, 40, ndvi_raw);
    write_layer(&scenes.join("MOD13Q1.A2010001.tif"), "NDVI", 40, 40, ndvi_raw);
    write_layer(&scenes.join("MOD13Q1.A2025001.tif"), "NDVI", 40, 40, |_, _| -3000.0);
    // In the date window but on a tile nowhere near the region.
    let far = Raster::filled(Grid::new(4, 4, Bounds::new(10.0, 10.4, 50.0, 50.4)), "NDVI", 9000.0);
    write_band_f32(&far, 0, &scenes.join("MOD13Q1.A2007001.tif")).unwrap();

    write_layer(&dir.join("dem.tif"), "elevation", 40, 40, |r, _| 400.0 + r as f32 * 20.0);
    write_layer(&dir.join("vci.tif"), "VCI", 8, 8, |_, c| 10.0 * c as f32);
    write_layer(&dir.join("spi.tif"), "SPI3", 8, 8, |r, c| -1.0 + 0.1 * (r + c) as f32);
    write_layer(&dir.join("tci.tif"), "TCI", 8, 8, |r, c| 30.0 + (c as f32) * 5.0 - r as f32);
    let codes = [10.0f32, 40.0, 60.0];
    write_layer(&dir.join("lulc.tif"), "LULC", 8, 8, |_, c| codes[c * 3 / 8]);

    let mut cfg = PipelineConfig::default();
    cfg.assets.region = dir.join("marsabit.geojson");
    cfg.assets.training_points = dir.join("points.csv");
    cfg.assets.ndvi_collection = scenes;
    cfg.assets.dem = dir.join("dem.tif");
    cfg.assets.vci = dir.join("vci.tif");
    cfg.assets.spi = dir.join("spi.tif");
    cfg.assets.tci = dir.join("tci.tif");
    cfg.assets.lulc = dir.join("lulc.tif");
    cfg.downscale.num_pixels = 300;
    cfg.downscale.forest.n_trees = 10;
    cfg.classifier.n_trees = 20;
    cfg.export.dem_scale_m = 500.0;
    cfg.export.folder = dir.join("GEE_Exports");
    cfg
}

#[test]
fn full_run_produces_consistent_report_and_all_exports() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_assets(dir.path());
    let inputs = PipelineInputs::load(&cfg.assets).unwrap();
    assert_eq!(inputs.region.name, "marsabit");
    assert_eq!(inputs.training_points.len(), 225);

    let exporter = Exporter::new(LocalFolder::new(&cfg.export.folder));
    let result = DroughtPipeline::new().run(&cfg, &inputs, &exporter).unwrap();
    let r = &result.report;

    assert_eq!(r.n_ndvi_scenes, 2, "the far tile must not be counted");
    assert_eq!(r.band_names, vec!["VCI", "SPI", "TCI", "LULC"]);
    assert!(r.n_samples >= 200, "only {} of 225 points sampled", r.n_samples);
    assert_eq!(r.n_train + r.n_test, r.n_samples);
    assert_eq!(r.training_matrix.total(), r.n_train);
    assert_eq!(r.validation_matrix.total(), r.n_test);
    assert!(r.downscale_samples.values().all(|&n| n == 300));

    let pct: f64 = r.normalized_importance.iter().map(|(_, v)| v).sum();
    assert!((pct - 100.0).abs() < 1e-6, "importance sums to {pct}");
    assert!(r.training_accuracy > 0.8, "training accuracy {}", r.training_accuracy);
    assert!(r.risk_distribution.keys().all(|k| (0..4).contains(k)));
    assert!(!r.risk_distribution.is_empty());
    let stages: Vec<&str> = r.stages.iter().map(|s| s.stage.as_str()).collect();
    assert_eq!(stages, vec!["load", "downscale", "sample", "train", "evaluate"]);

    for handle in result.handles {
        let name = handle.name().to_string();
        let status = handle.wait();
        assert!(matches!(status, ExportStatus::Completed(_)), "{name}: {status}");
    }

    let out = dir.path().join("GEE_Exports");
    for file in [
        "NDVI_Clipped_Marsabit.tif",
        "DEM_Clipped_Marsabit.tif",
        "Drought_Risk_Map.tif",
        "Drought_Severity_Map2.tif",
        "Model_Accuracy_Results.csv",
        "Validation_Results.csv",
        "Drought_Severity_Legend.json",
        "Drought_Severity_Legend.png",
        "run_report.json",
    ] {
        assert!(out.join(file).exists(), "missing export {file}");
    }

    let risk = read_geotiff(&out.join("Drought_Risk_Map.tif"), "classification", None).unwrap();
    assert!((risk.grid.cell_height() * METRES_PER_DEGREE - 1000.0).abs() < 1.0);
    assert_eq!(risk.grid.width, result.risk_map.grid.width);

    let validation = fs::read_to_string(out.join("Validation_Results.csv")).unwrap();
    let header = validation.lines().next().unwrap();
    assert_eq!(header, "lon,lat,VCI,SPI,TCI,LULC,class,random,classification");
    assert_eq!(validation.lines().count(), r.n_test + 1);
}

#[test]
fn missing_asset_fails_before_any_export() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = write_assets(dir.path());
    cfg.assets.tci = dir.path().join("no_such_tci.tif");
    let inputs = PipelineInputs::load(&cfg.assets).unwrap();

    let exporter = Exporter::new(LocalFolder::new(&cfg.export.folder));
    let err = DroughtPipeline::new().run(&cfg, &inputs, &exporter).err().unwrap();
    assert!(matches!(err, Error::MissingAsset(ref p) if p.ends_with("no_such_tci.tif")), "{err}");
    assert!(!cfg.export.folder.exists());
}

#[test]
fn empty_date_window_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = write_assets(dir.path());
    cfg.ndvi.start_date = "2015-01-01".into();
    cfg.ndvi.end_date = "2016-01-01".into();
    let inputs = PipelineInputs::load(&cfg.assets).unwrap();

    let exporter = Exporter::new(LocalFolder::new(&cfg.export.folder));
    let err = DroughtPipeline::new().run(&cfg, &inputs, &exporter).err().unwrap();
    assert!(matches!(err, Error::EmptyCollection(_)), "{err}");
}
