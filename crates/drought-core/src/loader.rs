//! Raster loading: static assets, the NDVI scene collection, scale factors,
//! clipping, bilinear resampling and regridding onto a target scale.
//!
//! Scene collections are read from a directory or a `.tar` / `.tar.gz`
//! archive of GeoTIFFs. Each file name must carry an acquisition date
//! (`2019-05-01`, `2019_05_01`, `20190501` or the MODIS `A2019121` form).

use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geotiff::{read_geotiff, read_geotiff_bytes, read_grid, read_grid_bytes};
use crate::raster::{Band, Bounds, Grid, Raster, EPSG_4326};
use crate::region::Region;

// ── Scale factors ─────────────────────────────────────────────────────────────

/// Conversion from raw catalog integers to physical values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleSpec {
    pub factor: f32,
    #[serde(default)]
    pub offset: f32,
    /// Raw value marking missing data, checked before scaling.
    #[serde(default)]
    pub fill_value: Option<f32>,
    /// Physical range; scaled values outside it become nodata.
    #[serde(default)]
    pub valid_range: Option<(f32, f32)>,
}

impl ScaleSpec {
    /// MODIS MOD13Q1 NDVI: integers × 0.0001, fill -3000, range [-1, 1].
    pub fn modis_ndvi() -> Self {
        Self { factor: 0.0001, offset: 0.0, fill_value: Some(-3000.0), valid_range: Some((-1.0, 1.0)) }
    }

    pub fn identity() -> Self {
        Self { factor: 1.0, offset: 0.0, fill_value: None, valid_range: None }
    }

    #[inline]
    pub fn apply(&self, raw: f32) -> f32 {
        if !raw.is_finite() || self.fill_value == Some(raw) {
            return f32::NAN;
        }
        let v = raw * self.factor + self.offset;
        match self.valid_range {
            Some((lo, hi)) if v < lo || v > hi => f32::NAN,
            _ => v,
        }
    }
}

// ── Acquisition dates ─────────────────────────────────────────────────────────

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| Error::InvalidConfig {
        name: "date",
        value: s.to_string(),
        reason: format!("expected YYYY-MM-DD ({e})"),
    })
}

/// Find the acquisition date inside a file name. Tries, in order, a
/// separated `YYYY-MM-DD` / `YYYY_MM_DD` chunk, a MODIS `AYYYYDDD` chunk and
/// a compact `YYYYMMDD` run.
pub fn date_from_filename(name: &str) -> Option<NaiveDate> {
    let b = name.as_bytes();
    let chunk = |from: usize, len: usize| name.get(from..from + len);
    let all_digits = |s: &str| s.bytes().all(|c| c.is_ascii_digit());

    let separated = || {
        (0..b.len())
            .filter_map(|i| chunk(i, 10))
            .filter(|s| s.as_bytes()[..4].iter().all(u8::is_ascii_digit))
            .find_map(|s| ["%Y-%m-%d", "%Y_%m_%d"].iter().find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok()))
    };
    let modis = || {
        (0..b.len())
            .filter(|&i| b[i] == b'A' && (i == 0 || !b[i - 1].is_ascii_alphanumeric()))
            .find_map(|i| {
                let year = chunk(i + 1, 4).filter(|&s| all_digits(s))?.parse().ok()?;
                let doy = chunk(i + 5, 3).filter(|&s| all_digits(s))?.parse().ok()?;
                NaiveDate::from_yo_opt(year, doy)
            })
    };
    let compact = || {
        (0..b.len())
            .filter(|&i| i == 0 || !b[i - 1].is_ascii_digit())
            .filter(|&i| b.get(i + 8).map_or(true, |c| !c.is_ascii_digit()))
            .filter_map(|i| chunk(i, 8).filter(|&s| all_digits(s)))
            .find_map(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok())
    };

    separated().or_else(modis).or_else(compact)
}

// ── Scene collections ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum CollectionSource {
    Directory,
    Archive { path: PathBuf, gzip: bool },
}

#[derive(Debug, Clone)]
struct SceneEntry {
    date: NaiveDate,
    /// File path for directories, entry path inside the archive otherwise.
    path: PathBuf,
}

/// One scene handed out by [`ImageCollection::for_each_scene`].
enum Scene<'a> {
    File(&'a Path),
    /// Archive entry; tar entries don't implement Seek, the decoder needs it.
    Bytes(Vec<u8>, PathBuf),
}

impl Scene<'_> {
    fn path(&self) -> &Path {
        match self {
            Scene::File(p) => p,
            Scene::Bytes(_, p) => p,
        }
    }

    fn grid(&self) -> Result<Grid> {
        match self {
            Scene::File(p) => read_grid(p),
            Scene::Bytes(buf, p) => read_grid_bytes(buf, p),
        }
    }

    fn raster(&self, band: &str) -> Result<Raster> {
        match self {
            Scene::File(p) => read_geotiff(p, band, None),
            Scene::Bytes(buf, p) => read_geotiff_bytes(buf, p, band, None),
        }
    }
}

/// Per-pixel mean over a collection and how many scenes fed it.
#[derive(Debug, Clone)]
pub struct SceneMean {
    pub raster: Raster,
    pub n_scenes: usize,
}

/// A lazily-loaded, date-stamped series of single-band scenes.
///
/// Filters only narrow what gets read; pixels are read by [`mean_scaled`].
///
/// [`mean_scaled`]: ImageCollection::mean_scaled
#[derive(Debug, Clone)]
pub struct ImageCollection {
    pub id: String,
    source: CollectionSource,
    entries: Vec<SceneEntry>,
    bounds_filter: Option<Bounds>,
}

fn is_tiff(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".tif") || lower.ends_with(".tiff")
}

fn open_archive(path: &Path, gzip: bool) -> Result<tar::Archive<Box<dyn Read>>> {
    let file = fs::File::open(path)?;
    let reader: Box<dyn Read> = if gzip { Box::new(GzDecoder::new(file)) } else { Box::new(file) };
    Ok(tar::Archive::new(reader))
}

fn dated_entry(path: PathBuf) -> Option<SceneEntry> {
    let fname = path.file_name().and_then(|n| n.to_str())?;
    if !is_tiff(fname) {
        return None;
    }
    match date_from_filename(fname) {
        Some(date) => Some(SceneEntry { date, path }),
        None => {
            warn!("[loader] no acquisition date in {fname}, skipping");
            None
        }
    }
}

impl ImageCollection {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingAsset(path.to_path_buf()));
        }
        let id = path.display().to_string();
        let mut entries = Vec::new();

        let source = if path.is_dir() {
            for entry in fs::read_dir(path)? {
                entries.extend(dated_entry(entry?.path()));
            }
            CollectionSource::Directory
        } else {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_ascii_lowercase();
            let gzip = name.ends_with(".tar.gz") || name.ends_with(".tgz");
            let mut archive = open_archive(path, gzip)?;
            for entry in archive.entries()? {
                entries.extend(dated_entry(entry?.path()?.into_owned()));
            }
            CollectionSource::Archive { path: path.to_path_buf(), gzip }
        };

        entries.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.path.cmp(&b.path)));
        debug!("[loader] {id}: {} scenes listed", entries.len());
        Ok(Self { id, source, entries, bounds_filter: None })
    }

    /// Keep scenes with `start <= date < end`.
    pub fn filter_date(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.entries.retain(|e| e.date >= start && e.date < end);
        self
    }

    /// Keep scenes whose footprint intersects `bounds`, and limit the mean to
    /// `bounds`. Footprints are checked when the mean is taken.
    pub fn filter_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds_filter = Some(bounds);
        self
    }

    /// Scenes left after the date filter.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.entries.iter().map(|e| e.date).collect()
    }

    /// Hand the retained scenes to `f` one at a time.
    fn for_each_scene(&self, mut f: impl FnMut(Scene<'_>) -> Result<()>) -> Result<()> {
        match &self.source {
            CollectionSource::Directory => {
                for e in &self.entries {
                    f(Scene::File(&e.path))?;
                }
            }
            CollectionSource::Archive { path, gzip } => {
                // tar is sequential: one pass, picking the retained entries.
                let wanted: HashSet<&Path> = self.entries.iter().map(|e| e.path.as_path()).collect();
                let mut archive = open_archive(path, *gzip)?;
                for entry in archive.entries()? {
                    let mut entry = entry?;
                    let p = entry.path()?.into_owned();
                    if !wanted.contains(p.as_path()) {
                        continue;
                    }
                    let mut buf = Vec::new();
                    entry.read_to_end(&mut buf)?;
                    f(Scene::Bytes(buf, p))?;
                }
            }
        }
        Ok(())
    }

    /// Scale every scene, then average per pixel over the series.
    ///
    /// Scaling happens before the mean so fill values never reach it. The
    /// mean is taken on a mosaic grid spanning every retained footprint
    /// (cut to the bounds filter) at the finest scene resolution, so
    /// adjacent tiles add coverage. Scenes are read and folded into the
    /// running sums one at a time.
    pub fn mean_scaled(&self, band: &str, scale: &ScaleSpec) -> Result<SceneMean> {
        let mut footprints = Vec::with_capacity(self.entries.len());
        self.for_each_scene(|scene| {
            let grid = scene.grid()?;
            if self.bounds_filter.map_or(true, |b| grid.bounds.intersects(&b)) {
                footprints.push((scene.path().to_path_buf(), grid));
            }
            Ok(())
        })?;
        if footprints.len() < self.entries.len() {
            debug!("[loader] {}: {} scenes outside bounds dropped", self.id, self.entries.len() - footprints.len());
        }
        let target = mosaic_grid(footprints.iter().map(|(_, g)| g), self.bounds_filter)
            .ok_or_else(|| Error::EmptyCollection(self.id.clone()))?;
        let kept: HashSet<PathBuf> = footprints.into_iter().map(|(p, _)| p).collect();

        let mut sum = vec![0.0f64; target.len()];
        let mut count = vec![0u32; target.len()];
        let mut n_scenes = 0;
        self.for_each_scene(|scene| {
            if kept.contains(scene.path()) {
                let raster = scene.raster(band)?.map_values(|v| scale.apply(v));
                accumulate(&raster, &target, &mut sum, &mut count);
                n_scenes += 1;
            }
            Ok(())
        })?;

        let data = sum
            .iter()
            .zip(&count)
            .map(|(&s, &n)| if n == 0 { f32::NAN } else { (s / n as f64) as f32 })
            .collect();
        info!("[loader] {}: mean of {n_scenes} scenes on a {}x{} grid", self.id, target.width, target.height);
        Ok(SceneMean { raster: Raster::single(target, band, data)?, n_scenes })
    }
}

/// Grid over the union of `grids` at their finest cell size, anchored at the
/// north-west corner and cut to `limit`. None when there is nothing to cover.
fn mosaic_grid<'a>(grids: impl Iterator<Item = &'a Grid>, limit: Option<Bounds>) -> Option<Grid> {
    let mut extent: Option<Bounds> = None;
    let (mut cw, mut ch) = (f64::INFINITY, f64::INFINITY);
    for g in grids {
        let b = g.bounds;
        extent = Some(match extent {
            None => b,
            Some(e) => Bounds::new(
                e.min_lon.min(b.min_lon),
                e.max_lon.max(b.max_lon),
                e.min_lat.min(b.min_lat),
                e.max_lat.max(b.max_lat),
            ),
        });
        cw = cw.min(g.cell_width());
        ch = ch.min(g.cell_height());
    }
    let mut e = extent?;
    if let Some(l) = limit {
        e = Bounds::new(e.min_lon.max(l.min_lon), e.max_lon.min(l.max_lon), e.min_lat.max(l.min_lat), e.max_lat.min(l.max_lat));
    }
    if e.max_lon <= e.min_lon || e.max_lat <= e.min_lat {
        return None;
    }
    let width = (((e.max_lon - e.min_lon) / cw - 1e-9).ceil() as usize).max(1);
    let height = (((e.max_lat - e.min_lat) / ch - 1e-9).ceil() as usize).max(1);
    Some(Grid::new(
        width,
        height,
        Bounds::new(e.min_lon, e.min_lon + width as f64 * cw, e.max_lat - height as f64 * ch, e.max_lat),
    ))
}

/// Add the finite values of `scene` into the per-cell sums of `target`.
fn accumulate(scene: &Raster, target: &Grid, sum: &mut [f64], count: &mut [u32]) {
    if scene.grid.same_as(target) {
        for (i, &v) in scene.first().iter().enumerate() {
            if v.is_finite() {
                sum[i] += v as f64;
                count[i] += 1;
            }
        }
        return;
    }
    for r in 0..target.height {
        for c in 0..target.width {
            let (lon, lat) = target.cell_centre(r, c);
            if let Some(v) = scene.sample_bilinear(0, lon, lat) {
                let i = r * target.width + c;
                sum[i] += v as f64;
                count[i] += 1;
            }
        }
    }
}

// ── Spatial operations ────────────────────────────────────────────────────────

/// Mask every cell whose centre lies outside `region`.
pub fn clip(raster: &Raster, region: &Region) -> Raster {
    let grid = raster.grid;
    let inside: Vec<bool> = (0..grid.height)
        .flat_map(|r| (0..grid.width).map(move |c| (r, c)))
        .map(|(r, c)| {
            let (lon, lat) = grid.cell_centre(r, c);
            region.contains(lon, lat)
        })
        .collect();
    Raster {
        grid,
        bands: raster
            .bands
            .iter()
            .map(|b| Band {
                name: b.name.clone(),
                data: b.data.iter().zip(&inside).map(|(&v, &keep)| if keep { v } else { f32::NAN }).collect(),
            })
            .collect(),
    }
}

/// Bilinear resampling of every band onto `target`.
pub fn resample_bilinear(raster: &Raster, target: &Grid) -> Raster {
    let bands = raster
        .bands
        .iter()
        .enumerate()
        .map(|(bi, b)| {
            let mut data = Vec::with_capacity(target.len());
            for r in 0..target.height {
                for c in 0..target.width {
                    let (lon, lat) = target.cell_centre(r, c);
                    data.push(raster.sample_bilinear(bi, lon, lat).unwrap_or(f32::NAN));
                }
            }
            Band { name: b.name.clone(), data }
        })
        .collect();
    Raster { grid: *target, bands }
}

/// Nearest-neighbour regridding, for categorical maps.
pub fn resample_nearest(raster: &Raster, target: &Grid) -> Raster {
    let bands = raster
        .bands
        .iter()
        .enumerate()
        .map(|(bi, b)| {
            let data = (0..target.height)
                .flat_map(|r| (0..target.width).map(move |c| (r, c)))
                .map(|(r, c)| {
                    let (lon, lat) = target.cell_centre(r, c);
                    raster.value_at(bi, lon, lat).unwrap_or(f32::NAN)
                })
                .collect();
            Band { name: b.name.clone(), data }
        })
        .collect();
    Raster { grid: *target, bands }
}

/// Regrid onto `scale_m` cells covering `bounds` in `crs`.
pub fn reproject(raster: &Raster, crs: &str, scale_m: f64, bounds: &Bounds) -> Result<Raster> {
    if !crs.eq_ignore_ascii_case(EPSG_4326) {
        return Err(Error::UnsupportedCrs(crs.to_string()));
    }
    let target = Grid::covering(bounds, scale_m)?;
    Ok(resample_bilinear(raster, &target))
}
