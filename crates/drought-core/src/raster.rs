use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metres per degree of latitude; used to turn a pixel scale in metres into
/// a geographic cell size.
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// The only coordinate reference system the pipeline works in.
pub const EPSG_4326: &str = "EPSG:4326";

/// Geographic extent in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl Bounds {
    pub fn new(min_lon: f64, max_lon: f64, min_lat: f64, max_lat: f64) -> Self {
        Self { min_lon, max_lon, min_lat, max_lat }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_lon < other.max_lon
            && self.max_lon > other.min_lon
            && self.min_lat < other.max_lat
            && self.max_lat > other.min_lat
    }
}

/// Pixel layout of a raster: north-up, pixel-is-area.
///
/// Row 0 is the northern edge (`max_lat`), column 0 the western edge
/// (`min_lon`), matching GeoTIFF storage order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub width: usize,
    pub height: usize,
    pub bounds: Bounds,
}

impl Grid {
    pub fn new(width: usize, height: usize, bounds: Bounds) -> Self {
        Self { width, height, bounds }
    }

    /// Smallest grid with square `scale_m` cells anchored at the north-west
    /// corner of `bounds` that covers all of `bounds`.
    pub fn covering(bounds: &Bounds, scale_m: f64) -> Result<Self> {
        if !(scale_m.is_finite() && scale_m > 0.0) {
            return Err(Error::InvalidConfig {
                name: "scale",
                value: scale_m.to_string(),
                reason: "pixel scale must be positive".into(),
            });
        }
        let cell = scale_m / METRES_PER_DEGREE;
        let width = (((bounds.max_lon - bounds.min_lon) / cell).ceil() as usize).max(1);
        let height = (((bounds.max_lat - bounds.min_lat) / cell).ceil() as usize).max(1);
        Ok(Self {
            width,
            height,
            bounds: Bounds {
                min_lon: bounds.min_lon,
                max_lon: bounds.min_lon + width as f64 * cell,
                min_lat: bounds.max_lat - height as f64 * cell,
                max_lat: bounds.max_lat,
            },
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn cell_width(&self) -> f64 {
        (self.bounds.max_lon - self.bounds.min_lon) / self.width as f64
    }

    #[inline]
    pub fn cell_height(&self) -> f64 {
        (self.bounds.max_lat - self.bounds.min_lat) / self.height as f64
    }

    /// Nominal pixel size in metres (north-south cell size).
    pub fn scale_m(&self) -> f64 {
        self.cell_height() * METRES_PER_DEGREE
    }

    /// Geographic centre (lon, lat) of cell `(row, col)`.
    pub fn cell_centre(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.bounds.min_lon + (col as f64 + 0.5) * self.cell_width(),
            self.bounds.max_lat - (row as f64 + 0.5) * self.cell_height(),
        )
    }

    /// Cell containing (lon, lat), or None outside the grid.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        if !self.bounds.contains(lon, lat) || self.is_empty() {
            return None;
        }
        let col = ((lon - self.bounds.min_lon) / self.cell_width()).floor() as usize;
        let row = ((self.bounds.max_lat - lat) / self.cell_height()).floor() as usize;
        Some((row.min(self.height - 1), col.min(self.width - 1)))
    }

    pub fn same_as(&self, other: &Grid) -> bool {
        const EPS: f64 = 1e-9;
        self.width == other.width
            && self.height == other.height
            && (self.bounds.min_lon - other.bounds.min_lon).abs() < EPS
            && (self.bounds.max_lon - other.bounds.max_lon).abs() < EPS
            && (self.bounds.min_lat - other.bounds.min_lat).abs() < EPS
            && (self.bounds.max_lat - other.bounds.max_lat).abs() < EPS
    }
}

/// One named layer of a raster. Row-major, `NaN` marks nodata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub data: Vec<f32>,
}

/// A geo-referenced multi-band raster in EPSG:4326.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster {
    pub grid: Grid,
    pub bands: Vec<Band>,
}

impl Raster {
    pub fn new(grid: Grid, bands: Vec<Band>) -> Result<Self> {
        for band in &bands {
            if band.data.len() != grid.len() {
                return Err(Error::GridMismatch(format!(
                    "band {} has {} cells, grid {}x{} needs {}",
                    band.name,
                    band.data.len(),
                    grid.width,
                    grid.height,
                    grid.len()
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for band in &bands {
            if !seen.insert(band.name.as_str()) {
                return Err(Error::DuplicateBand(band.name.clone()));
            }
        }
        Ok(Self { grid, bands })
    }

    /// Single-band raster.
    pub fn single(grid: Grid, name: &str, data: Vec<f32>) -> Result<Self> {
        Self::new(grid, vec![Band { name: name.to_string(), data }])
    }

    /// Single-band raster filled with `fill`.
    pub fn filled(grid: Grid, name: &str, fill: f32) -> Self {
        Self {
            grid,
            bands: vec![Band { name: name.to_string(), data: vec![fill; grid.len()] }],
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.grid.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.grid.height
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn band(&self, name: &str) -> Result<&Band> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| Error::UnknownBand(name.to_string()))
    }

    /// The first band's values; rasters built by the loader are single-band.
    pub fn first(&self) -> &[f32] {
        self.bands.first().map(|b| b.data.as_slice()).unwrap_or(&[])
    }

    #[inline]
    pub fn get(&self, band: usize, row: usize, col: usize) -> f32 {
        self.bands[band].data[row * self.grid.width + col]
    }

    /// Value of the cell containing (lon, lat). None outside the raster or
    /// on nodata.
    pub fn value_at(&self, band: usize, lon: f64, lat: f64) -> Option<f32> {
        let (row, col) = self.grid.locate(lon, lat)?;
        let v = self.get(band, row, col);
        v.is_finite().then_some(v)
    }

    /// Bilinear interpolation between the four cell centres around
    /// (lon, lat). Nodata neighbours are dropped and the remaining weights
    /// renormalised. None outside the raster or when all four are nodata.
    pub fn sample_bilinear(&self, band: usize, lon: f64, lat: f64) -> Option<f32> {
        let g = &self.grid;
        if !g.bounds.contains(lon, lat) || g.is_empty() {
            return None;
        }

        let fx = ((lon - g.bounds.min_lon) / g.cell_width() - 0.5).clamp(0.0, (g.width - 1) as f64);
        let fy = ((g.bounds.max_lat - lat) / g.cell_height() - 0.5).clamp(0.0, (g.height - 1) as f64);

        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(g.width - 1);
        let y1 = (y0 + 1).min(g.height - 1);

        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;

        let taps = [
            (self.get(band, y0, x0), (1.0 - tx) * (1.0 - ty)),
            (self.get(band, y0, x1), tx * (1.0 - ty)),
            (self.get(band, y1, x0), (1.0 - tx) * ty),
            (self.get(band, y1, x1), tx * ty),
        ];

        let mut sum = 0.0f64;
        let mut weight = 0.0f64;
        for (v, w) in taps {
            if v.is_finite() && w > 0.0 {
                sum += v as f64 * w;
                weight += w;
            }
        }
        if weight <= 1e-12 {
            // Exactly on a cell centre whose own value is nodata, or all
            // neighbours nodata.
            return None;
        }
        Some((sum / weight) as f32)
    }

    /// Apply `f` to every value of every band.
    pub fn map_values(&self, f: impl Fn(f32) -> f32) -> Raster {
        Raster {
            grid: self.grid,
            bands: self
                .bands
                .iter()
                .map(|b| Band { name: b.name.clone(), data: b.data.iter().map(|&v| f(v)).collect() })
                .collect(),
        }
    }

    /// Rename bands in place order. `names` must have one entry per band.
    pub fn rename(&self, names: &[&str]) -> Result<Raster> {
        if names.len() != self.bands.len() {
            return Err(Error::BandCountMismatch { bands: self.bands.len(), names: names.len() });
        }
        let bands = self
            .bands
            .iter()
            .zip(names)
            .map(|(b, n)| Band { name: n.to_string(), data: b.data.clone() })
            .collect();
        Raster::new(self.grid, bands)
    }

    /// Append the bands of `other` after this raster's bands.
    pub fn add_bands(&self, other: &Raster) -> Result<Raster> {
        if !self.grid.same_as(&other.grid) {
            return Err(Error::GridMismatch(format!(
                "cannot stack {:?} onto {}x{} grid",
                other.band_names(),
                self.grid.width,
                self.grid.height
            )));
        }
        let mut bands = self.bands.clone();
        bands.extend(other.bands.iter().cloned());
        Raster::new(self.grid, bands)
    }
}
