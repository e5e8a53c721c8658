//! Error types for the drought pipeline.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("missing asset: {}", .0.display())]
    MissingAsset(PathBuf),

    #[error("collection {0} is empty after filtering")]
    EmptyCollection(String),

    #[error("raster {} carries no pixel-scale/tiepoint georeference", .0.display())]
    MissingGeoreference(PathBuf),

    #[error("unsupported pixel type in {0}")]
    UnsupportedPixelType(String),

    #[error("unsupported CRS {0}: only EPSG:4326 is handled")]
    UnsupportedCrs(String),

    #[error("grid mismatch: {0}")]
    GridMismatch(String),

    #[error("band count mismatch: raster has {bands} bands, {names} names given")]
    BandCountMismatch { bands: usize, names: usize },

    #[error("duplicate band name {0}")]
    DuplicateBand(String),

    #[error("no band named {0}")]
    UnknownBand(String),

    #[error("{what}: need at least {needed} usable samples, got {got}")]
    InsufficientSamples { what: String, needed: usize, got: usize },

    #[error("feature importance is all zero, cannot normalize")]
    DegenerateImportance,

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("invalid config: {name} = {value} ({reason})")]
    InvalidConfig {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("export {name} failed: {reason}")]
    Export { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
