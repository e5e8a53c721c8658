//! Drought-severity mapping: downscale coarse drought indicators with
//! random-forest regression on NDVI and elevation, classify severity from
//! labelled points, evaluate, and export maps and tables.

pub mod classify;
pub mod config;
pub mod downscale;
pub mod error;
pub mod evaluate;
pub mod export;
pub mod forest;
pub mod geotiff;
pub mod loader;
pub(crate) mod maybe_rayon;
pub mod pipeline;
pub mod raster;
pub mod region;
pub mod sampler;
pub mod stack;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use pipeline::{DroughtPipeline, PipelineInputs, PipelineReport, PipelineResult};
