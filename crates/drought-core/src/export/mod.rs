//! Export of maps, tables and legends to a destination folder.
//!
//! Exports are fire-and-forget: [`Exporter::submit`] starts the write on a
//! worker thread and returns an [`ExportHandle`] immediately. Callers poll
//! [`ExportHandle::status`] or block on [`ExportHandle::wait`].

pub mod legend;
pub mod palette;
pub mod tables;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geotiff;
use crate::raster::{Grid, Raster};
use legend::Legend;
use tables::Table;

pub const NDVI_EXPORT: &str = "NDVI_Clipped_Marsabit";
pub const DEM_EXPORT: &str = "DEM_Clipped_Marsabit";
pub const RISK_MAP_EXPORT: &str = "Drought_Risk_Map";
pub const SEVERITY_MAP_EXPORT: &str = "Drought_Severity_Map2";
pub const ACCURACY_EXPORT: &str = "Model_Accuracy_Results";
pub const VALIDATION_EXPORT: &str = "Validation_Results";

/// Where exported files go.
pub trait ExportDestination: Send + Sync {
    /// Full path for an export `name` with extension `ext`.
    fn path_for(&self, name: &str, ext: &str) -> Result<PathBuf>;

    fn describe(&self) -> String;
}

/// A folder on the local filesystem, created on first use.
#[derive(Debug, Clone)]
pub struct LocalFolder {
    root: PathBuf,
}

impl LocalFolder {
    pub const DEFAULT_NAME: &'static str = "GEE_Exports";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ExportDestination for LocalFolder {
    fn path_for(&self, name: &str, ext: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.root)?;
        Ok(self.root.join(format!("{name}.{ext}")))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// What an export writes.
#[derive(Debug, Clone)]
pub enum ExportPayload {
    /// One band as Float32 GeoTIFF.
    Band { raster: Raster, band: usize },
    /// Visualized map as RGB8 GeoTIFF.
    Rgb { grid: Grid, rgb: Vec<u8> },
    Table(Table),
    /// Legend JSON plus swatch PNG.
    Legend(Legend),
    Json(serde_json::Value),
}

#[derive(Debug, Clone)]
pub struct ExportTask {
    pub name: String,
    pub payload: ExportPayload,
}

impl ExportTask {
    pub fn new(name: &str, payload: ExportPayload) -> Self {
        Self { name: name.to_string(), payload }
    }

    fn run(self, destination: &dyn ExportDestination) -> Result<PathBuf> {
        match self.payload {
            ExportPayload::Band { raster, band } => {
                if band >= raster.bands.len() {
                    return Err(Error::Export { name: self.name, reason: format!("no band {band}") });
                }
                let path = destination.path_for(&self.name, "tif")?;
                geotiff::write_band_f32(&raster, band, &path)?;
                Ok(path)
            }
            ExportPayload::Rgb { grid, rgb } => {
                let path = destination.path_for(&self.name, "tif")?;
                geotiff::write_rgb8(&grid, &rgb, &path)?;
                Ok(path)
            }
            ExportPayload::Table(table) => {
                let path = destination.path_for(&self.name, "csv")?;
                table.write_csv(&path)?;
                Ok(path)
            }
            ExportPayload::Legend(legend) => {
                legend.write_png(&destination.path_for(&self.name, "png")?)?;
                let path = destination.path_for(&self.name, "json")?;
                legend.write_json(&path)?;
                Ok(path)
            }
            ExportPayload::Json(value) => {
                let path = destination.path_for(&self.name, "json")?;
                std::fs::write(&path, serde_json::to_string_pretty(&value)?)?;
                Ok(path)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStatus {
    Running,
    Completed(PathBuf),
    Failed(String),
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportStatus::Running => write!(f, "running"),
            ExportStatus::Completed(path) => write!(f, "completed ({})", path.display()),
            ExportStatus::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// Status handle of a submitted export.
#[derive(Debug)]
pub struct ExportHandle {
    name: String,
    status: Arc<Mutex<ExportStatus>>,
    worker: Option<JoinHandle<()>>,
}

impl ExportHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ExportStatus {
        match self.status.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Block until the export finishes.
    pub fn wait(mut self) -> ExportStatus {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return ExportStatus::Failed("export worker panicked".into());
            }
        }
        self.status()
    }
}

/// Submits export tasks against one destination.
#[derive(Clone)]
pub struct Exporter {
    destination: Arc<dyn ExportDestination>,
}

impl Exporter {
    pub fn new(destination: impl ExportDestination + 'static) -> Self {
        Self { destination: Arc::new(destination) }
    }

    pub fn destination(&self) -> &dyn ExportDestination {
        self.destination.as_ref()
    }

    /// Start writing `task` and return without waiting.
    pub fn submit(&self, task: ExportTask) -> ExportHandle {
        let name = task.name.clone();
        let status = Arc::new(Mutex::new(ExportStatus::Running));
        let destination = Arc::clone(&self.destination);
        let shared = Arc::clone(&status);
        debug!("[export] submitted {name} to {}", destination.describe());

        let worker = thread::spawn(move || {
            let task_name = task.name.clone();
            let outcome = match task.run(destination.as_ref()) {
                Ok(path) => ExportStatus::Completed(path),
                Err(e) => {
                    warn!("[export] {task_name} failed: {e}");
                    ExportStatus::Failed(e.to_string())
                }
            };
            match shared.lock() {
                Ok(mut s) => *s = outcome,
                Err(poisoned) => *poisoned.into_inner() = outcome,
            }
        });
        ExportHandle { name, status, worker: Some(worker) }
    }
}
