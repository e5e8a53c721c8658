//! Map legend: ordered class/label/colour entries, saved as JSON plus a
//! swatch strip PNG.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use super::palette::{parse_color, Palette};
use crate::error::Result;
use crate::raster::Raster;

const SWATCH: u32 = 16;
const PAD: u32 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub class: i32,
    pub label: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legend {
    pub title: String,
    pub entries: Vec<LegendEntry>,
}

impl Default for Legend {
    fn default() -> Self {
        let entries = [
            ("Very high", "blue"),
            ("high", "green"),
            ("Moderate", "yellow"),
            ("low", "orange"),
            ("Very low", "red"),
        ]
        .iter()
        .enumerate()
        .map(|(i, (label, color))| LegendEntry { class: i as i32, label: label.to_string(), color: color.to_string() })
        .collect();
        Self { title: "Drought Severity Map".into(), entries }
    }
}

impl Legend {
    /// Entry colours as a palette, in legend order.
    pub fn palette(&self) -> Result<Palette> {
        Palette::parse(&self.entries.iter().map(|e| e.color.as_str()).collect::<Vec<_>>())
    }

    /// Discrete colouring of a class map: each pixel takes the colour of the
    /// entry with its class code. Nodata and unlisted codes are black.
    pub fn colorize(&self, raster: &Raster, band: usize) -> Result<Vec<u8>> {
        let lookup = self
            .entries
            .iter()
            .map(|e| Ok((e.class, parse_color(&e.color)?)))
            .collect::<Result<BTreeMap<i32, [u8; 3]>>>()?;
        let mut rgb = Vec::with_capacity(raster.grid.len() * 3);
        for &v in &raster.bands[band].data {
            let px = if v.is_finite() { lookup.get(&(v.round() as i32)).copied() } else { None };
            rgb.extend_from_slice(&px.unwrap_or([0, 0, 0]));
        }
        Ok(rgb)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        serde_json::to_writer_pretty(BufWriter::new(File::create(path)?), self)?;
        Ok(())
    }

    /// One swatch per entry, stacked top to bottom on white.
    pub fn render(&self) -> Result<RgbImage> {
        let n = self.entries.len().max(1) as u32;
        let mut img = RgbImage::from_pixel(SWATCH + 2 * PAD, n * (SWATCH + PAD) + PAD, Rgb([255, 255, 255]));
        for (i, entry) in self.entries.iter().enumerate() {
            let rgb = parse_color(&entry.color)?;
            let top = PAD + i as u32 * (SWATCH + PAD);
            for y in top..top + SWATCH {
                for x in PAD..PAD + SWATCH {
                    img.put_pixel(x, y, Rgb(rgb));
                }
            }
        }
        Ok(img)
    }

    pub fn write_png(&self, path: &Path) -> Result<()> {
        self.render()?.save(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Bounds, Grid};

    #[test]
    fn default_legend_runs_very_high_to_very_low() {
        let legend = Legend::default();
        assert_eq!(legend.title, "Drought Severity Map");
        let labels: Vec<&str> = legend.entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["Very high", "high", "Moderate", "low", "Very low"]);
        assert_eq!(legend.palette().unwrap(), Palette::default());
    }

    #[test]
    fn class_pixels_match_their_swatches() {
        let legend = Legend::default();
        let swatches = legend.render().unwrap();
        let grid = Grid::new(7, 1, Bounds::new(0.0, 7.0, 0.0, 1.0));
        let map = Raster::single(grid, "classification", vec![0.0, 1.0, 2.0, 3.0, 4.0, 9.0, f32::NAN]).unwrap();
        let rgb = legend.colorize(&map, 0).unwrap();

        for class in 0..5u32 {
            let i = class as usize * 3;
            let swatch = swatches.get_pixel(PAD, PAD + class * (SWATCH + PAD)).0;
            assert_eq!(&rgb[i..i + 3], &swatch, "class {class}");
        }
        assert_eq!(&rgb[15..18], &[0, 0, 0], "unlisted class");
        assert_eq!(&rgb[18..21], &[0, 0, 0], "nodata");
    }

    #[test]
    fn render_draws_one_swatch_per_entry() {
        let img = Legend::default().render().unwrap();
        assert_eq!(img.height(), 5 * (SWATCH + PAD) + PAD);
        assert_eq!(img.get_pixel(PAD, PAD).0, [0, 0, 255]);
        let last = PAD + 4 * (SWATCH + PAD);
        assert_eq!(img.get_pixel(PAD + 1, last + 1).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(0, 0).0, [255, 255, 255]);
    }

    #[test]
    fn json_and_png_land_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let legend = Legend::default();
        legend.write_json(&dir.path().join("legend.json")).unwrap();
        legend.write_png(&dir.path().join("legend.png")).unwrap();
        let back: Legend = serde_json::from_str(&std::fs::read_to_string(dir.path().join("legend.json")).unwrap()).unwrap();
        assert_eq!(back, legend);
        assert!(dir.path().join("legend.png").exists());
    }
}
