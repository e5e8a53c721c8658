//! Colour palettes and min/max stretch of a band to RGB.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::Raster;

/// Named colours accepted in palettes and legends.
const NAMED: [(&str, [u8; 3]); 10] = [
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("orange", [255, 165, 0]),
    ("yellow", [255, 255, 0]),
    ("green", [0, 128, 0]),
    ("blue", [0, 0, 255]),
    ("brown", [165, 42, 42]),
    ("gray", [128, 128, 128]),
    ("purple", [128, 0, 128]),
];

/// Parse a named colour or `#RRGGBB` / `RRGGBB`.
pub fn parse_color(s: &str) -> Result<[u8; 3]> {
    let key = s.trim().to_ascii_lowercase();
    if let Some((_, rgb)) = NAMED.iter().find(|(n, _)| *n == key) {
        return Ok(*rgb);
    }
    let hex = key.strip_prefix('#').unwrap_or(&key);
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
        if let (Ok(r), Ok(g), Ok(b)) = (byte(0), byte(2), byte(4)) {
            return Ok([r, g, b]);
        }
    }
    Err(Error::InvalidConfig { name: "palette", value: s.to_string(), reason: "unknown colour".into() })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Palette {
    names: Vec<String>,
    stops: Vec<[u8; 3]>,
}

impl Palette {
    pub fn parse<S: AsRef<str>>(colors: &[S]) -> Result<Self> {
        if colors.is_empty() {
            return Err(Error::InvalidConfig {
                name: "palette",
                value: "[]".into(),
                reason: "needs at least one colour".into(),
            });
        }
        let stops = colors.iter().map(|c| parse_color(c.as_ref())).collect::<Result<_>>()?;
        Ok(Self { names: colors.iter().map(|c| c.as_ref().to_string()).collect(), stops })
    }

    pub fn stops(&self) -> &[[u8; 3]] {
        &self.stops
    }

    /// Colour at `t` in [0, 1], interpolated between neighbouring stops.
    pub fn at(&self, t: f64) -> [u8; 3] {
        let last = self.stops.len() - 1;
        if last == 0 {
            return self.stops[0];
        }
        let pos = t.clamp(0.0, 1.0) * last as f64;
        let i = (pos.floor() as usize).min(last - 1);
        let f = pos - i as f64;
        let (a, b) = (self.stops[i], self.stops[i + 1]);
        std::array::from_fn(|k| (a[k] as f64 + (b[k] as f64 - a[k] as f64) * f).round() as u8)
    }
}

/// Five-stop blue-to-red ramp, the legend order.
impl Default for Palette {
    fn default() -> Self {
        Self {
            names: ["blue", "green", "yellow", "orange", "red"].iter().map(|s| s.to_string()).collect(),
            stops: vec![[0, 0, 255], [0, 128, 0], [255, 255, 0], [255, 165, 0], [255, 0, 0]],
        }
    }
}

impl TryFrom<Vec<String>> for Palette {
    type Error = Error;

    fn try_from(colors: Vec<String>) -> Result<Self> {
        Self::parse(&colors)
    }
}

impl From<Palette> for Vec<String> {
    fn from(p: Palette) -> Self {
        p.names
    }
}

/// Stretch band `band` linearly from `[min, max]` over the palette.
/// Returns interleaved RGB bytes; nodata pixels are black.
pub fn visualize(raster: &Raster, band: usize, min: f64, max: f64, palette: &Palette) -> Vec<u8> {
    let span = max - min;
    let mut rgb = Vec::with_capacity(raster.grid.len() * 3);
    for &v in &raster.bands[band].data {
        let px = if !v.is_finite() {
            [0, 0, 0]
        } else if span <= 0.0 {
            palette.at(0.0)
        } else {
            palette.at((v as f64 - min) / span)
        };
        rgb.extend_from_slice(&px);
    }
    rgb
}
