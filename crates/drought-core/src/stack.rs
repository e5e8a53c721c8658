//! Feature stacking.
//!
//! Band names are attached at the moment each layer is pushed, so the
//! position of a layer and its name cannot drift apart.

use crate::error::{Error, Result};
use crate::raster::{Band, Raster};

#[derive(Debug, Clone, Default)]
pub struct FeatureStack {
    layers: Vec<(String, Raster)>,
}

impl FeatureStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single-band layer under `name`.
    pub fn push(mut self, name: &str, layer: Raster) -> Result<Self> {
        if layer.bands.len() != 1 {
            return Err(Error::BandCountMismatch { bands: layer.bands.len(), names: 1 });
        }
        if let Some((_, first)) = self.layers.first() {
            if !first.grid.same_as(&layer.grid) {
                return Err(Error::GridMismatch(format!("layer {name} is not on the stack grid")));
            }
        }
        if self.layers.iter().any(|(n, _)| n == name) {
            return Err(Error::DuplicateBand(name.to_string()));
        }
        self.layers.push((name.to_string(), layer));
        Ok(self)
    }

    /// One multi-band raster, band i = layer i.
    pub fn build(self) -> Result<Raster> {
        let Some(grid) = self.layers.first().map(|(_, r)| r.grid) else {
            return Err(Error::BandCountMismatch { bands: 0, names: 0 });
        };
        let bands = self
            .layers
            .into_iter()
            .map(|(name, mut layer)| {
                let data = std::mem::take(&mut layer.bands[0].data);
                Band { name, data }
            })
            .collect();
        Raster::new(grid, bands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::STACK_BANDS;
    use crate::raster::{Bounds, Grid};

    fn layer(src: &str, v: f32) -> Raster {
        Raster::filled(Grid::new(3, 3, Bounds::new(0.0, 1.0, 0.0, 1.0)), src, v)
    }

    #[test]
    fn band_i_is_the_ith_pushed_layer() {
        let sources = [("downscaledVCI", 1.0), ("downscaledSPI", 2.0), ("downscaledTCI", 3.0), ("downscaledLULC", 4.0)];
        let stack = STACK_BANDS
            .iter()
            .zip(sources)
            .try_fold(FeatureStack::new(), |stack, (&name, (src, v))| stack.push(name, layer(src, v)))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(stack.band_names(), STACK_BANDS.to_vec());
        for (i, band) in stack.bands.iter().enumerate() {
            assert!(band.data.iter().all(|&v| v == (i + 1) as f32));
        }
    }

    #[test]
    fn renaming_a_plain_stack_maps_positionally() {
        let plain = layer("a", 1.0).add_bands(&layer("b", 2.0)).unwrap().add_bands(&layer("c", 3.0)).unwrap();
        let renamed = plain.rename(&["VCI", "SPI", "TCI"]).unwrap();
        assert_eq!(renamed.band("SPI").unwrap().data[0], 2.0);
        assert!(plain.rename(&STACK_BANDS).is_err());
    }

    #[test]
    fn rejects_duplicates_and_foreign_grids() {
        let s = FeatureStack::new().push("VCI", layer("x", 1.0)).unwrap();
        assert!(matches!(s.clone().push("VCI", layer("y", 1.0)), Err(Error::DuplicateBand(_))));
        let other = Raster::filled(Grid::new(2, 2, Bounds::new(0.0, 1.0, 0.0, 1.0)), "z", 0.0);
        assert!(matches!(s.push("SPI", other), Err(Error::GridMismatch(_))));
    }

    #[test]
    fn empty_stack_cannot_build() {
        assert!(FeatureStack::new().build().is_err());
    }
}
