//! GeoTIFF reading and writing via the pure-Rust `tiff` crate.
//!
//! Only the georeferencing the pipeline needs is handled: ModelPixelScale +
//! ModelTiepoint (north-up, no rotation), a geographic GeoKeyDirectory for
//! EPSG:4326, and the GDAL_NODATA ASCII tag. Files declaring any other CRS
//! are rejected on read.

use std::fs::File;
use std::io::{BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use crate::error::{Error, Result};
use crate::raster::{Band, Bounds, Grid, Raster};

/// Read band 0 of a GeoTIFF file as a single-band raster named `band_name`.
///
/// `nodata` overrides the file's GDAL_NODATA tag when given. Nodata cells
/// become NaN.
pub fn read_geotiff(path: &Path, band_name: &str, nodata: Option<f64>) -> Result<Raster> {
    if !path.exists() {
        return Err(Error::MissingAsset(path.to_path_buf()));
    }
    let file = File::open(path)?;
    decode(file, path, band_name, nodata)
}

/// Same as [`read_geotiff`] over an in-memory buffer (archive entries).
pub fn read_geotiff_bytes(buf: &[u8], origin: &Path, band_name: &str, nodata: Option<f64>) -> Result<Raster> {
    decode(Cursor::new(buf), origin, band_name, nodata)
}

/// Grid of a GeoTIFF file without decoding its pixels.
pub fn read_grid(path: &Path) -> Result<Grid> {
    if !path.exists() {
        return Err(Error::MissingAsset(path.to_path_buf()));
    }
    let mut decoder = Decoder::new(File::open(path)?)?;
    read_header(&mut decoder, path)
}

pub fn read_grid_bytes(buf: &[u8], origin: &Path) -> Result<Grid> {
    let mut decoder = Decoder::new(Cursor::new(buf))?;
    read_header(&mut decoder, origin)
}

fn read_header<R: Read + Seek>(decoder: &mut Decoder<R>, origin: &Path) -> Result<Grid> {
    check_crs(decoder, origin)?;
    let (width, height) = decoder.dimensions()?;
    let (cols, rows) = (width as usize, height as usize);
    let bounds = read_bounds(decoder, cols, rows).ok_or_else(|| Error::MissingGeoreference(origin.to_path_buf()))?;
    Ok(Grid::new(cols, rows, bounds))
}

fn decode<R: Read + Seek>(reader: R, origin: &Path, band_name: &str, nodata: Option<f64>) -> Result<Raster> {
    let mut decoder = Decoder::new(reader)?;
    let grid = read_header(&mut decoder, origin)?;

    let nodata = nodata.or_else(|| {
        decoder
            .get_tag_ascii_string(Tag::GdalNodata)
            .ok()
            .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok())
    });

    let data = match decoder.read_image()? {
        DecodingResult::F32(v) => first_sample(v, &grid, nodata, origin)?,
        DecodingResult::F64(v) => first_sample(v, &grid, nodata, origin)?,
        DecodingResult::U8(v) => first_sample(v, &grid, nodata, origin)?,
        DecodingResult::U16(v) => first_sample(v, &grid, nodata, origin)?,
        DecodingResult::U32(v) => first_sample(v, &grid, nodata, origin)?,
        DecodingResult::I8(v) => first_sample(v, &grid, nodata, origin)?,
        DecodingResult::I16(v) => first_sample(v, &grid, nodata, origin)?,
        DecodingResult::I32(v) => first_sample(v, &grid, nodata, origin)?,
        _ => return Err(Error::UnsupportedPixelType(origin.display().to_string())),
    };

    Raster::new(grid, vec![Band { name: band_name.to_string(), data }])
}

/// Multi-sample images decode interleaved; keep the first sample.
fn first_sample<T: Copy + Into<f64>>(raw: Vec<T>, grid: &Grid, nodata: Option<f64>, origin: &Path) -> Result<Vec<f32>> {
    let samples = raw.len() / grid.len().max(1);
    if samples == 0 {
        return Err(Error::GridMismatch(format!(
            "{}: {} values for {}x{} pixels",
            origin.display(),
            raw.len(),
            grid.width,
            grid.height
        )));
    }
    Ok(raw
        .into_iter()
        .step_by(samples)
        .map(|v| {
            let v: f64 = v.into();
            match nodata {
                Some(nd) if v == nd => f32::NAN,
                _ => v as f32,
            }
        })
        .collect())
}

const GT_MODEL_TYPE: u16 = 1024;
const MODEL_TYPE_PROJECTED: u16 = 1;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

/// Reject anything but geographic WGS84. Files without a GeoKeyDirectory are
/// taken as EPSG:4326.
fn check_crs<R: Read + Seek>(decoder: &mut Decoder<R>, origin: &Path) -> Result<()> {
    let Ok(keys) = decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag) else {
        return Ok(());
    };
    // Header [version, revision, minor, count], then count x [key, location, count, value].
    let key = |k: u16| {
        keys.get(4..)
            .unwrap_or_default()
            .chunks_exact(4)
            .find(|e| e[0] == k && e[1] == 0)
            .map(|e| e[3])
    };
    let unsupported = |what: String| Err(Error::UnsupportedCrs(format!("{what} in {}", origin.display())));
    if let Some(code) = key(PROJECTED_CS_TYPE) {
        return unsupported(format!("EPSG:{code}"));
    }
    if key(GT_MODEL_TYPE) == Some(MODEL_TYPE_PROJECTED) {
        return unsupported("projected model".into());
    }
    match key(GEOGRAPHIC_TYPE) {
        Some(code) if code != 4326 => unsupported(format!("EPSG:{code}")),
        _ => Ok(()),
    }
}

/// GeoKeyDirectory: version 1.1.0, geographic model, pixel-is-area, WGS84.
const GEO_KEYS_4326: [u16; 16] = [
    1, 1, 0, 3, //
    1024, 0, 1, 2, // GTModelTypeGeoKey = ModelTypeGeographic
    1025, 0, 1, 1, // GTRasterTypeGeoKey = RasterPixelIsArea
    2048, 0, 1, 4326, // GeographicTypeGeoKey = GCS_WGS_84
];

fn geo_tags(grid: &Grid) -> ([f64; 3], [f64; 6]) {
    (
        [grid.cell_width(), grid.cell_height(), 0.0],
        [0.0, 0.0, 0.0, grid.bounds.min_lon, grid.bounds.max_lat, 0.0],
    )
}

/// Write one band of `raster` as a Float32 GeoTIFF. NaN is the nodata value.
pub fn write_band_f32(raster: &Raster, band: usize, path: &Path) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    encode_f32(raster, band, &GEO_KEYS_4326, file)
}

fn encode_f32<W: Write + Seek>(raster: &Raster, band: usize, geo_keys: &[u16], writer: W) -> Result<()> {
    let grid = raster.grid;
    let (scale, tie) = geo_tags(&grid);
    let mut encoder = TiffEncoder::new(writer)?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(grid.width as u32, grid.height as u32)?;
    image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    image.encoder().write_tag(Tag::ModelTiepointTag, &tie[..])?;
    image.encoder().write_tag(Tag::GeoKeyDirectoryTag, geo_keys)?;
    image.encoder().write_tag(Tag::GdalNodata, "nan")?;
    image.write_data(&raster.bands[band].data)?;
    Ok(())
}

/// Write interleaved RGB8 pixels on `grid` as a GeoTIFF.
pub fn write_rgb8(grid: &Grid, rgb: &[u8], path: &Path) -> Result<()> {
    if rgb.len() != grid.len() * 3 {
        return Err(Error::GridMismatch(format!(
            "{} RGB bytes for a {}x{} grid",
            rgb.len(),
            grid.width,
            grid.height
        )));
    }
    let (scale, tie) = geo_tags(grid);
    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file)?;
    let mut image = encoder.new_image::<colortype::RGB8>(grid.width as u32, grid.height as u32)?;
    image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    image.encoder().write_tag(Tag::ModelTiepointTag, &tie[..])?;
    image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &GEO_KEYS_4326[..])?;
    image.write_data(rgb)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_round_trip_keeps_georeference_and_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ndvi.tif");
        let grid = Grid::new(3, 2, Bounds::new(36.0, 37.5, 2.0, 3.0));
        let data = vec![0.1, 0.2, f32::NAN, 0.4, 0.5, 0.6];
        let r = Raster::single(grid, "NDVI", data).unwrap();

        write_band_f32(&r, 0, &path).unwrap();
        let back = read_geotiff(&path, "NDVI", None).unwrap();

        assert_eq!(back.width(), 3);
        assert_eq!(back.height(), 2);
        assert!((back.grid.bounds.min_lon - 36.0).abs() < 1e-9);
        assert!((back.grid.bounds.max_lat - 3.0).abs() < 1e-9);
        assert!((back.grid.bounds.min_lat - 2.0).abs() < 1e-9);
        assert!(back.first()[2].is_nan());
        assert!((back.first()[4] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn projected_crs_is_rejected_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utm.tif");
        // UTM 37N metres: tiepoint (400000, 300000), 250 m pixels.
        let grid = Grid::new(2, 2, Bounds::new(400_000.0, 400_500.0, 299_500.0, 300_000.0));
        let r = Raster::single(grid, "NDVI", vec![0.5; 4]).unwrap();
        let keys: [u16; 16] = [1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, 32637];
        encode_f32(&r, 0, &keys, BufWriter::new(File::create(&path).unwrap())).unwrap();

        let err = read_geotiff(&path, "NDVI", None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCrs(ref crs) if crs.starts_with("EPSG:32637")), "{err}");
        assert!(matches!(read_grid(&path), Err(Error::UnsupportedCrs(_))));
    }

    #[test]
    fn non_wgs84_geographic_crs_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nad27.tif");
        let r = Raster::filled(Grid::new(2, 2, Bounds::new(36.0, 37.0, 2.0, 3.0)), "v", 1.0);
        let keys: [u16; 12] = [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 4267];
        encode_f32(&r, 0, &keys, BufWriter::new(File::create(&path).unwrap())).unwrap();
        assert!(matches!(read_geotiff(&path, "v", None), Err(Error::UnsupportedCrs(_))));
    }

    #[test]
    fn grid_is_read_without_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.tif");
        let grid = Grid::new(5, 3, Bounds::new(36.0, 37.0, 2.0, 2.6));
        write_band_f32(&Raster::filled(grid, "elevation", 900.0), 0, &path).unwrap();
        assert!(read_grid(&path).unwrap().same_as(&grid));
        let bytes = std::fs::read(&path).unwrap();
        assert!(read_grid_bytes(&bytes, &path).unwrap().same_as(&grid));
    }

    #[test]
    fn missing_file_is_a_missing_asset() {
        let err = read_geotiff(Path::new("/no/such/VCI_Export.tif"), "VCI", None).unwrap_err();
        assert!(matches!(err, Error::MissingAsset(_)));
    }

    #[test]
    fn rgb_length_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let grid = Grid::new(2, 2, Bounds::new(0.0, 1.0, 0.0, 1.0));
        let err = write_rgb8(&grid, &[0u8; 5], &dir.path().join("x.tif")).unwrap_err();
        assert!(matches!(err, Error::GridMismatch(_)));
    }
}
