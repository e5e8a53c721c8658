//! Study-region boundary loaded from GeoJSON.
//!
//! Accepts a bare `Polygon` / `MultiPolygon` geometry, a `Feature` wrapping
//! one, or a `FeatureCollection` whose polygonal features are unioned.
//! Coordinates are lon/lat degrees (EPSG:4326).

use std::fs;
use std::path::Path;

use geo::{BoundingRect, Contains, Coord, LineString, MultiPolygon, Point, Polygon, Rect};
use geojson::{GeoJson, Geometry, PolygonType, Value};

use crate::error::{Error, Result};
use crate::raster::Bounds;

#[derive(Debug, Clone)]
pub struct Region {
    pub name: String,
    shape: MultiPolygon<f64>,
    bbox: Bounds,
}

impl Region {
    /// Axis-aligned rectangle.
    pub fn rectangle(name: &str, bounds: Bounds) -> Self {
        let rect = Rect::new(
            Coord { x: bounds.min_lon, y: bounds.min_lat },
            Coord { x: bounds.max_lon, y: bounds.max_lat },
        );
        Self { name: name.to_string(), shape: MultiPolygon::new(vec![rect.to_polygon()]), bbox: bounds }
    }

    fn from_shape(name: &str, shape: MultiPolygon<f64>) -> Result<Self> {
        let rect = shape
            .bounding_rect()
            .ok_or_else(|| Error::InvalidGeometry(format!("region {name} has no coordinates")))?;
        let bbox = Bounds::new(rect.min().x, rect.max().x, rect.min().y, rect.max().y);
        if bbox.max_lon <= bbox.min_lon || bbox.max_lat <= bbox.min_lat {
            return Err(Error::InvalidGeometry(format!("region {name} has zero area")));
        }
        Ok(Self { name: name.to_string(), shape, bbox })
    }

    /// Load a region from a GeoJSON file; the file stem becomes its name.
    pub fn from_geojson_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingAsset(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("region");
        Self::from_geojson_str(name, &text)
    }

    pub fn from_geojson_str(name: &str, text: &str) -> Result<Self> {
        let geojson: GeoJson = text.parse()?;
        let mut polygons = Vec::new();
        match geojson {
            GeoJson::FeatureCollection(fc) => {
                for geometry in fc.features.into_iter().filter_map(|f| f.geometry) {
                    collect_polygons(geometry, &mut polygons)?;
                }
            }
            GeoJson::Feature(f) => {
                if let Some(geometry) = f.geometry {
                    collect_polygons(geometry, &mut polygons)?;
                }
            }
            GeoJson::Geometry(geometry) => collect_polygons(geometry, &mut polygons)?,
        }
        if polygons.is_empty() {
            return Err(Error::InvalidGeometry(format!("no polygon geometry in {name}")));
        }
        Self::from_shape(name, MultiPolygon::new(polygons))
    }

    /// True when (lon, lat) lies in the interior of the region; holes excluded.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.bbox.contains(lon, lat) && self.shape.contains(&Point::new(lon, lat))
    }

    pub fn bbox(&self) -> Bounds {
        self.bbox
    }
}

fn collect_polygons(geometry: Geometry, out: &mut Vec<Polygon<f64>>) -> Result<()> {
    match geometry.value {
        Value::Polygon(rings) => out.push(to_polygon(&rings)?),
        Value::MultiPolygon(parts) => {
            for rings in &parts {
                out.push(to_polygon(rings)?);
            }
        }
        Value::GeometryCollection(members) => {
            for member in members {
                collect_polygons(member, out)?;
            }
        }
        // Points and lines carry no area.
        Value::Point(_) | Value::MultiPoint(_) | Value::LineString(_) | Value::MultiLineString(_) => {}
    }
    Ok(())
}

fn to_polygon(rings: &PolygonType) -> Result<Polygon<f64>> {
    let mut lines = Vec::with_capacity(rings.len());
    for ring in rings {
        if ring.len() < 4 {
            return Err(Error::InvalidGeometry(format!("ring with {} positions", ring.len())));
        }
        let coords = ring
            .iter()
            .map(|pos| match pos.as_slice() {
                [lon, lat, ..] => Ok(Coord { x: *lon, y: *lat }),
                _ => Err(Error::InvalidGeometry(format!("bad position {pos:?}"))),
            })
            .collect::<Result<Vec<_>>>()?;
        lines.push(LineString::new(coords));
    }
    let mut lines = lines.into_iter();
    let exterior = lines.next().ok_or_else(|| Error::InvalidGeometry("polygon without rings".into()))?;
    Ok(Polygon::new(exterior, lines.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE_WITH_HOLE: &str = r#"{
        "type": "Feature",
        "properties": {"name": "test"},
        "geometry": {
            "type": "Polygon",
            "coordinates": [
                [[0,0],[10,0],[10,10],[0,10],[0,0]],
                [[4,4],[6,4],[6,6],[4,6],[4,4]]
            ]
        }
    }"#;

    #[test]
    fn polygon_with_hole() {
        let r = Region::from_geojson_str("t", SQUARE_WITH_HOLE).unwrap();
        assert!(r.contains(1.0, 1.0));
        assert!(!r.contains(5.0, 5.0), "hole must be excluded");
        assert!(!r.contains(11.0, 5.0));
        assert_eq!(r.bbox(), Bounds::new(0.0, 10.0, 0.0, 10.0));
    }

    #[test]
    fn feature_collection_unions_polygons() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{},"geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
            {"type":"Feature","properties":{},"geometry":{"type":"MultiPolygon","coordinates":[[[[5,5],[6,5],[6,6],[5,6],[5,5]]]]}}
        ]}"#;
        let r = Region::from_geojson_str("fc", text).unwrap();
        assert!(r.contains(0.5, 0.5));
        assert!(r.contains(5.5, 5.5));
        assert!(!r.contains(3.0, 3.0));
        assert_eq!(r.bbox(), Bounds::new(0.0, 6.0, 0.0, 6.0));
    }

    #[test]
    fn concave_boundary_excludes_the_notch() {
        // U shape open to the north.
        let text = r#"{"type":"Polygon","coordinates":[[[0,0],[3,0],[3,3],[2,3],[2,1],[1,1],[1,3],[0,3],[0,0]]]}"#;
        let r = Region::from_geojson_str("u", text).unwrap();
        assert!(r.contains(0.5, 2.5));
        assert!(r.contains(2.5, 2.5));
        assert!(!r.contains(1.5, 2.0));
    }

    #[test]
    fn point_only_input_is_rejected() {
        let text = r#"{"type":"Point","coordinates":[1,2]}"#;
        assert!(matches!(Region::from_geojson_str("p", text), Err(Error::InvalidGeometry(_))));
    }

    #[test]
    fn malformed_geojson_is_an_error() {
        assert!(matches!(Region::from_geojson_str("x", r#"{"type":"Blob"}"#), Err(Error::GeoJson(_))));
    }

    #[test]
    fn missing_file_is_a_missing_asset() {
        let err = Region::from_geojson_file(Path::new("/nonexistent/marsabit.geojson")).unwrap_err();
        assert!(matches!(err, Error::MissingAsset(_)));
    }
}
