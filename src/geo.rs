//! Geographic extent of a download.

use std::{fmt, str::FromStr};

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde::Deserialize;

use crate::error::{DownloadError, Result};

/// A rectangular region in geographic (EPSG:4326) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawBoundingBox")]
pub struct BoundingBox {
    lat_min: f64,
    lat_max: f64,
    lon_min: f64,
    lon_max: f64,
}

#[derive(Deserialize)]
struct RawBoundingBox {
    lat_min: f64,
    lat_max: f64,
    lon_min: f64,
    lon_max: f64,
}

impl TryFrom<RawBoundingBox> for BoundingBox {
    type Error = DownloadError;

    fn try_from(raw: RawBoundingBox) -> Result<Self> {
        BoundingBox::new(raw.lat_min, raw.lat_max, raw.lon_min, raw.lon_max)
    }
}

impl BoundingBox {
    pub fn new(lat_min: f64, lat_max: f64, lon_min: f64, lon_max: f64) -> Result<Self> {
        if !(lat_min < lat_max) {
            return Err(DownloadError::InvalidBoundingBox(format!(
                "lat_min {} must be below lat_max {}",
                lat_min, lat_max
            )));
        }
        if !(lon_min < lon_max) {
            return Err(DownloadError::InvalidBoundingBox(format!(
                "lon_min {} must be below lon_max {}",
                lon_min, lon_max
            )));
        }
        if lat_min < -90.0 || lat_max > 90.0 {
            return Err(DownloadError::InvalidBoundingBox(format!(
                "latitudes {}..{} outside [-90, 90]",
                lat_min, lat_max
            )));
        }
        if lon_min < -180.0 || lon_max > 180.0 {
            return Err(DownloadError::InvalidBoundingBox(format!(
                "longitudes {}..{} outside [-180, 180]",
                lon_min, lon_max
            )));
        }

        Ok(BoundingBox {
            lat_min,
            lat_max,
            lon_min,
            lon_max,
        })
    }

    /// Closed ring of `[lon, lat]` positions, walking the four corners.
    pub fn ring(&self) -> Vec<Vec<f64>> {
        vec![
            vec![self.lon_min, self.lat_min],
            vec![self.lon_min, self.lat_max],
            vec![self.lon_max, self.lat_max],
            vec![self.lon_max, self.lat_min],
            vec![self.lon_min, self.lat_min],
        ]
    }

    /// Single-polygon feature collection, as accepted by AppEEARS area tasks.
    pub fn to_feature_collection(&self) -> FeatureCollection {
        let geometry = Geometry::new(Value::Polygon(vec![self.ring()]));

        let feature = Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: Some(JsonObject::new()),
            foreign_members: None,
        };

        FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        }
    }

    /// CDS `area` ordering: north, west, south, east.
    pub fn to_cds_area(&self) -> [f64; 4] {
        [self.lat_max, self.lon_min, self.lat_min, self.lon_max]
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lat {}..{} lon {}..{}",
            self.lat_min, self.lat_max, self.lon_min, self.lon_max
        )
    }
}

/// Parses `lat_min,lat_max,lon_min,lon_max`.
impl FromStr for BoundingBox {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DownloadError::InvalidBoundingBox(format!("`{}`: {}", s, e)))?;

        match values.as_slice() {
            [lat_min, lat_max, lon_min, lon_max] => {
                BoundingBox::new(*lat_min, *lat_max, *lon_min, *lon_max)
            }
            _ => Err(DownloadError::InvalidBoundingBox(format!(
                "expected 4 comma separated values, got `{}`",
                s
            ))),
        }
    }
}

// -- Tests -------------------------------------------------------------------
