//! Coordinates and bounding boxes for pinalbum.
//!
//! This module validates latitude/longitude pairs and builds the rectangular
//! search region that scopes a photo search around a pin. Boxes are clamped
//! to the valid coordinate ranges, so a pin near a pole or the antimeridian
//! produces a smaller box rather than an invalid one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Valid latitude range in degrees
pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
/// Valid longitude range in degrees
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

/// Two coordinates closer than this on both axes name the same pin
pub const COORDINATE_EPSILON: f64 = 1e-6;

/// A validated point on the map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate, rejecting values outside the valid ranges
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, String> {
        if !latitude.is_finite() || latitude < LATITUDE_RANGE.0 || latitude > LATITUDE_RANGE.1 {
            return Err(format!("latitude {latitude} is outside -90..90"));
        }
        if !longitude.is_finite()
            || longitude < LONGITUDE_RANGE.0
            || longitude > LONGITUDE_RANGE.1
        {
            return Err(format!("longitude {longitude} is outside -180..180"));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Whether two coordinates name the same pin
    pub fn approx_eq(&self, other: &Coordinate) -> bool {
        (self.latitude - other.latitude).abs() < COORDINATE_EPSILON
            && (self.longitude - other.longitude).abs() < COORDINATE_EPSILON
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// A rectangular search region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_longitude: f64,
    pub min_latitude: f64,
    pub max_longitude: f64,
    pub max_latitude: f64,
}

impl BoundingBox {
    /// Builds a box around `center`, clamped to the valid ranges.
    ///
    /// `half_width` expands latitude and `half_height` expands longitude,
    /// matching the photo API's historical naming.
    pub fn around(center: Coordinate, half_width: f64, half_height: f64) -> Self {
        Self {
            min_longitude: (center.longitude - half_height).max(LONGITUDE_RANGE.0),
            min_latitude: (center.latitude - half_width).max(LATITUDE_RANGE.0),
            max_longitude: (center.longitude + half_height).min(LONGITUDE_RANGE.1),
            max_latitude: (center.latitude + half_width).min(LATITUDE_RANGE.1),
        }
    }

    /// Serializes the box the way the search API expects it
    pub fn to_query_value(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_longitude, self.min_latitude, self.max_longitude, self.max_latitude
        )
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_query_value())
    }
}
