//! Geographic values: coordinates, position samples, reference routes.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Map center used by presenters before the first fix arrives.
pub const DEFAULT_CENTER: Coordinate = Coordinate {
    lat: 38.5651931,
    lng: 68.7976046,
};

/// A validated (latitude, longitude) pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawCoordinate")]
pub struct Coordinate {
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct RawCoordinate {
    lat: f64,
    lng: f64,
}

impl TryFrom<RawCoordinate> for Coordinate {
    type Error = CoordinateError;

    fn try_from(raw: RawCoordinate) -> Result<Self, Self::Error> {
        Coordinate::new(raw.lat, raw.lng)
    }
}

impl Coordinate {
    /// Latitude must be in [-90, 90], longitude in [-180, 180], both finite.
    pub fn new(lat: f64, lng: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lng.is_finite() {
            return Err(CoordinateError::NotFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::Latitude(lat));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(CoordinateError::Longitude(lng));
        }
        Ok(Self { lat, lng })
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lng(&self) -> f64 {
        self.lng
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinateError {
    #[error("coordinate is not finite")]
    NotFinite,
    #[error("latitude {0} out of range")]
    Latitude(f64),
    #[error("longitude {0} out of range")]
    Longitude(f64),
}

/// One observed position, tagged with the identity bound when it was observed.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    pub coordinate: Coordinate,
    pub identity: Identity,
    pub observed_at: SystemTime,
}

impl PositionSample {
    pub fn new(coordinate: Coordinate, identity: Identity) -> Self {
        Self {
            coordinate,
            identity,
            observed_at: SystemTime::now(),
        }
    }
}

pub type RoutePoint = Coordinate;

/// Ordered reference route. Empty means "no route configured".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route(Vec<RoutePoint>);

impl Route {
    pub fn new(points: Vec<RoutePoint>) -> Self {
        Route(points)
    }

    pub fn points(&self) -> &[RoutePoint] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Start marker.
    pub fn start(&self) -> Option<&RoutePoint> {
        self.0.first()
    }

    /// End marker.
    pub fn end(&self) -> Option<&RoutePoint> {
        self.0.last()
    }
}
