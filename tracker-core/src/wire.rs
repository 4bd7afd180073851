//! JSON wire formats for the route endpoint and the position collector.

use serde::{Deserialize, Serialize};

use crate::position::{Coordinate, PositionSample, Route};

/// Body of a position report: `{vehicle_id, lat, lng}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub vehicle_id: String,
    pub lat: f64,
    pub lng: f64,
}

impl From<&PositionSample> for PositionReport {
    fn from(sample: &PositionSample) -> Self {
        Self {
            vehicle_id: sample.identity.as_str().to_string(),
            lat: sample.coordinate.lat(),
            lng: sample.coordinate.lng(),
        }
    }
}

/// Encode a sample as the POST body the collector expects.
pub fn encode_report(sample: &PositionSample) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&PositionReport::from(sample))
}

/// Decode a route response: a JSON array of `{lat, lng}` objects, order preserved.
/// Extra fields on a point are ignored; a point out of range fails the whole route.
pub fn decode_route(bytes: &[u8]) -> Result<Route, RouteDecodeError> {
    let points: Vec<Coordinate> = serde_json::from_slice(bytes)?;
    Ok(Route::new(points))
}

#[derive(Debug, thiserror::Error)]
pub enum RouteDecodeError {
    #[error("invalid route body: {0}")]
    Json(#[from] serde_json::Error),
}
