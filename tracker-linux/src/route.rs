//! Reference route retrieval over HTTP.

use std::time::Duration;

use tracker_core::{decode_route, Route, RouteDecodeError};

/// Fetches the reference route. One GET per call; retry policy belongs to the caller.
#[derive(Clone)]
pub struct RouteClient {
    http: reqwest::Client,
    url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteFetchError {
    #[error("could not reach route server: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("route server returned status {0}")]
    Status(u16),
    #[error(transparent)]
    Decode(#[from] RouteDecodeError),
}

impl RouteClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// An empty array is a valid, empty route; every failure is an error, never a default.
    pub async fn fetch_route(&self) -> Result<Route, RouteFetchError> {
        let resp = self.http.get(&self.url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RouteFetchError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        Ok(decode_route(&body)?)
    }
}
