//! Replay provider: plays a recorded `{lat, lng}` track back on a fixed interval, looping.
//! Useful for bench testing without a GPS receiver.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracker_core::{
    decode_route, Coordinate, LocationError, LocationProvider, Permission, PositionSink, Route,
    RouteDecodeError, WatchHandle,
};

use super::{host_permission, Watches};

pub struct ReplayProvider {
    track: Route,
    interval: Duration,
    allow: bool,
    watches: Watches,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay source selected but no replay_file configured")]
    NoFile,
    #[error("reading replay file: {0}")]
    Io(#[from] std::io::Error),
    #[error("replay file: {0}")]
    Decode(#[from] RouteDecodeError),
}

impl ReplayProvider {
    pub fn new(track: Route, interval: Duration, allow: bool) -> Self {
        Self {
            track,
            interval,
            allow,
            watches: Watches::default(),
        }
    }

    pub fn from_file(path: &Path, interval: Duration, allow: bool) -> Result<Self, ReplayError> {
        let bytes = std::fs::read(path)?;
        Ok(Self::new(decode_route(&bytes)?, interval, allow))
    }
}

#[async_trait]
impl LocationProvider for ReplayProvider {
    async fn check_permission(&self) -> Permission {
        host_permission(self.allow)
    }

    async fn request_permission(&self) -> Permission {
        host_permission(self.allow)
    }

    async fn current_position(&self) -> Result<Coordinate, LocationError> {
        self.track
            .start()
            .copied()
            .ok_or_else(|| LocationError::Unavailable("replay track is empty".into()))
    }

    /// First update one interval after the watch starts.
    async fn watch_position(&self, sink: PositionSink) -> Result<WatchHandle, LocationError> {
        if self.track.is_empty() {
            return Err(LocationError::Unavailable("replay track is empty".into()));
        }
        let points = self.track.points().to_vec();
        let interval = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            for p in points.iter().cycle() {
                ticker.tick().await;
                sink(Ok(*p));
            }
        });
        Ok(self.watches.insert(task))
    }

    async fn cancel_watch(&self, handle: WatchHandle) {
        self.watches.cancel(handle);
    }
}
