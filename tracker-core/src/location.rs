//! Location capability contract. Implemented by platform adapters and test mocks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::position::Coordinate;

/// Result of a permission query.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Permission {
    Granted,
    Denied,
    Undetermined,
}

impl Permission {
    pub fn is_granted(self) -> bool {
        self == Permission::Granted
    }
}

/// Opaque handle of a continuous position subscription.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct WatchHandle(pub u64);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocationError {
    #[error("position unavailable: {0}")]
    Unavailable(String),
    #[error("location timed out")]
    Timeout,
    #[error("location permission denied")]
    PermissionDenied,
}

/// Receives every update of a watch until it is cancelled.
pub type PositionSink = Arc<dyn Fn(Result<Coordinate, LocationError>) + Send + Sync>;

#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn check_permission(&self) -> Permission;

    /// Prompt for permission. Only `Granted` or `Denied` are meaningful here.
    async fn request_permission(&self) -> Permission;

    /// One-shot fix.
    async fn current_position(&self) -> Result<Coordinate, LocationError>;

    /// Start delivering updates to `sink`. The watch runs until `cancel_watch`.
    async fn watch_position(&self, sink: PositionSink) -> Result<WatchHandle, LocationError>;

    async fn cancel_watch(&self, handle: WatchHandle);
}

#[async_trait]
impl<L: LocationProvider + ?Sized> LocationProvider for Arc<L> {
    async fn check_permission(&self) -> Permission {
        (**self).check_permission().await
    }

    async fn request_permission(&self) -> Permission {
        (**self).request_permission().await
    }

    async fn current_position(&self) -> Result<Coordinate, LocationError> {
        (**self).current_position().await
    }

    async fn watch_position(&self, sink: PositionSink) -> Result<WatchHandle, LocationError> {
        (**self).watch_position(sink).await
    }

    async fn cancel_watch(&self, handle: WatchHandle) {
        (**self).cancel_watch(handle).await
    }
}
