//! Vehicle tracker core.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod identity;
pub mod location;
pub mod position;
pub mod session;
pub mod tracker;
pub mod view;
pub mod wire;

pub mod ffi;

pub use identity::{Identity, IdentityError, IdentityStore, MemoryStore, StoreError, IDENTITY_KEY};
pub use location::{LocationError, LocationProvider, Permission, PositionSink, WatchHandle};
pub use position::{Coordinate, CoordinateError, PositionSample, Route, RoutePoint, DEFAULT_CENTER};
pub use session::{Action, Attempt, Condition, SessionState, TrackingSession};
pub use tracker::Tracker;
pub use view::{RouteView, SessionView};
pub use wire::{decode_route, encode_report, PositionReport, RouteDecodeError};
