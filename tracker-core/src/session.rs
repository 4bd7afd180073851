//! Host-driven tracking session: the host passes events, the session returns actions.
//!
//! Every suspending request carries the [`Attempt`] it belongs to. A completion tagged
//! with an older attempt is ignored, and a watch handle that arrives for an older
//! attempt is cancelled immediately, so no subscription outlives its session.

use tracing::{debug, info, warn};

use crate::identity::Identity;
use crate::location::{LocationError, Permission, WatchHandle};
use crate::position::{Coordinate, PositionSample};
use crate::view::SessionView;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingPermission,
    Active,
    Stopped,
}

/// Token of one bind attempt. Hosts echo it back with each completion.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Attempt(u64);

impl Attempt {
    pub fn from_raw(id: u64) -> Self {
        Attempt(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Condition surfaced to presentation.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Terminal for the bind attempt that produced it.
    PermissionDenied,
    /// Transient; the watch (if any) stays up.
    LocationUnavailable(LocationError),
}

/// Work for the host to perform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    CheckPermission(Attempt),
    RequestPermission(Attempt),
    FetchInitialPosition(Attempt),
    StartWatch(Attempt),
    CancelWatch(WatchHandle),
    /// Fire-and-forget; the outcome is never fed back.
    Report(PositionSample),
}

/// Which completion the current attempt is waiting for.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Pending {
    PermissionCheck,
    PermissionRequest,
    InitialFix,
    Watch,
}

#[derive(Debug, Default)]
pub struct TrackingSession {
    state: SessionState,
    identity: Option<Identity>,
    attempt: u64,
    pending: Option<Pending>,
    watch: Option<WatchHandle>,
    position: Option<Coordinate>,
    condition: Option<Condition>,
}

impl TrackingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn position(&self) -> Option<Coordinate> {
        self.position
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    /// Handle of the live subscription, if one is held.
    pub fn watch(&self) -> Option<WatchHandle> {
        self.watch
    }

    pub fn attempt(&self) -> Attempt {
        Attempt(self.attempt)
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            identity: self.identity.clone(),
            position: self.position,
            condition: self.condition.clone(),
        }
    }

    /// Start tracking for `identity`. Rebinding the identity that is already
    /// awaiting permission or active is a no-op; any other bind first cancels
    /// the held watch.
    pub fn bind(&mut self, identity: Identity) -> Vec<Action> {
        let live = matches!(
            self.state,
            SessionState::AwaitingPermission | SessionState::Active
        );
        if live && self.identity.as_ref() == Some(&identity) {
            debug!(%identity, "bind ignored, already tracking");
            return vec![];
        }
        let mut actions = self.release();
        info!(%identity, attempt = self.attempt, "binding identity");
        self.identity = Some(identity);
        self.condition = None;
        self.transition(SessionState::AwaitingPermission);
        self.pending = Some(Pending::PermissionCheck);
        actions.push(Action::CheckPermission(self.attempt()));
        actions
    }

    pub fn on_permission_checked(&mut self, attempt: Attempt, status: Permission) -> Vec<Action> {
        if !self.expects(attempt, Pending::PermissionCheck) {
            return vec![];
        }
        if status.is_granted() {
            self.pending = Some(Pending::InitialFix);
            vec![Action::FetchInitialPosition(attempt)]
        } else {
            debug!(?status, "permission not granted, requesting");
            self.pending = Some(Pending::PermissionRequest);
            vec![Action::RequestPermission(attempt)]
        }
    }

    pub fn on_permission_requested(&mut self, attempt: Attempt, status: Permission) -> Vec<Action> {
        if !self.expects(attempt, Pending::PermissionRequest) {
            return vec![];
        }
        if status.is_granted() {
            self.pending = Some(Pending::InitialFix);
            return vec![Action::FetchInitialPosition(attempt)];
        }
        warn!("location permission denied");
        let actions = self.release();
        self.transition(SessionState::Stopped);
        self.condition = Some(Condition::PermissionDenied);
        actions
    }

    /// The initial fix is reported like any update. A failed fix is surfaced but
    /// the watch is still started.
    pub fn on_initial_position(
        &mut self,
        attempt: Attempt,
        result: Result<Coordinate, LocationError>,
    ) -> Vec<Action> {
        if !self.expects(attempt, Pending::InitialFix) {
            return vec![];
        }
        let mut actions = Vec::with_capacity(2);
        self.transition(SessionState::Active);
        actions.extend(self.accept_position(result));
        self.pending = Some(Pending::Watch);
        actions.push(Action::StartWatch(attempt));
        actions
    }

    pub fn on_watch_started(
        &mut self,
        attempt: Attempt,
        result: Result<WatchHandle, LocationError>,
    ) -> Vec<Action> {
        if !self.expects(attempt, Pending::Watch) {
            return match result {
                Ok(handle) => {
                    debug!(?handle, "stale watch, cancelling");
                    vec![Action::CancelWatch(handle)]
                }
                Err(_) => vec![],
            };
        }
        self.pending = None;
        match result {
            Ok(handle) => {
                debug!(?handle, "watch started");
                self.watch = Some(handle);
                vec![]
            }
            Err(e) => {
                warn!(error = %e, "could not start position watch");
                let actions = self.release();
                self.transition(SessionState::Stopped);
                self.condition = Some(Condition::LocationUnavailable(e));
                actions
            }
        }
    }

    /// Watch callback. Updates for another attempt, or outside Active, are dropped.
    pub fn on_position(
        &mut self,
        attempt: Attempt,
        result: Result<Coordinate, LocationError>,
    ) -> Vec<Action> {
        if attempt.0 != self.attempt || self.state != SessionState::Active {
            return vec![];
        }
        self.accept_position(result).into_iter().collect()
    }

    /// Stop tracking and release the identity. Cancels the held watch.
    pub fn stop(&mut self) -> Vec<Action> {
        match self.state {
            SessionState::Idle | SessionState::Stopped => vec![],
            SessionState::AwaitingPermission | SessionState::Active => {
                let actions = self.release();
                self.transition(SessionState::Stopped);
                actions
            }
        }
    }

    /// Stop, then return to Idle with no surfaced condition.
    pub fn reset(&mut self) -> Vec<Action> {
        let actions = self.stop();
        self.condition = None;
        self.transition(SessionState::Idle);
        actions
    }

    fn accept_position(&mut self, result: Result<Coordinate, LocationError>) -> Option<Action> {
        match result {
            Ok(coordinate) => {
                let identity = self.identity.clone()?;
                self.position = Some(coordinate);
                if matches!(self.condition, Some(Condition::LocationUnavailable(_))) {
                    self.condition = None;
                }
                Some(Action::Report(PositionSample::new(coordinate, identity)))
            }
            Err(e) => {
                warn!(error = %e, "position unavailable");
                self.condition = Some(Condition::LocationUnavailable(e));
                None
            }
        }
    }

    fn expects(&self, attempt: Attempt, pending: Pending) -> bool {
        attempt.0 == self.attempt && self.pending == Some(pending)
    }

    /// End the current attempt: forget the identity and cancel the watch.
    fn release(&mut self) -> Vec<Action> {
        self.attempt = self.attempt.wrapping_add(1);
        self.pending = None;
        self.identity = None;
        self.watch.take().map(Action::CancelWatch).into_iter().collect()
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            debug!(from = ?self.state, ?to, "session transition");
            self.state = to;
        }
    }
}
