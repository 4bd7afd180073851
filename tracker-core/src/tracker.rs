//! Identity binding: ties the persisted identity to the tracking session.

use tracing::{info, warn};

use crate::identity::{Identity, IdentityError, IdentityStore, IDENTITY_KEY};
use crate::session::{Action, TrackingSession};

/// Owns the session and the identity store. Hosts feed session events through
/// [`Tracker::session_mut`] and identity input through the methods here.
pub struct Tracker<S: IdentityStore> {
    session: TrackingSession,
    store: S,
}

impl<S: IdentityStore> Tracker<S> {
    pub fn new(store: S) -> Self {
        Self {
            session: TrackingSession::new(),
            store,
        }
    }

    /// On startup: bind the persisted identity if there is one, else stay Idle.
    /// A blank value left in the store is treated as absent.
    pub fn launch(&mut self) -> Result<Vec<Action>, IdentityError> {
        let Some(saved) = self.store.get(IDENTITY_KEY)? else {
            info!("no saved identity");
            return Ok(vec![]);
        };
        match Identity::parse(&saved) {
            Ok(identity) => Ok(self.session.bind(identity)),
            Err(_) => {
                warn!("ignoring blank saved identity");
                Ok(vec![])
            }
        }
    }

    /// Persist then bind. Blank input is rejected before the store is touched.
    pub fn set_identity(&mut self, value: &str) -> Result<Vec<Action>, IdentityError> {
        let identity = Identity::parse(value)?;
        self.store.set(IDENTITY_KEY, identity.as_str())?;
        Ok(self.session.bind(identity))
    }

    /// Stop the session and return to Idle, then delete the persisted identity.
    /// The returned actions (the watch cancel) must run even when the delete failed.
    #[must_use]
    pub fn clear_identity(&mut self) -> (Vec<Action>, Result<(), IdentityError>) {
        let actions = self.session.reset();
        match self.store.delete(IDENTITY_KEY) {
            Ok(()) => {
                info!("identity cleared");
                (actions, Ok(()))
            }
            Err(e) => {
                warn!(error = %e, "session stopped but saved identity could not be deleted");
                (actions, Err(e.into()))
            }
        }
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut TrackingSession {
        &mut self.session
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
