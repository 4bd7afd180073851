//! Values read by presentation. Presenters render these; they never reach into the session.

use std::fmt::Display;

use tracing::warn;

use crate::identity::Identity;
use crate::position::{Coordinate, Route, DEFAULT_CENTER};
use crate::session::{Condition, SessionState};

/// Snapshot of the tracking session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub state: SessionState,
    pub identity: Option<Identity>,
    pub position: Option<Coordinate>,
    pub condition: Option<Condition>,
}

impl SessionView {
    /// Where a map should be centered: the live position, else the default.
    pub fn center(&self) -> Coordinate {
        self.position.unwrap_or(DEFAULT_CENTER)
    }

    pub fn permission_denied(&self) -> bool {
        matches!(self.condition, Some(Condition::PermissionDenied))
    }
}

/// Reference route plus the "could not reach server" flag.
/// An empty route with the flag clear means no route is configured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteView {
    pub route: Route,
    pub fetch_failed: bool,
}

impl RouteView {
    /// Apply the outcome of a fetch. A failure clears the route and raises the flag
    /// until the next successful fetch.
    pub fn apply<E: Display>(&mut self, result: Result<Route, E>) {
        match result {
            Ok(route) => {
                self.route = route;
                self.fetch_failed = false;
            }
            Err(e) => {
                warn!(error = %e, "route fetch failed");
                self.route = Route::default();
                self.fetch_failed = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_falls_back_to_default() {
        let mut view = SessionView::default();
        assert_eq!(view.center(), DEFAULT_CENTER);
        let here = Coordinate::new(10.0, 20.0).unwrap();
        view.position = Some(here);
        assert_eq!(view.center(), here);
    }

    #[test]
    fn route_error_then_success_clears_flag() {
        let mut view = RouteView::default();
        view.apply::<&str>(Err("connection refused"));
        assert!(view.fetch_failed);
        assert!(view.route.is_empty());

        let route = Route::new(vec![Coordinate::new(1.0, 2.0).unwrap()]);
        view.apply::<&str>(Ok(route.clone()));
        assert!(!view.fetch_failed);
        assert_eq!(view.route, route);
    }

    #[test]
    fn empty_route_is_not_an_error() {
        let mut view = RouteView::default();
        view.apply::<&str>(Ok(Route::default()));
        assert!(!view.fetch_failed);
        assert!(view.route.is_empty());
    }
}
