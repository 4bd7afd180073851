//! Event loop that executes tracker actions against the platform collaborators.
//!
//! Events are handled one at a time. Every suspending call (permission, fix, watch
//! start, route fetch) runs on its own task and posts its completion back as an event.
//! Watch cancellation is awaited inline, so it completes before any later action runs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use tracker_core::{
    Action, Attempt, Coordinate, IdentityError, IdentityStore, LocationError, LocationProvider,
    Permission, PositionSink, Route, RouteView, SessionView, Tracker, WatchHandle,
};

use crate::reporter::Reporter;
use crate::route::{RouteClient, RouteFetchError};

/// Optional bounds on the two open-ended platform waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeouts {
    /// Elapsed counts as denied.
    pub permission: Option<Duration>,
    /// Elapsed counts as unavailable.
    pub initial_fix: Option<Duration>,
}

enum Event {
    PermissionChecked(Attempt, Permission),
    PermissionRequested(Attempt, Permission),
    InitialPosition(Attempt, Result<Coordinate, LocationError>),
    WatchStarted(Attempt, Result<WatchHandle, LocationError>),
    Position(Attempt, Result<Coordinate, LocationError>),
    RouteFetched(Result<Route, RouteFetchError>),
    SetIdentity(String, oneshot::Sender<Result<(), IdentityError>>),
    ClearIdentity(oneshot::Sender<Result<(), IdentityError>>),
    RefetchRoute,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent is not running")]
    Closed,
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// Presentation-side handle: commands in, observable views out.
#[derive(Clone)]
pub struct AgentHandle {
    events: mpsc::UnboundedSender<Event>,
    session: watch::Receiver<SessionView>,
    route: watch::Receiver<RouteView>,
}

impl AgentHandle {
    pub async fn set_identity(&self, value: &str) -> Result<(), AgentError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(Event::SetIdentity(value.to_string(), tx))
            .map_err(|_| AgentError::Closed)?;
        Ok(rx.await.map_err(|_| AgentError::Closed)??)
    }

    pub async fn clear_identity(&self) -> Result<(), AgentError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(Event::ClearIdentity(tx))
            .map_err(|_| AgentError::Closed)?;
        Ok(rx.await.map_err(|_| AgentError::Closed)??)
    }

    /// Manual retry of the route fetch.
    pub fn refetch_route(&self) -> Result<(), AgentError> {
        self.events
            .send(Event::RefetchRoute)
            .map_err(|_| AgentError::Closed)
    }

    /// Stop the session (cancelling the watch) and end the loop.
    pub fn shutdown(&self) {
        let _ = self.events.send(Event::Shutdown);
    }

    pub fn session(&self) -> watch::Receiver<SessionView> {
        self.session.clone()
    }

    pub fn route(&self) -> watch::Receiver<RouteView> {
        self.route.clone()
    }
}

pub struct Agent<S: IdentityStore> {
    tracker: Tracker<S>,
    location: Arc<dyn LocationProvider>,
    reporter: Arc<dyn Reporter>,
    routes: Option<RouteClient>,
    timeouts: Timeouts,
    route_view: RouteView,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    session_tx: watch::Sender<SessionView>,
    route_tx: watch::Sender<RouteView>,
}

impl<S: IdentityStore + Send + 'static> Agent<S> {
    pub fn new(
        tracker: Tracker<S>,
        location: Arc<dyn LocationProvider>,
        reporter: Arc<dyn Reporter>,
        routes: Option<RouteClient>,
        timeouts: Timeouts,
    ) -> (Self, AgentHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = watch::channel(tracker.session().view());
        let (route_tx, route_rx) = watch::channel(RouteView::default());
        let handle = AgentHandle {
            events: events_tx.clone(),
            session: session_rx,
            route: route_rx,
        };
        let agent = Self {
            tracker,
            location,
            reporter,
            routes,
            timeouts,
            route_view: RouteView::default(),
            events_tx,
            events_rx,
            session_tx,
            route_tx,
        };
        (agent, handle)
    }

    /// Launch the saved identity, fetch the route once, then handle events until shutdown.
    pub async fn run(mut self) {
        match self.tracker.launch() {
            Ok(actions) => self.execute(actions).await,
            Err(e) => warn!(error = %e, "could not read saved identity"),
        }
        self.fetch_route();
        self.publish();

        while let Some(event) = self.events_rx.recv().await {
            if let Event::Shutdown = event {
                let actions = self.tracker.session_mut().stop();
                self.execute(actions).await;
                self.publish();
                debug!("agent stopped");
                return;
            }
            self.handle(event).await;
            self.publish();
        }
    }

    async fn handle(&mut self, event: Event) {
        let actions = match event {
            Event::PermissionChecked(at, p) => self.tracker.session_mut().on_permission_checked(at, p),
            Event::PermissionRequested(at, p) => {
                self.tracker.session_mut().on_permission_requested(at, p)
            }
            Event::InitialPosition(at, r) => self.tracker.session_mut().on_initial_position(at, r),
            Event::WatchStarted(at, r) => self.tracker.session_mut().on_watch_started(at, r),
            Event::Position(at, r) => self.tracker.session_mut().on_position(at, r),
            Event::RouteFetched(r) => {
                self.route_view.apply(r);
                vec![]
            }
            Event::SetIdentity(value, reply) => {
                let (actions, result) = split(self.tracker.set_identity(&value));
                let _ = reply.send(result);
                actions
            }
            Event::ClearIdentity(reply) => {
                let (actions, result) = self.tracker.clear_identity();
                let _ = reply.send(result);
                actions
            }
            Event::RefetchRoute => {
                self.fetch_route();
                vec![]
            }
            Event::Shutdown => vec![],
        };
        self.execute(actions).await;
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::CheckPermission(at) => {
                    let location = self.location.clone();
                    self.spawn(async move {
                        Event::PermissionChecked(at, location.check_permission().await)
                    });
                }
                Action::RequestPermission(at) => {
                    let location = self.location.clone();
                    let limit = self.timeouts.permission;
                    self.spawn(async move {
                        let status = match limit {
                            Some(d) => tokio::time::timeout(d, location.request_permission())
                                .await
                                .unwrap_or_else(|_| {
                                    warn!("permission request timed out, treating as denied");
                                    Permission::Denied
                                }),
                            None => location.request_permission().await,
                        };
                        Event::PermissionRequested(at, status)
                    });
                }
                Action::FetchInitialPosition(at) => {
                    let location = self.location.clone();
                    let limit = self.timeouts.initial_fix;
                    self.spawn(async move {
                        let fix = match limit {
                            Some(d) => tokio::time::timeout(d, location.current_position())
                                .await
                                .unwrap_or(Err(LocationError::Timeout)),
                            None => location.current_position().await,
                        };
                        Event::InitialPosition(at, fix)
                    });
                }
                Action::StartWatch(at) => {
                    let location = self.location.clone();
                    let updates = self.events_tx.clone();
                    self.spawn(async move {
                        let sink: PositionSink = Arc::new(move |r: Result<Coordinate, LocationError>| {
                            let _ = updates.send(Event::Position(at, r));
                        });
                        Event::WatchStarted(at, location.watch_position(sink).await)
                    });
                }
                Action::CancelWatch(handle) => {
                    debug!(?handle, "cancelling watch");
                    self.location.cancel_watch(handle).await;
                }
                Action::Report(sample) => self.reporter.report(sample),
            }
        }
    }

    fn spawn<F>(&self, work: F)
    where
        F: std::future::Future<Output = Event> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(work.await);
        });
    }

    fn fetch_route(&self) {
        let Some(client) = self.routes.clone() else {
            return;
        };
        self.spawn(async move { Event::RouteFetched(client.fetch_route().await) });
    }

    fn publish(&self) {
        let view = self.tracker.session().view();
        self.session_tx.send_if_modified(|current| {
            if *current != view {
                *current = view;
                true
            } else {
                false
            }
        });
        let route = self.route_view.clone();
        self.route_tx.send_if_modified(|current| {
            if *current != route {
                *current = route;
                true
            } else {
                false
            }
        });
    }
}

fn split(result: Result<Vec<Action>, IdentityError>) -> (Vec<Action>, Result<(), IdentityError>) {
    match result {
        Ok(actions) => (actions, Ok(())),
        Err(e) => (vec![], Err(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_stub::{self, Reply};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tracker_core::{
        Condition, MemoryStore, PositionSample, SessionState, StoreError, IDENTITY_KEY,
    };

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Check,
        Request,
        Current,
        Watch(u64),
        Cancel(u64),
    }

    /// Scripted location provider that records every call in order.
    struct MockLocation {
        check: Permission,
        request: Permission,
        fix: Result<Coordinate, LocationError>,
        hang_request: bool,
        calls: Mutex<Vec<Call>>,
        sinks: Mutex<HashMap<u64, PositionSink>>,
        next: Mutex<u64>,
    }

    impl MockLocation {
        fn new(check: Permission, request: Permission) -> Self {
            Self {
                check,
                request,
                fix: Ok(Coordinate::new(38.5651931, 68.7976046).unwrap()),
                hang_request: false,
                calls: Mutex::new(Vec::new()),
                sinks: Mutex::new(HashMap::new()),
                next: Mutex::new(0),
            }
        }

        fn granted() -> Arc<Self> {
            Arc::new(Self::new(Permission::Granted, Permission::Granted))
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn watch_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| matches!(c, Call::Watch(_)))
                .count()
        }

        fn live_watches(&self) -> usize {
            self.sinks.lock().unwrap().len()
        }

        /// Deliver an update to every live watch.
        fn emit(&self, lat: f64, lng: f64) {
            let sinks: Vec<PositionSink> = self.sinks.lock().unwrap().values().cloned().collect();
            for sink in sinks {
                sink(Ok(Coordinate::new(lat, lng).unwrap()));
            }
        }
    }

    #[async_trait]
    impl LocationProvider for MockLocation {
        async fn check_permission(&self) -> Permission {
            self.calls.lock().unwrap().push(Call::Check);
            self.check
        }

        async fn request_permission(&self) -> Permission {
            self.calls.lock().unwrap().push(Call::Request);
            if self.hang_request {
                std::future::pending::<()>().await;
            }
            self.request
        }

        async fn current_position(&self) -> Result<Coordinate, LocationError> {
            self.calls.lock().unwrap().push(Call::Current);
            self.fix.clone()
        }

        async fn watch_position(&self, sink: PositionSink) -> Result<WatchHandle, LocationError> {
            let id = {
                let mut next = self.next.lock().unwrap();
                *next += 1;
                *next
            };
            self.calls.lock().unwrap().push(Call::Watch(id));
            self.sinks.lock().unwrap().insert(id, sink);
            Ok(WatchHandle(id))
        }

        async fn cancel_watch(&self, handle: WatchHandle) {
            self.calls.lock().unwrap().push(Call::Cancel(handle.0));
            self.sinks.lock().unwrap().remove(&handle.0);
        }
    }

    #[derive(Default)]
    struct MockReporter {
        sent: Mutex<Vec<PositionSample>>,
    }

    impl MockReporter {
        fn sent(&self) -> Vec<(String, f64)> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|s| (s.identity.to_string(), s.coordinate.lat()))
                .collect()
        }
    }

    impl Reporter for MockReporter {
        fn report(&self, sample: PositionSample) {
            self.sent.lock().unwrap().push(sample);
        }
    }

    /// Store shared with the test so its contents can be inspected after the agent owns it.
    #[derive(Clone, Default)]
    struct SharedStore(Arc<Mutex<MemoryStore>>);

    impl SharedStore {
        fn with(value: &str) -> Self {
            let store = Self::default();
            store.0.lock().unwrap().set(IDENTITY_KEY, value).unwrap();
            store
        }

        fn saved(&self) -> Option<String> {
            self.0.lock().unwrap().get(IDENTITY_KEY).unwrap()
        }
    }

    impl IdentityStore for SharedStore {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.lock().unwrap().get(key)
        }
        fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
            self.0.lock().unwrap().set(key, value)
        }
        fn delete(&mut self, key: &str) -> Result<(), StoreError> {
            self.0.lock().unwrap().delete(key)
        }
    }

    struct Harness {
        handle: AgentHandle,
        location: Arc<MockLocation>,
        reporter: Arc<MockReporter>,
        store: SharedStore,
    }

    fn start(
        store: SharedStore,
        location: Arc<MockLocation>,
        routes: Option<RouteClient>,
        timeouts: Timeouts,
    ) -> Harness {
        let reporter = Arc::new(MockReporter::default());
        let (agent, handle) = Agent::new(
            Tracker::new(store.clone()),
            location.clone(),
            reporter.clone(),
            routes,
            timeouts,
        );
        tokio::spawn(agent.run());
        Harness {
            handle,
            location,
            reporter,
            store,
        }
    }

    async fn wait_state(h: &AgentHandle, state: SessionState) -> SessionView {
        let mut rx = h.session();
        let view = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| v.state == state))
            .await
            .expect("timed out waiting for state")
            .expect("agent gone");
        view.clone()
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn fresh_launch_identity_then_active() {
        let h = start(SharedStore::default(), MockLocation::granted(), None, Timeouts::default());
        assert_eq!(h.handle.session().borrow().state, SessionState::Idle);

        h.handle.set_identity("TRUCK-7").await.unwrap();
        assert_eq!(h.store.saved().as_deref(), Some("TRUCK-7"));

        let view = wait_state(&h.handle, SessionState::Active).await;
        assert_eq!(view.identity.as_ref().map(|i| i.as_str()), Some("TRUCK-7"));
        assert!(view.position.is_some());
        wait_until(|| h.location.watch_count() == 1).await;
        assert_eq!(h.reporter.sent(), vec![("TRUCK-7".to_string(), 38.5651931)]);
    }

    #[tokio::test]
    async fn saved_identity_denied_permission() {
        let location = Arc::new(MockLocation::new(Permission::Denied, Permission::Denied));
        let h = start(SharedStore::with("TRUCK-7"), location, None, Timeouts::default());

        let view = wait_state(&h.handle, SessionState::Stopped).await;
        assert_eq!(view.condition, Some(Condition::PermissionDenied));
        assert_eq!(h.location.calls(), vec![Call::Check, Call::Request]);
        assert_eq!(h.location.watch_count(), 0);
        assert!(h.reporter.sent().is_empty());
    }

    #[tokio::test]
    async fn rebind_cancels_before_new_watch() {
        let h = start(SharedStore::default(), MockLocation::granted(), None, Timeouts::default());
        h.handle.set_identity("A").await.unwrap();
        wait_until(|| h.location.watch_count() == 1).await;

        h.handle.set_identity("B").await.unwrap();
        wait_until(|| h.location.watch_count() == 2).await;

        let calls = h.location.calls();
        let cancel_a = calls.iter().position(|c| *c == Call::Cancel(1)).unwrap();
        let watch_b = calls.iter().position(|c| *c == Call::Watch(2)).unwrap();
        assert!(cancel_a < watch_b);
        assert_eq!(h.location.live_watches(), 1);
    }

    #[tokio::test]
    async fn updates_report_with_bound_identity() {
        let h = start(SharedStore::default(), MockLocation::granted(), None, Timeouts::default());
        h.handle.set_identity("A").await.unwrap();
        wait_until(|| h.location.watch_count() == 1).await;

        h.location.emit(1.0, 1.0);
        h.location.emit(2.0, 2.0);
        wait_until(|| h.reporter.sent().len() == 3).await;

        h.handle.set_identity("B").await.unwrap();
        wait_until(|| h.location.watch_count() == 2).await;
        h.location.emit(3.0, 3.0);
        wait_until(|| h.reporter.sent().len() == 5).await;

        let sent = h.reporter.sent();
        assert_eq!(
            sent,
            vec![
                ("A".to_string(), 38.5651931),
                ("A".to_string(), 1.0),
                ("A".to_string(), 2.0),
                ("B".to_string(), 38.5651931),
                ("B".to_string(), 3.0),
            ]
        );
    }

    #[tokio::test]
    async fn same_identity_twice_one_watch() {
        let h = start(SharedStore::default(), MockLocation::granted(), None, Timeouts::default());
        h.handle.set_identity("A").await.unwrap();
        wait_until(|| h.location.watch_count() == 1).await;
        h.handle.set_identity("A").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.location.watch_count(), 1);
        assert_eq!(h.location.calls().iter().filter(|c| **c == Call::Check).count(), 1);
    }

    #[tokio::test]
    async fn clear_identity_cancels_and_idles() {
        let h = start(SharedStore::default(), MockLocation::granted(), None, Timeouts::default());
        h.handle.set_identity("A").await.unwrap();
        wait_until(|| h.location.watch_count() == 1).await;

        h.handle.clear_identity().await.unwrap();
        let view = wait_state(&h.handle, SessionState::Idle).await;
        assert!(view.identity.is_none());
        assert!(h.store.saved().is_none());
        assert_eq!(h.location.live_watches(), 0);
    }

    #[tokio::test]
    async fn blank_identity_rejected() {
        let h = start(SharedStore::default(), MockLocation::granted(), None, Timeouts::default());
        let err = h.handle.set_identity("  ").await.unwrap_err();
        assert!(matches!(err, AgentError::Identity(IdentityError::Empty)));
        assert!(h.store.saved().is_none());
        assert!(h.location.calls().is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_watch() {
        let h = start(SharedStore::with("A"), MockLocation::granted(), None, Timeouts::default());
        wait_until(|| h.location.watch_count() == 1).await;
        h.handle.shutdown();
        wait_until(|| h.location.live_watches() == 0).await;
        assert!(h.location.calls().contains(&Call::Cancel(1)));
    }

    #[tokio::test]
    async fn permission_timeout_counts_as_denied() {
        let location = Arc::new(MockLocation {
            hang_request: true,
            ..MockLocation::new(Permission::Undetermined, Permission::Granted)
        });
        let timeouts = Timeouts {
            permission: Some(Duration::from_millis(20)),
            initial_fix: None,
        };
        let h = start(SharedStore::with("A"), location, None, timeouts);
        let view = wait_state(&h.handle, SessionState::Stopped).await;
        assert!(view.permission_denied());
        assert_eq!(h.location.watch_count(), 0);
    }

    #[tokio::test]
    async fn route_error_then_manual_refetch() {
        let stub = http_stub::serve(vec![
            Reply::Hangup,
            Reply::json(200, r#"[{"lat":1,"lng":2},{"lat":3,"lng":4}]"#),
        ])
        .await;
        let routes = RouteClient::new(stub.url("/api/admin-route"), Duration::from_secs(5)).unwrap();
        let h = start(
            SharedStore::with("A"),
            MockLocation::granted(),
            Some(routes),
            Timeouts::default(),
        );
        wait_state(&h.handle, SessionState::Active).await;

        let mut route = h.handle.route();
        let view = tokio::time::timeout(Duration::from_secs(5), route.wait_for(|r| r.fetch_failed))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert!(view.route.is_empty());
        assert_eq!(h.handle.session().borrow().state, SessionState::Active);

        h.handle.refetch_route().unwrap();
        let view = tokio::time::timeout(Duration::from_secs(5), route.wait_for(|r| !r.fetch_failed))
            .await
            .unwrap()
            .unwrap()
            .clone();
        assert_eq!(view.route.len(), 2);
        assert_eq!(view.route.start().map(|c| c.lat()), Some(1.0));
        assert_eq!(view.route.end().map(|c| c.lat()), Some(3.0));
    }
}
