//! C ABI for linking tracker-core as a static library from Android (NDK), iOS or other C hosts.
//!
//! The host owns durable storage: it passes the saved identity to `tracker_launch`, persists
//! the value after `tracker_set_identity` returns 0, and deletes it after `tracker_clear_identity`.
//! Actions are queued inside the handle and drained with `tracker_poll_action`.

use std::collections::VecDeque;
use std::ffi::{c_char, c_void, CStr};
use std::os::raw::c_int;

use crate::identity::{IdentityError, IdentityStore, MemoryStore, IDENTITY_KEY};
use crate::location::{LocationError, Permission, WatchHandle};
use crate::position::Coordinate;
use crate::session::{Action, Attempt, SessionState};
use crate::tracker::Tracker;
use crate::wire::encode_report;
use tracing::warn;

pub const TRACKER_OK: c_int = 0;
pub const TRACKER_ERR_INVALID: c_int = -1;
pub const TRACKER_ERR_EMPTY_IDENTITY: c_int = -2;
pub const TRACKER_ERR_STORE: c_int = -3;

pub const PERMISSION_GRANTED: c_int = 0;
pub const PERMISSION_DENIED: c_int = 1;
pub const PERMISSION_UNDETERMINED: c_int = 2;

pub const ACTION_NONE: u32 = 0;
pub const ACTION_CHECK_PERMISSION: u32 = 1;
pub const ACTION_REQUEST_PERMISSION: u32 = 2;
pub const ACTION_FETCH_INITIAL_POSITION: u32 = 3;
pub const ACTION_START_WATCH: u32 = 4;
pub const ACTION_CANCEL_WATCH: u32 = 5;
pub const ACTION_REPORT: u32 = 6;

/// One action for the host. Fields not used by `kind` are zero.
/// For `ACTION_REPORT`, the JSON POST body is written to the caller's buffer and its
/// length stored in `body_len`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct TrackerAction {
    pub kind: u32,
    pub attempt: u64,
    pub handle: u64,
    pub lat: f64,
    pub lng: f64,
    pub body_len: usize,
}

struct Handle {
    tracker: Tracker<MemoryStore>,
    queue: VecDeque<Action>,
}

impl Handle {
    fn push(&mut self, actions: Vec<Action>) {
        self.queue.extend(actions);
    }

    /// Restart from the host's persisted value. The current session is reset first so a
    /// held watch is cancelled, and the store mirror is made to match `saved`.
    fn seed(&mut self, saved: Option<&str>) -> Result<(), IdentityError> {
        let actions = self.tracker.session_mut().reset();
        self.push(actions);
        let store = self.tracker.store_mut();
        match saved {
            Some(value) => store.set(IDENTITY_KEY, value)?,
            None => store.delete(IDENTITY_KEY)?,
        }
        Ok(())
    }
}

unsafe fn handle<'a>(h: *mut c_void) -> Option<&'a mut Handle> {
    (h as *mut Handle).as_mut()
}

fn permission_from(status: c_int) -> Option<Permission> {
    match status {
        PERMISSION_GRANTED => Some(Permission::Granted),
        PERMISSION_DENIED => Some(Permission::Denied),
        PERMISSION_UNDETERMINED => Some(Permission::Undetermined),
        _ => None,
    }
}

fn fix_from(ok: c_int, lat: f64, lng: f64) -> Result<Coordinate, LocationError> {
    if ok == 0 {
        return Err(LocationError::Unavailable("host reported no fix".into()));
    }
    Coordinate::new(lat, lng).map_err(|e| LocationError::Unavailable(e.to_string()))
}

fn error_code(e: &IdentityError) -> c_int {
    match e {
        IdentityError::Empty => TRACKER_ERR_EMPTY_IDENTITY,
        IdentityError::Store(_) => TRACKER_ERR_STORE,
    }
}

/// Create a tracker. Returns an opaque handle.
#[no_mangle]
pub extern "C" fn tracker_create() -> *mut c_void {
    let h = Handle {
        tracker: Tracker::new(MemoryStore::new()),
        queue: VecDeque::new(),
    };
    Box::into_raw(Box::new(h)) as *mut c_void
}

/// Destroy a tracker. No-op if h is null. Hosts must cancel any watch they still hold first.
#[no_mangle]
pub extern "C" fn tracker_destroy(h: *mut c_void) {
    if h.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(h as *mut Handle) };
}

/// Startup. `saved_identity` is the value the host persisted, or null. Calling it again
/// restarts the session; a watch from the previous one is queued for cancel.
#[no_mangle]
pub extern "C" fn tracker_launch(h: *mut c_void, saved_identity: *const c_char) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    let saved = if saved_identity.is_null() {
        None
    } else {
        let Ok(saved) = unsafe { CStr::from_ptr(saved_identity) }.to_str() else {
            return TRACKER_ERR_INVALID;
        };
        Some(saved)
    };
    if h.seed(saved).is_err() {
        return TRACKER_ERR_STORE;
    }
    match h.tracker.launch() {
        Ok(actions) => {
            h.push(actions);
            TRACKER_OK
        }
        Err(e) => error_code(&e),
    }
}

/// Submit a new identity (UTF-8, NUL-terminated).
#[no_mangle]
pub extern "C" fn tracker_set_identity(h: *mut c_void, identity: *const c_char) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    if identity.is_null() {
        return TRACKER_ERR_INVALID;
    }
    let Ok(value) = unsafe { CStr::from_ptr(identity) }.to_str() else {
        return TRACKER_ERR_INVALID;
    };
    match h.tracker.set_identity(value) {
        Ok(actions) => {
            h.push(actions);
            TRACKER_OK
        }
        Err(e) => error_code(&e),
    }
}

/// Stops the session even when the result is an error; poll for the watch cancel.
#[no_mangle]
pub extern "C" fn tracker_clear_identity(h: *mut c_void) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    let (actions, result) = h.tracker.clear_identity();
    h.push(actions);
    match result {
        Ok(()) => TRACKER_OK,
        Err(e) => error_code(&e),
    }
}

#[no_mangle]
pub extern "C" fn tracker_stop(h: *mut c_void) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    let actions = h.tracker.session_mut().stop();
    h.push(actions);
    TRACKER_OK
}

#[no_mangle]
pub extern "C" fn tracker_on_permission_checked(h: *mut c_void, attempt: u64, status: c_int) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    let Some(p) = permission_from(status) else {
        return TRACKER_ERR_INVALID;
    };
    let actions = h
        .tracker
        .session_mut()
        .on_permission_checked(Attempt::from_raw(attempt), p);
    h.push(actions);
    TRACKER_OK
}

#[no_mangle]
pub extern "C" fn tracker_on_permission_requested(
    h: *mut c_void,
    attempt: u64,
    status: c_int,
) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    let Some(p) = permission_from(status) else {
        return TRACKER_ERR_INVALID;
    };
    let actions = h
        .tracker
        .session_mut()
        .on_permission_requested(Attempt::from_raw(attempt), p);
    h.push(actions);
    TRACKER_OK
}

/// Initial one-shot fix. `ok` = 0 means the fetch failed and lat/lng are ignored.
#[no_mangle]
pub extern "C" fn tracker_on_initial_position(
    h: *mut c_void,
    attempt: u64,
    ok: c_int,
    lat: f64,
    lng: f64,
) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    let actions = h
        .tracker
        .session_mut()
        .on_initial_position(Attempt::from_raw(attempt), fix_from(ok, lat, lng));
    h.push(actions);
    TRACKER_OK
}

/// Watch creation result. `ok` = 0 means the watch could not be started.
#[no_mangle]
pub extern "C" fn tracker_on_watch_started(
    h: *mut c_void,
    attempt: u64,
    ok: c_int,
    watch_handle: u64,
) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    let result = if ok == 0 {
        Err(LocationError::Unavailable("host could not start watch".into()))
    } else {
        Ok(WatchHandle(watch_handle))
    };
    let actions = h
        .tracker
        .session_mut()
        .on_watch_started(Attempt::from_raw(attempt), result);
    h.push(actions);
    TRACKER_OK
}

/// Watch callback. `ok` = 0 reports a callback error.
#[no_mangle]
pub extern "C" fn tracker_on_position(
    h: *mut c_void,
    attempt: u64,
    ok: c_int,
    lat: f64,
    lng: f64,
) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    let actions = h
        .tracker
        .session_mut()
        .on_position(Attempt::from_raw(attempt), fix_from(ok, lat, lng));
    h.push(actions);
    TRACKER_OK
}

/// Pop the next action into `out`. Returns 1 if an action was written, 0 if the queue is
/// empty, -1 on error.
///
/// A report's JSON body is copied to `body_buf`. With a null `body_buf` the report is
/// delivered with lat/lng only. If the buffer is too small, -1 is returned, the report
/// stays queued and `out.body_len` holds the size needed.
#[no_mangle]
pub extern "C" fn tracker_poll_action(
    h: *mut c_void,
    out: *mut TrackerAction,
    body_buf: *mut u8,
    body_buf_len: usize,
) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    if out.is_null() {
        return TRACKER_ERR_INVALID;
    }
    let mut action = TrackerAction::default();
    loop {
        let Some(front) = h.queue.front() else {
            unsafe { *out = action };
            return 0;
        };
        match front {
            Action::CheckPermission(at) => {
                action.kind = ACTION_CHECK_PERMISSION;
                action.attempt = at.id();
            }
            Action::RequestPermission(at) => {
                action.kind = ACTION_REQUEST_PERMISSION;
                action.attempt = at.id();
            }
            Action::FetchInitialPosition(at) => {
                action.kind = ACTION_FETCH_INITIAL_POSITION;
                action.attempt = at.id();
            }
            Action::StartWatch(at) => {
                action.kind = ACTION_START_WATCH;
                action.attempt = at.id();
            }
            Action::CancelWatch(handle) => {
                action.kind = ACTION_CANCEL_WATCH;
                action.handle = handle.0;
            }
            Action::Report(sample) => {
                action.kind = ACTION_REPORT;
                action.lat = sample.coordinate.lat();
                action.lng = sample.coordinate.lng();
                if !body_buf.is_null() {
                    let body = match encode_report(sample) {
                        Ok(body) => body,
                        Err(e) => {
                            warn!(error = %e, "dropping report that could not be encoded");
                            h.queue.pop_front();
                            action = TrackerAction::default();
                            continue;
                        }
                    };
                    action.body_len = body.len();
                    if body.len() > body_buf_len {
                        unsafe { *out = action };
                        return TRACKER_ERR_INVALID;
                    }
                    unsafe {
                        body_buf.copy_from_nonoverlapping(body.as_ptr(), body.len());
                    }
                }
            }
        }
        h.queue.pop_front();
        unsafe { *out = action };
        return 1;
    }
}

/// Current state: 0 Idle, 1 AwaitingPermission, 2 Active, 3 Stopped; -1 if h is null.
#[no_mangle]
pub extern "C" fn tracker_state(h: *mut c_void) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    match h.tracker.session().state() {
        SessionState::Idle => 0,
        SessionState::AwaitingPermission => 1,
        SessionState::Active => 2,
        SessionState::Stopped => 3,
    }
}

/// 1 if the last bind attempt was refused permission, else 0.
#[no_mangle]
pub extern "C" fn tracker_permission_denied(h: *mut c_void) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    h.tracker.session().view().permission_denied() as c_int
}

/// Fill the current position. Returns 0 if known, 1 if none yet, -1 on error.
#[no_mangle]
pub extern "C" fn tracker_position(h: *mut c_void, out_lat: *mut f64, out_lng: *mut f64) -> c_int {
    let Some(h) = (unsafe { handle(h) }) else {
        return TRACKER_ERR_INVALID;
    };
    if out_lat.is_null() || out_lng.is_null() {
        return TRACKER_ERR_INVALID;
    }
    match h.tracker.session().position() {
        Some(c) => {
            unsafe {
                *out_lat = c.lat();
                *out_lng = c.lng();
            }
            0
        }
        None => 1,
    }
}
