//! Location providers available on Linux hosts.

pub mod gpsd;
pub mod replay;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracker_core::{LocationProvider, Permission, WatchHandle};

use crate::config::{LocationConfig, LocationSource};

pub use gpsd::GpsdProvider;
pub use replay::{ReplayError, ReplayProvider};

/// Build the configured provider.
pub fn from_config(cfg: &LocationConfig) -> Result<Arc<dyn LocationProvider>, ReplayError> {
    match cfg.source {
        LocationSource::Gpsd => Ok(Arc::new(GpsdProvider::new(cfg.gpsd_addr.clone(), cfg.allow))),
        LocationSource::Replay => {
            let path = cfg.replay_file.as_deref().ok_or(ReplayError::NoFile)?;
            let provider = ReplayProvider::from_file(path, cfg.replay_interval(), cfg.allow)?;
            Ok(Arc::new(provider))
        }
    }
}

/// Linux has no runtime location prompt; access is a config decision.
fn host_permission(allow: bool) -> Permission {
    if allow {
        Permission::Granted
    } else {
        Permission::Denied
    }
}

/// Live watch tasks by handle. Dropping the registry aborts every task.
#[derive(Default)]
struct Watches {
    next: AtomicU64,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl Watches {
    /// A panic while holding the lock cannot leave the map inconsistent, so poison is ignored.
    fn tasks(&self) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, task: JoinHandle<()>) -> WatchHandle {
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.tasks().insert(id, task);
        WatchHandle(id)
    }

    fn cancel(&self, handle: WatchHandle) -> bool {
        let task = self.tasks().remove(&handle.0);
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tasks().len()
    }
}

impl Drop for Watches {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn forever() -> JoinHandle<()> {
        tokio::spawn(std::future::pending::<()>())
    }

    #[tokio::test]
    async fn cancel_aborts_task() {
        let watches = Watches::default();
        let handle = watches.insert(forever());
        assert_eq!(watches.len(), 1);
        assert!(watches.cancel(handle));
        assert!(!watches.cancel(handle));
        assert_eq!(watches.len(), 0);
    }

    #[tokio::test]
    async fn poisoned_registry_still_tracks_watches() {
        let watches = Arc::new(Watches::default());
        let poison = watches.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poison.tasks.lock().unwrap();
            panic!("poison the registry");
        })
        .join();
        assert!(watches.tasks.is_poisoned());

        let task = forever();
        let abort = task.abort_handle();
        let handle = watches.insert(task);
        assert!(watches.cancel(handle));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(abort.is_finished());
    }

    #[tokio::test]
    async fn drop_aborts_live_watches() {
        let watches = Watches::default();
        let task = forever();
        let abort = task.abort_handle();
        watches.insert(task);
        drop(watches);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(abort.is_finished());
    }
}
