//! Background finalizer delivery

use std::hash::Hash;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::cache::Shared;

/// Handle to a thread that runs finalizers on an interval.
///
/// The thread holds only a weak handle to the cache state. It exits when
/// this handle is dropped (the stop channel disconnects) or when the state
/// is gone. Dropping the handle waits for a finalizer run in progress, so the
/// listener is never called once the owning cache is gone.
pub(crate) struct Reaper {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Start the reaper thread.
    ///
    /// Returns `None` if the thread could not be spawned; finalizers can
    /// still be run by hand in that case.
    pub(crate) fn spawn<K, V>(shared: Weak<Shared<K, V>>, interval: Duration) -> Option<Self>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: ?Sized + Send + Sync + 'static,
    {
        let (stop, stopped) = mpsc::channel::<()>();

        let spawned = thread::Builder::new()
            .name("weakcache-reaper".to_string())
            .spawn(move || {
                debug!(?interval, "reaper started");
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let Some(shared) = shared.upgrade() else {
                        break;
                    };
                    shared.run_finalizers();
                }
                debug!("reaper stopped");
            });

        match spawned {
            Ok(thread) => Some(Self {
                stop: Some(stop),
                thread: Some(thread),
            }),
            Err(err) => {
                error!(error = %err, "failed to spawn reaper thread");
                None
            }
        }
    }

    /// Check if the reaper thread is still alive
    pub(crate) fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        drop(self.stop.take());

        let Some(thread) = self.thread.take() else {
            return;
        };
        // A listener can drop the last cache handle from the reaper itself
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!("reaper thread panicked");
        }
    }
}
