//! Deferred teardown of retired components
//!
//! Components that hold large state or background tasks are not dropped on
//! the control path. They are handed to a reaper task that runs their
//! cleanup hook and drops them off the hot path.

use log::debug;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Release background resources before the value is dropped
pub trait Cleanup {
    fn cleanup(&self);
}

/// Handle to a background teardown task
pub struct Reaper<T: Cleanup + Send + 'static> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Cleanup + Send + 'static> Clone for Reaper<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Cleanup + Send + 'static> Reaper<T> {
    /// Spawn the teardown task; it exits once every handle is dropped and
    /// resolves to the number of values it tore down
    pub fn spawn(name: &'static str) -> (Self, JoinHandle<usize>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        let handle = tokio::spawn(async move {
            let mut reaped = 0usize;
            while let Some(item) = rx.recv().await {
                item.cleanup();
                drop(item);
                reaped += 1;
                debug!("Retired value torn down (Reaper: {}, Total: {})", name, reaped);
            }
            reaped
        });
        (Self { tx }, handle)
    }

    /// Queue `item` for teardown; torn down inline if the task is gone
    pub fn retire(&self, item: T) {
        if let Err(mpsc::error::SendError(item)) = self.tx.send(item) {
            item.cleanup();
        }
    }
}
