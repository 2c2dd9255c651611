//! Non-overlapping periodic execution
//!
//! The callback is awaited before the next period is armed, so two
//! invocations never run at the same time. The period can be changed while
//! the executor is running; the new value applies from the next wait.

use log::{debug, error};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct PeriodicExecutor {
    name: String,
    period_tx: watch::Sender<Duration>,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicExecutor {
    /// Spawn the executor on the current tokio runtime
    ///
    /// The callback resolves to `false` to stop the executor. A panic inside
    /// the callback is logged and the executor keeps going.
    pub fn start<F, Fut>(name: impl Into<String>, period: Duration, mut callback: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let name = name.into();
        let (period_tx, mut period_rx) = watch::channel(period);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            loop {
                let period = *period_rx.borrow_and_update();
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    changed = period_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = stop_rx.changed() => break,
                }
                if *stop_rx.borrow() {
                    break;
                }

                match tokio::spawn(callback()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(join_error) => {
                        error!(
                            "Periodic callback failed (Executor: {}, Error: {})",
                            task_name, join_error
                        );
                    }
                }
            }
            debug!("Periodic executor stopped (Executor: {})", task_name);
        });

        Self {
            name,
            period_tx,
            stop_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> Duration {
        *self.period_tx.borrow()
    }

    /// Reprogram the period without forcing an invocation
    pub fn set_period(&self, period: Duration) {
        self.period_tx.send_if_modified(|current| {
            if *current == period {
                false
            } else {
                *current = period;
                true
            }
        });
    }

    /// Stop arming new invocations; an invocation in flight runs to completion
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the executor task to exit
    pub async fn join(&self) {
        self.stop();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for PeriodicExecutor {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}
