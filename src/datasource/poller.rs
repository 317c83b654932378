//! Background polling
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → for every pooled endpoint, concurrently:
//!                liveness cleanup → history cleanup → remote poll
//!            → failures recorded into BackgroundErrors
//!            → drained by the next panel query
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace};

/// Deduplicated failures of background polls, waiting to be delivered
#[derive(Debug, Default)]
pub struct BackgroundErrors {
    messages: Mutex<Vec<String>>,
}

impl BackgroundErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure; returns `false` if the same message is already pending
    pub async fn add(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let mut messages = self.messages.lock().await;
        if messages.contains(&message) {
            return false;
        }
        messages.push(message);
        true
    }

    /// Take every pending message, leaving the set empty
    pub async fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

/// Handle of the repeating poll task
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollerHandle {
    /// Spawn a task calling `tick` every `period`, first one period from now
    pub fn spawn<F, Fut>(period: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            debug!("starting background poller with period {period:?}");

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ok = tick().await;
                        trace!("poll tick finished (ok: {ok})");
                    }

                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }

            debug!("background poller stopped");
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the poller, waiting for an in-flight tick to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }

    /// Stop the poller immediately
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
