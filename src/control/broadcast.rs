//! Broadcast-on-delta: recompute `ClusterStatusUpdate` whenever the
//! `Configuration` changes or a node's report changes, push it to every
//! connected agent.
//!
//! Edge-triggered rather than polled, so this is built on `tokio::sync::Notify`
//! instead of the teacher's fixed `tokio::time::interval` — a short
//! coalescing window absorbs a burst of near-simultaneous triggers (e.g. a
//! REST write immediately followed by an agent report) into one broadcast.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};

use crate::model::{ClusterState, Configuration};
use crate::protocol::wire::ControlMessage;

const COALESCE_WINDOW: Duration = Duration::from_millis(50);

/// Call `notify()` whenever something that should trigger a rebroadcast
/// happens; `run` drains bursts of those calls into single pushes onto
/// `sender`.
pub struct BroadcastTrigger {
    notify: Arc<Notify>,
}

impl BroadcastTrigger {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub fn handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

impl Default for BroadcastTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs until `shutdown` fires, waiting on `notify`, coalescing a short
/// burst of additional notifications, then publishing a fresh
/// `ClusterStatusUpdate` built from `snapshot` into `sender`. Every connected
/// agent's protocol-send task watches the same `sender`'s receiver.
pub async fn run(
    notify: Arc<Notify>,
    sender: watch::Sender<Option<ControlMessage>>,
    snapshot: impl Fn() -> (Configuration, ClusterState),
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = notify.notified() => {
                tokio::time::sleep(COALESCE_WINDOW).await;
                while notify.notified().now_or_not() {}
                let (configuration, cluster_state) = snapshot();
                let _ = sender.send(Some(ControlMessage::ClusterStatusUpdate {
                    configuration,
                    cluster_state,
                }));
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

trait NowOrNot {
    fn now_or_not(self) -> bool;
}

impl NowOrNot for tokio::sync::Notified<'_> {
    fn now_or_not(self) -> bool {
        use futures::future::FutureExt;
        self.now_or_never().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coalesces_a_burst_into_one_broadcast() {
        let trigger = BroadcastTrigger::new();
        let (sender, mut receiver) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let notify = trigger.handle();
        let task = tokio::spawn(run(
            notify,
            sender,
            || (Configuration::empty(), ClusterState::empty()),
            shutdown_rx,
        ));

        trigger.notify();
        trigger.notify();
        trigger.notify();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(receiver.borrow_and_update().is_some());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
