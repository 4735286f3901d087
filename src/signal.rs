//! Fire-once signals with any number of observers.
//!
//! Built on a `watch` channel: the handle flips the value to `true` exactly
//! once, observers wait for the flip. Dropping the last handle counts as
//! firing, so tasks observing a connection's liveness wake up even when the
//! owning task aborts without a clean teardown.

use std::sync::Arc;
use tokio::sync::watch;

/// Create a connected handle/signal pair.
pub fn signal() -> (SignalHandle, Signal) {
    let (tx, rx) = watch::channel(false);
    (SignalHandle { tx: Arc::new(tx) }, Signal { rx })
}

/// The firing side. Cloneable; the first `fire` wins, the rest are no-ops.
#[derive(Clone)]
pub struct SignalHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl SignalHandle {
    /// Fire the signal, waking all current and future observers.
    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }
}

/// The observing side.
#[derive(Clone)]
pub struct Signal {
    rx: watch::Receiver<bool>,
}

impl Signal {
    /// Whether the signal has fired (or all handles are gone).
    pub fn is_fired(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Wait until the signal fires. Returns immediately if it already has.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
