//! A broadcast "start draining" signal paired with a "every watcher is done"
//! completion signal.
//!
//! This is the same two-channel idea as `hyper`'s internal `common::drain`
//! (a `Signal`/`Watch` pair built over a oneshot-plus-mpsc trick), expressed
//! with `tokio::sync` instead of `futures` 0.1: a [`tokio::sync::watch`]
//! channel broadcasts the shutdown trigger to every live connection, and a
//! zero-message `mpsc` channel's closing (every clone of its sender dropped)
//! tells the close path that every watcher has finished.

use std::convert::Infallible;

use tokio::sync::{mpsc, watch};

pub(crate) fn channel() -> (Signal, Watch) {
    let (trigger_tx, trigger_rx) = watch::channel(false);
    let (drained_tx, drained_rx) = mpsc::channel::<Infallible>(1);
    (
        Signal {
            trigger_tx,
            drained_rx,
        },
        Watch {
            trigger_rx,
            drained_tx,
        },
    )
}

/// Held by the orchestrator. Triggers graceful shutdown and can then be
/// awaited until every outstanding [`Watch`] clone has been dropped.
pub(crate) struct Signal {
    trigger_tx: watch::Sender<bool>,
    drained_rx: mpsc::Receiver<Infallible>,
}

impl Signal {
    /// Broadcasts the shutdown trigger and returns a future that resolves
    /// once every watcher has gone away.
    pub(crate) fn drain(mut self) -> Draining {
        let _ = self.trigger_tx.send(true);
        Draining {
            drained_rx: self.drained_rx,
        }
    }
}

pub(crate) struct Draining {
    drained_rx: mpsc::Receiver<Infallible>,
}

impl Draining {
    /// Resolves once every clone of the paired [`Watch`] has been dropped.
    pub(crate) async fn wait(mut self) {
        // `recv` only ever returns `None`: nothing is ever sent on this
        // channel, it exists purely so its closing is observable.
        let _ = self.drained_rx.recv().await;
    }
}

/// Held by each in-flight connection task. Cloning keeps the paired
/// [`Signal`]'s `Draining` future unresolved; dropping the last clone lets it
/// resolve.
#[derive(Clone)]
pub(crate) struct Watch {
    trigger_rx: watch::Receiver<bool>,
    drained_tx: mpsc::Sender<Infallible>,
}

impl Watch {
    /// Resolves once the orchestrator calls `Signal::drain`.
    pub(crate) async fn shutdown_triggered(&mut self) {
        // An error here means the `Signal` was dropped without draining,
        // which only happens if the server itself is being torn down; treat
        // that the same as a trigger.
        let _ = self.trigger_rx.changed().await;
    }

    /// A cloneable token whose only job is to keep the drain channel open.
    pub(crate) fn guard(&self) -> WatchGuard {
        WatchGuard(self.drained_tx.clone())
    }
}

#[derive(Clone)]
pub(crate) struct WatchGuard(#[allow(dead_code)] mpsc::Sender<Infallible>);
