//! Fire-and-forget background work registered during a request.
//!
//! A [`WaitUntil`] is the sink middleware and fetch handlers push background
//! tasks into. The server's own background-task registry drains them at
//! graceful close; nothing about a `WaitUntil` handle itself blocks the
//! request that created it.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// The server-owned set of outstanding background tasks. Cloned cheaply
/// into every [`WaitUntil`] handle handed to a request.
#[derive(Clone, Default)]
pub(crate) struct Registry {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Registry::default()
    }

    pub(crate) fn spawn(&self, fut: BoxFuture) {
        let handle = tokio::spawn(fut);
        self.handles.lock().unwrap().push(handle);
    }

    /// Awaits every outstanding task, up to `timeout`. Returns `false` if the
    /// timeout elapsed with tasks still outstanding.
    pub(crate) async fn drain(&self, timeout: std::time::Duration) -> bool {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        let join_all = futures_util::future::join_all(handles);
        tokio::time::timeout(timeout, join_all).await.is_ok()
    }
}

/// A per-request sink for background work that should be allowed to
/// continue after the response is sent, but must still complete (or be
/// abandoned) before a graceful `close()` returns.
#[derive(Clone)]
pub struct WaitUntil {
    registry: Registry,
}

impl WaitUntil {
    pub(crate) fn new(registry: Registry) -> Self {
        WaitUntil { registry }
    }

    /// Registers `task` to run in the background. The request that created
    /// this handle does not wait on it.
    pub fn wait_until<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.registry.spawn(Box::pin(task));
    }
}

impl std::fmt::Debug for WaitUntil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WaitUntil")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn drain_awaits_registered_tasks() {
        let registry = Registry::new();
        let wait_until = WaitUntil::new(registry.clone());
        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        wait_until.wait_until(async move {
            done2.store(true, Ordering::SeqCst);
        });
        let settled = registry.drain(std::time::Duration::from_secs(1)).await;
        assert!(settled);
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drain_with_no_tasks_settles_immediately() {
        let registry = Registry::new();
        let settled = registry.drain(std::time::Duration::from_millis(50)).await;
        assert!(settled);
    }
}
