//! Plugin lifecycle hooks invoked around `serve`/`dispatch`/`close`.
//!
//! Grounded on `modkit`'s `Module`/`StatefulModule` async-trait contracts:
//! every hook is optional (a default no-op), async, and fallible, so a
//! plugin only implements the phases it cares about.

use async_trait::async_trait;

use crate::error::{Error, ErrorStage};
use crate::request::Request;

/// A hook into the server's lifecycle. All methods default to a no-op
/// success; implement only the phases a given plugin needs.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// A human-readable name, used in log output.
    fn name(&self) -> &str {
        "plugin"
    }

    async fn on_register(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn on_before_serve(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn on_after_serve(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn on_before_close(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn on_after_close(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Notified of any unrecovered error at `stage`. `request` is present
    /// only for `ErrorStage::Request` failures. A failure raised from this
    /// hook itself is logged and dropped, never re-entering this loop
    /// (§4.1's plugin error re-entrancy guard).
    async fn on_error(&self, _stage: ErrorStage, _error: &Error, _request: Option<&Request>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingPlugin {
        registrations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        fn name(&self) -> &str {
            "counting"
        }

        async fn on_register(&self) -> Result<(), Error> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn unimplemented_hooks_default_to_success() {
        let plugin = CountingPlugin {
            registrations: Arc::new(AtomicUsize::new(0)),
        };
        assert!(plugin.on_before_serve().await.is_ok());
        assert!(plugin.on_after_close().await.is_ok());
    }

    #[tokio::test]
    async fn implemented_hook_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let plugin = CountingPlugin {
            registrations: counter.clone(),
        };
        plugin.on_register().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
