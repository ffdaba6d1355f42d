//! Transport abstraction: binding a listener (or bridge) and handing
//! decoded requests to the orchestrator.
//!
//! Expressed as a trait with multiple concrete implementations rather than
//! the conditional-imports-per-platform pattern the source used to select a
//! transport (§9): [`native`] binds real TCP/TLS sockets,
//! [`bridge`] answers a JSON envelope for foreign hosts, and
//! [`UnsupportedTransport`] is the explicit "no transport is available"
//! leaf for a build that selected neither.

use std::time::Duration;

use async_trait::async_trait;

use crate::capabilities::ServerCapabilities;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::server::Server;

pub mod bridge;
pub mod native;

pub use bridge::BridgeTransport;
pub use native::NativeTransport;

/// Something a [`Server`] can bind to and later close.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Binds the transport and returns the capabilities it actually
    /// supports. Called once, from `Server::serve()`.
    async fn bind(&mut self, config: &ServerConfig, dispatcher: Server) -> Result<ServerCapabilities, Error>;

    /// Closes the transport. `force=true` skips the graceful wait for
    /// in-flight connections entirely. `graceful_timeout` bounds how long a
    /// non-forced close waits for in-flight connections/background work to
    /// finish on their own; `force_timeout` bounds the subsequent forced
    /// close (aborting whatever is still outstanding) once `force` is true
    /// or the graceful wait is exceeded.
    async fn close(&mut self, force: bool, graceful_timeout: Duration, force_timeout: Duration) -> Result<(), Error>;
}

/// The explicit "no transport selected" leaf. Binding always fails; this is
/// the default a [`Server`] is built with until a real transport is
/// attached; tests that only exercise `dispatch()` never need to replace it.
pub struct UnsupportedTransport {
    reason: String,
}

impl UnsupportedTransport {
    pub fn new(reason: impl Into<String>) -> Self {
        UnsupportedTransport {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Transport for UnsupportedTransport {
    async fn bind(&mut self, _config: &ServerConfig, _dispatcher: Server) -> Result<ServerCapabilities, Error> {
        Err(Error::transport(format!(
            "no transport available: {}",
            self.reason
        )))
    }

    async fn close(&mut self, _force: bool, _graceful_timeout: Duration, _force_timeout: Duration) -> Result<(), Error> {
        Ok(())
    }
}
