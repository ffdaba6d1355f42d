//! The capability flags a bound transport reports after `serve()`.

use std::collections::HashSet;

/// What the bound transport actually supports, set once after `serve()`
/// returns ready. `http2`, in particular, may be `false` even when HTTP/2 was
/// requested, if the host TLS stack couldn't negotiate ALPN `h2` and the
/// transport fell back to HTTP/1.1-over-TLS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub http1: bool,
    pub https: bool,
    pub http2: bool,
    pub websocket: bool,
    pub request_streaming: bool,
    pub response_streaming: bool,
    pub wait_until: bool,
    pub edge: bool,
    pub tls: bool,
    pub edge_providers: HashSet<String>,
}

impl ServerCapabilities {
    /// Capabilities for the native (TCP/TLS) transport, before a concrete
    /// ALPN outcome is known.
    pub fn native(tls: bool, http2_requested: bool) -> Self {
        ServerCapabilities {
            http1: true,
            https: tls,
            http2: tls && http2_requested,
            websocket: true,
            request_streaming: true,
            response_streaming: true,
            wait_until: true,
            edge: false,
            tls,
            edge_providers: HashSet::new(),
        }
    }

    /// Capabilities for the JSON bridge transport used by foreign hosts.
    /// HTTP/2 negotiation is the host's concern, not this core's.
    pub fn bridge(provider: impl Into<String>) -> Self {
        let mut edge_providers = HashSet::new();
        edge_providers.insert(provider.into());
        ServerCapabilities {
            http1: true,
            https: true,
            http2: false,
            websocket: true,
            request_streaming: false,
            response_streaming: false,
            wait_until: true,
            edge: true,
            tls: true,
            edge_providers,
        }
    }
}
