//! The per-request runtime context.
//!
//! Every request carries an immutable [`RuntimeContext`] describing which
//! transport decoded it and what that transport can tell us about the
//! connection. This replaces the "attach extra metadata to the host's
//! request object via a side table" pattern some Fetch-style runtimes use:
//! here the context is a first-class, owned field, created once during
//! decode and never mutated afterwards (§9 of the design).

use std::collections::HashMap;
use std::net::SocketAddr;

/// The scheme a request arrived over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Protocol::Https)
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The HTTP version negotiated for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVersion {
    Http10,
    Http11,
    Http2,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "1.0",
            HttpVersion::Http11 => "1.1",
            HttpVersion::Http2 => "2",
        }
    }
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<http::Version> for HttpVersion {
    fn from(v: http::Version) -> Self {
        match v {
            http::Version::HTTP_10 => HttpVersion::Http10,
            http::Version::HTTP_2 => HttpVersion::Http2,
            _ => HttpVersion::Http11,
        }
    }
}

/// A tagged grab-bag of the transport-specific connection handle, in place
/// of a dynamically-typed "raw handles" object. Nothing in the core
/// inspects a particular arm; it exists so a WebSocket upgrade or a
/// transport-specific extension can recover its native handle.
#[derive(Debug, Clone)]
pub enum RawHandle {
    /// The native TCP/TLS transport, carrying the peer address observed by
    /// the socket (not necessarily the resolved client IP — see
    /// [`RuntimeContext::ip`]).
    Native { peer_addr: Option<SocketAddr> },
    /// A foreign host invoking dispatch through the JSON bridge.
    Bridge { provider: String, runtime: String },
}

/// Immutable per-request metadata describing the connection a request
/// arrived on.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    name: String,
    protocol: Protocol,
    http_version: HttpVersion,
    tls: bool,
    local_address: Option<String>,
    remote_address: Option<String>,
    env: HashMap<String, String>,
    raw: RawHandle,
    request_id: Option<String>,
}

impl RuntimeContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        http_version: HttpVersion,
        local_address: Option<String>,
        remote_address: Option<String>,
        env: HashMap<String, String>,
        raw: RawHandle,
        request_id: Option<String>,
    ) -> Self {
        let tls = protocol.is_tls();
        RuntimeContext {
            name: name.into(),
            protocol,
            http_version,
            tls,
            local_address,
            remote_address,
            env,
            raw,
            request_id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn http_version(&self) -> HttpVersion {
        self.http_version
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    pub fn local_address(&self) -> Option<&str> {
        self.local_address.as_deref()
    }

    pub fn remote_address(&self) -> Option<&str> {
        self.remote_address.as_deref()
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    pub fn raw(&self) -> &RawHandle {
        &self.raw
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_implies_tls() {
        let ctx = RuntimeContext::new(
            "native",
            Protocol::Https,
            HttpVersion::Http2,
            None,
            None,
            HashMap::new(),
            RawHandle::Native { peer_addr: None },
            None,
        );
        assert!(ctx.tls());
        assert_eq!(ctx.http_version().as_str(), "2");
    }

    #[test]
    fn http_version_from_http_crate() {
        assert_eq!(HttpVersion::from(http::Version::HTTP_11), HttpVersion::Http11);
        assert_eq!(HttpVersion::from(http::Version::HTTP_2), HttpVersion::Http2);
    }
}
