#![deny(unsafe_code)]

//! # osrv
//!
//! `osrv` is a unified HTTP/1.1, HTTP/2 and TLS server core built around a single
//! Fetch-style handler contract: a request goes in, a response comes out. Around
//! that contract it provides the serving lifecycle a production HTTP service
//! actually needs — a middleware pipeline, plugin hooks, structured error
//! handling, graceful shutdown with background-task draining, request body and
//! timeout limits, and optional WebSocket upgrades.
//!
//! ## Low-level, on purpose
//!
//! `osrv` does not route requests, render templates, authenticate callers, or
//! speak to a database. It binds one listener, runs one user [`FetchHandler`],
//! and gets out of the way. Composition above that — a router, an ORM, an auth
//! layer — belongs to the application built on top.
//!
//! ## Layout
//!
//! - [`request`]/[`response`]: the value types that flow through [`dispatch`](Server::dispatch).
//! - [`runtime`]: the per-request metadata carrier attached by whichever transport decoded the request.
//! - [`middleware`]: the onion-shaped pipeline wrapping the user fetch handler.
//! - [`plugin`]: lifecycle hooks invoked around `serve`/`close`/`dispatch`.
//! - [`server`]: the orchestrator — configuration, lifecycle state machine, dispatch.
//! - [`transport`]: the native (TCP/TLS) and bridge (JSON envelope) transports.
//! - [`websocket`]: the RFC 6455 upgrade and frame layer.
//! - [`error`]: the error taxonomy returned from fallible entry points.

pub mod body;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod headers;
pub mod lifecycle;
pub mod middleware;
pub mod plugin;
pub mod request;
pub mod response;
pub mod runtime;
pub mod server;
pub mod transport;
pub mod waituntil;
pub mod websocket;

mod common;

#[doc(no_inline)]
pub use http::{Method, StatusCode, Uri};

pub use crate::body::Body;
pub use crate::capabilities::ServerCapabilities;
pub use crate::config::{
    EnvSource, GracefulShutdownOptions, PartialServerConfig, PemSource, ProcessEnv, ServerConfig,
    ServerSecurityLimits, TlsConfig, WebSocketLimits,
};
pub use crate::error::{Error, ErrorStage, Result};
pub use crate::headers::Headers;
pub use crate::lifecycle::LifecycleState;
pub use crate::middleware::{FetchHandler, Middleware, Next};
pub use crate::plugin::Plugin;
pub use crate::request::Request;
pub use crate::response::Response;
pub use crate::runtime::{HttpVersion, Protocol, RawHandle, RuntimeContext};
pub use crate::server::{Builder, ErrorHandler, Server};
pub use crate::transport::{BridgeTransport, NativeTransport, Transport, UnsupportedTransport};
pub use crate::waituntil::WaitUntil;
pub use crate::websocket::{accept_key, upgrade, Message, WebSocketHandle};
