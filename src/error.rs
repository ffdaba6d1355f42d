//! Error and Result types.
//!
//! `osrv` routes every failure through one of four kinds (§7 of the design):
//! a request body that exceeded its configured limit, a transport failure
//! (bind, TLS, framing, I/O), a failure raised by user middleware or the
//! fetch handler, or a failure in a plugin hook or the close path. Each kind
//! keeps its own data; downcasting below that is not considered part of the
//! stable API, mirroring the posture `hyper::Error` documents for its own
//! `Kind`.

use std::fmt;

/// Result type returned from `osrv`'s fallible entry points.
pub type Result<T> = std::result::Result<T, Error>;

/// The stage of the server lifecycle in which a failure occurred.
///
/// Used to route `Plugin::on_error` and to decide whether a failure produces
/// a response (request stage) or is rethrown to the caller (lifecycle
/// stages).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorStage {
    Register,
    BeforeServe,
    AfterServe,
    Request,
    BeforeClose,
    AfterClose,
    Transport,
    Unknown,
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorStage::Register => "register",
            ErrorStage::BeforeServe => "beforeServe",
            ErrorStage::AfterServe => "afterServe",
            ErrorStage::Request => "request",
            ErrorStage::BeforeClose => "beforeClose",
            ErrorStage::AfterClose => "afterClose",
            ErrorStage::Transport => "transport",
            ErrorStage::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while configuring, serving, dispatching through, or
/// closing an [`Server`](crate::server::Server).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The request body exceeded `ServerSecurityLimits::max_request_body_bytes`.
    #[error("Request body too large: {actual_bytes} bytes exceeds the {max_bytes} byte limit")]
    RequestLimitExceeded {
        max_bytes: u64,
        actual_bytes: u64,
    },

    /// A listener bind, TLS material load, protocol framing, or stream I/O
    /// failure.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The user fetch handler or a middleware raised.
    #[error("handler error: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A plugin hook or the close path failed.
    #[error("lifecycle error at stage {stage}: {source}")]
    Lifecycle {
        stage: ErrorStage,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    pub fn request_limit_exceeded(max_bytes: u64, actual_bytes: u64) -> Self {
        Error::RequestLimitExceeded {
            max_bytes,
            actual_bytes,
        }
    }

    pub fn transport<E: Into<Box<dyn std::error::Error + Send + Sync>>>(cause: E) -> Self {
        Error::Transport(cause.into())
    }

    pub fn handler<E: Into<Box<dyn std::error::Error + Send + Sync>>>(cause: E) -> Self {
        Error::Handler(cause.into())
    }

    pub fn lifecycle<E: Into<Box<dyn std::error::Error + Send + Sync>>>(
        stage: ErrorStage,
        cause: E,
    ) -> Self {
        Error::Lifecycle {
            stage,
            source: cause.into(),
        }
    }

    /// The lifecycle stage this error surfaced at, for `Lifecycle` errors and
    /// `RequestLimitExceeded`/transport errors that always happen during
    /// request handling or transport setup.
    pub fn stage(&self) -> ErrorStage {
        match self {
            Error::RequestLimitExceeded { .. } => ErrorStage::Request,
            Error::Transport(_) => ErrorStage::Transport,
            Error::Handler(_) => ErrorStage::Request,
            Error::Lifecycle { stage, .. } => *stage,
        }
    }

    pub fn is_request_limit_exceeded(&self) -> bool {
        matches!(self, Error::RequestLimitExceeded { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    pub fn is_handler(&self) -> bool {
        matches!(self, Error::Handler(_))
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Error::Lifecycle { .. })
    }
}
