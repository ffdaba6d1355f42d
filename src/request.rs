//! The Request value type the orchestrator builds from a decoded wire
//! request (or a bridge envelope) before running the middleware chain.
//!
//! Unlike the lazy, factory-closure-backed request objects some Fetch-style
//! runtimes use, every field here is hydrated once at decode time and never
//! recomputed (§9's "lazy/deferred field hydration" redesign note). The only
//! thing that stays lazy is the body, and only because reading it is
//! genuinely one-shot I/O.

use std::collections::HashMap;

use http::{Method, Uri};

use crate::body::Body;
use crate::error::Error;
use crate::headers::Headers;
use crate::runtime::RuntimeContext;
use crate::waituntil::WaitUntil;

/// A decoded HTTP (or bridge-envelope) request.
pub struct Request {
    url: Uri,
    method: Method,
    headers: Headers,
    body: Option<Body>,
    mime: Option<String>,
    context: HashMap<String, serde_json::Value>,
    runtime: RuntimeContext,
    ip: Option<String>,
    wait_until: WaitUntil,
    ws_upgraded: bool,
    ws_upgrade_handle: Option<hyper::upgrade::OnUpgrade>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body_used", &self.body.is_none())
            .field("runtime", &self.runtime)
            .field("ip", &self.ip)
            .field("ws_upgraded", &self.ws_upgraded)
            .finish()
    }
}

impl Request {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: Uri,
        method: Method,
        headers: Headers,
        body: Body,
        runtime: RuntimeContext,
        ip: Option<String>,
        wait_until: WaitUntil,
    ) -> Self {
        let mime = headers
            .get("content-type")
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        Request {
            url,
            method,
            headers,
            body: Some(body),
            mime,
            context: HashMap::new(),
            runtime,
            ip,
            wait_until,
            ws_upgraded: false,
            ws_upgrade_handle: None,
        }
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Headers are mutable only before the response has been sent; the
    /// orchestrator enforces that window by only exposing `&mut Request` to
    /// middleware and the fetch handler, never afterwards.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    pub fn runtime(&self) -> &RuntimeContext {
        &self.runtime
    }

    pub fn wait_until(&self) -> &WaitUntil {
        &self.wait_until
    }

    pub fn is_websocket_upgraded(&self) -> bool {
        self.ws_upgraded
    }

    pub(crate) fn mark_websocket_upgraded(&mut self) {
        self.ws_upgraded = true;
    }

    /// Attaches the transport's pending upgrade future, if this request
    /// arrived with one (a well-formed WebSocket handshake on the native
    /// transport). Does not itself mark the request upgraded — that only
    /// happens once a handler actually calls into [`crate::websocket::upgrade`].
    pub(crate) fn set_websocket_upgrade(&mut self, on_upgrade: hyper::upgrade::OnUpgrade) {
        self.ws_upgrade_handle = Some(on_upgrade);
    }

    /// Takes the pending upgrade future, consuming it. `None` if this
    /// request never carried one, or it was already taken.
    pub(crate) fn take_websocket_upgrade(&mut self) -> Option<hyper::upgrade::OnUpgrade> {
        self.ws_upgrade_handle.take()
    }

    /// The per-request mutable context bag. Keys are strings; values are
    /// arbitrary JSON, matching the bridge envelope's `context` object so a
    /// value set by native middleware and one set by a bridge host behave
    /// identically.
    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut HashMap<String, serde_json::Value> {
        &mut self.context
    }

    /// Takes the body, consuming it. A second call returns
    /// [`Error::handler`] wrapping a "body already consumed" message, since
    /// a body is readable at most once.
    pub fn take_body(&mut self) -> Result<Body, Error> {
        self.body
            .take()
            .ok_or_else(|| Error::handler("request body has already been consumed"))
    }

    /// Whether the body has already been taken.
    pub fn body_used(&self) -> bool {
        self.body.is_none()
    }

    /// Whether this method is permitted to carry a body on the wire
    /// (everything except `GET`, `HEAD`, `TRACE`).
    pub fn method_allows_body(method: &Method) -> bool {
        !matches!(*method, Method::GET | Method::HEAD | Method::TRACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{HttpVersion, Protocol, RawHandle};
    use crate::waituntil::Registry;

    fn runtime_ctx() -> RuntimeContext {
        RuntimeContext::new(
            "native",
            Protocol::Http,
            HttpVersion::Http11,
            None,
            None,
            HashMap::new(),
            RawHandle::Native { peer_addr: None },
            None,
        )
    }

    fn sample_request() -> Request {
        let mut headers = Headers::new();
        headers.set("content-type", "application/json; charset=utf-8");
        Request::new(
            Uri::from_static("http://localhost/"),
            Method::POST,
            headers,
            Body::from_string("{}"),
            runtime_ctx(),
            Some("127.0.0.1".to_string()),
            WaitUntil::new(Registry::new()),
        )
    }

    #[test]
    fn mime_strips_parameters() {
        let req = sample_request();
        assert_eq!(req.mime(), Some("application/json"));
    }

    #[test]
    fn body_is_consumable_at_most_once() {
        let mut req = sample_request();
        assert!(!req.body_used());
        assert!(req.take_body().is_ok());
        assert!(req.body_used());
        assert!(req.take_body().is_err());
    }

    #[test]
    fn body_allowed_methods() {
        assert!(!Request::method_allows_body(&Method::GET));
        assert!(!Request::method_allows_body(&Method::HEAD));
        assert!(!Request::method_allows_body(&Method::TRACE));
        assert!(Request::method_allows_body(&Method::POST));
    }
}
