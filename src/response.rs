//! The Response value type a fetch handler or middleware produces.

use crate::body::Body;
use crate::headers::Headers;

/// A response produced by a fetch handler, middleware short-circuit, or the
/// default error path.
#[derive(Debug)]
pub struct Response {
    status: u16,
    reason: Option<String>,
    headers: Headers,
    body: Option<Body>,
}

impl Response {
    /// Builds a response, panicking if `status` is outside `[100, 599]` —
    /// the same range `http::StatusCode` accepts, checked here too since
    /// `Response` does not route its status through `http::StatusCode`
    /// directly (a 3-digit custom reason-less status is otherwise legal on
    /// the wire).
    pub fn new(status: u16, body: impl Into<Body>) -> Self {
        assert!(
            (100..=599).contains(&status),
            "response status {status} is outside the valid range 100..=599"
        );
        Response {
            status,
            reason: None,
            headers: Headers::new(),
            body: Some(body.into()),
        }
    }

    /// A 200 response with no body.
    pub fn empty() -> Self {
        Response::new(200, Body::empty())
    }

    /// A 200 `text/plain` response.
    pub fn text(body: impl Into<String>) -> Self {
        let mut response = Response::new(200, Body::from_string(body.into()));
        response.headers.set("content-type", "text/plain; charset=utf-8");
        response
    }

    /// A 200 `application/json` response from a pre-serialized JSON string.
    pub fn json_raw(body: impl Into<String>) -> Self {
        let mut response = Response::new(200, Body::from_string(body.into()));
        response.headers.set("content-type", "application/json");
        response
    }

    /// A 200 `application/json` response serialized from `value`.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_string(value)?;
        Ok(Response::json_raw(body))
    }

    /// A 101 response completing a WebSocket handshake, carrying the
    /// `Sec-WebSocket-Accept` value computed from the client's key
    /// (§6.2). Pair with [`crate::websocket::upgrade`].
    pub fn websocket_upgrade(accept: impl Into<String>) -> Self {
        Response::new(101, Body::empty())
            .with_header("upgrade", "websocket")
            .with_header("connection", "Upgrade")
            .with_header("sec-websocket-accept", accept.into())
    }

    /// Sets the status, returning `self` for chaining.
    pub fn with_status(mut self, status: u16) -> Self {
        assert!((100..=599).contains(&status));
        self.status = status;
        self
    }

    /// Sets an explicit reason phrase, overriding the status's canonical one.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Takes the body, leaving `None` behind. Used exactly once by the
    /// transport's response writer.
    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_sets_content_type() {
        let resp = Response::text("ok");
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get("content-type"), Some("text/plain; charset=utf-8"));
    }

    #[test]
    fn with_status_overrides_default() {
        let resp = Response::empty().with_status(204);
        assert_eq!(resp.status(), 204);
    }

    #[test]
    #[should_panic]
    fn out_of_range_status_panics() {
        Response::new(999, Body::empty());
    }

    #[test]
    fn take_body_is_one_shot() {
        let mut resp = Response::text("ok");
        assert!(resp.take_body().is_some());
        assert!(resp.take_body().is_none());
    }
}
