//! The onion-shaped middleware pipeline wrapping the user fetch handler.
//!
//! Grounded on the `Next`/boxed-handler pattern used for middleware chains
//! in Rust HTTP stacks: a `Next` cursor owns the remaining chain and the
//! terminal fetch handler, and calling it advances one step. Each
//! middleware decides whether to call `next` (continue the chain) or return
//! a `Response` directly (short-circuit).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::Response;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The user fetch handler: the innermost callable of the onion, invoked
/// once `next` has been called by every middleware ahead of it.
pub trait FetchHandler: Send + Sync + 'static {
    fn call<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<Response, Error>>;
}

impl<F, Fut> FetchHandler for F
where
    F: Fn(&mut Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    fn call<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(self(request))
    }
}

/// A single link in the middleware chain.
pub trait Middleware: Send + Sync + 'static {
    fn handle<'a>(
        &'a self,
        request: &'a mut Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Response, Error>>;
}

impl<F, Fut> Middleware for F
where
    F: Fn(&mut Request, Next<'_>) -> Fut + Send + Sync + 'static,
    for<'a> Fut: Future<Output = Result<Response, Error>> + Send + 'a,
{
    fn handle<'a>(
        &'a self,
        request: &'a mut Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<Response, Error>> {
        Box::pin(self(request, next))
    }
}

/// The remaining portion of the chain, from the current middleware's point
/// of view. Calling [`Next::run`] advances to the next middleware, or to
/// the terminal fetch handler once the chain is exhausted.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    fetch: &'a (dyn FetchHandler),
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], fetch: &'a dyn FetchHandler) -> Self {
        Next { chain, fetch }
    }

    /// Advances the chain by one step.
    pub async fn run(self, request: &mut Request) -> Result<Response, Error> {
        match self.chain.split_first() {
            Some((head, rest)) => head.handle(request, Next::new(rest, self.fetch)).await,
            None => self.fetch.call(request).await,
        }
    }
}

/// The assembled pipeline: an ordered middleware list plus the terminal
/// fetch handler.
pub struct Pipeline {
    chain: Vec<Arc<dyn Middleware>>,
    fetch: Arc<dyn FetchHandler>,
}

impl Pipeline {
    pub fn new(chain: Vec<Arc<dyn Middleware>>, fetch: Arc<dyn FetchHandler>) -> Self {
        Pipeline { chain, fetch }
    }

    /// Runs the full onion for one request: `m1.before, m2.before, …, fetch,
    /// …, m2.after, m1.after`, short-circuiting as soon as any middleware
    /// returns a response without calling `next`.
    pub async fn dispatch(&self, request: &mut Request) -> Result<Response, Error> {
        let next = Next::new(&self.chain, self.fetch.as_ref());
        next.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Body;
    use crate::headers::Headers;
    use crate::runtime::{HttpVersion, Protocol, RawHandle, RuntimeContext};
    use crate::waituntil::{Registry, WaitUntil};
    use http::{Method, Uri};
    use std::sync::Mutex;

    fn test_request() -> Request {
        Request::new(
            Uri::from_static("http://localhost/"),
            Method::GET,
            Headers::new(),
            Body::empty(),
            RuntimeContext::new(
                "native",
                Protocol::Http,
                HttpVersion::Http11,
                None,
                None,
                std::collections::HashMap::new(),
                RawHandle::Native { peer_addr: None },
                None,
            ),
            None,
            WaitUntil::new(Registry::new()),
        )
    }

    fn label_middleware(
        name: &'static str,
        trace: Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn Middleware> {
        Arc::new(move |request: &mut Request, next: Next<'_>| {
            let trace = trace.clone();
            async move {
                trace.lock().unwrap().push(format!("{name}-before"));
                let response = next.run(request).await;
                trace.lock().unwrap().push(format!("{name}-after"));
                response
            }
        })
    }

    #[tokio::test]
    async fn onion_order_is_strict_around_one_fetch_call() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let chain = vec![
            label_middleware("m1", trace.clone()),
            label_middleware("m2", trace.clone()),
        ];
        let fetch_trace = trace.clone();
        let fetch: Arc<dyn FetchHandler> = Arc::new(move |_req: &mut Request| {
            let fetch_trace = fetch_trace.clone();
            async move {
                fetch_trace.lock().unwrap().push("fetch".to_string());
                Ok(Response::text("ok"))
            }
        });
        let pipeline = Pipeline::new(chain, fetch);
        let mut request = test_request();
        let response = pipeline.dispatch(&mut request).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            trace.lock().unwrap().as_slice(),
            &["m1-before", "m2-before", "fetch", "m2-after", "m1-after"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_later_middleware_and_fetch() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let m1 = label_middleware("m1", trace.clone());
        let short_circuit: Arc<dyn Middleware> = Arc::new(|_req: &mut Request, _next: Next<'_>| async move {
            Ok(Response::new(204, Body::empty()))
        });
        let never_runs = label_middleware("m2", trace.clone());
        let fetch_trace = trace.clone();
        let fetch: Arc<dyn FetchHandler> = Arc::new(move |_req: &mut Request| {
            let fetch_trace = fetch_trace.clone();
            async move {
                fetch_trace.lock().unwrap().push("fetch".to_string());
                Ok(Response::text("ok"))
            }
        });
        let pipeline = Pipeline::new(vec![m1, short_circuit, never_runs], fetch);
        let mut request = test_request();
        let response = pipeline.dispatch(&mut request).await.unwrap();
        assert_eq!(response.status(), 204);
        assert_eq!(trace.lock().unwrap().as_slice(), &["m1-before", "m1-after"]);
    }
}
