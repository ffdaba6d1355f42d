//! The server orchestrator: configuration, lifecycle, plugin hooks,
//! middleware dispatch, and error routing (§4.1, §4.5, §7).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use crate::capabilities::ServerCapabilities;
use crate::config::{EnvSource, PartialServerConfig, ProcessEnv, ServerConfig};
use crate::error::{Error, ErrorStage};
use crate::lifecycle::LifecycleState;
use crate::middleware::{FetchHandler, Middleware, Pipeline};
use crate::plugin::Plugin;
use crate::request::Request;
use crate::response::Response;
use crate::transport::{Transport, UnsupportedTransport};
use crate::waituntil;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A user-supplied handler for errors that reach request stage. Its own
/// failures are logged and fall through to the default response (§4.5).
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, error: &'a Error, request: Option<&'a Request>) -> BoxFuture<'a, Response>;
}

impl<F, Fut> ErrorHandler for F
where
    F: Fn(&Error, Option<&Request>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn handle<'a>(&'a self, error: &'a Error, request: Option<&'a Request>) -> BoxFuture<'a, Response> {
        Box::pin(self(error, request))
    }
}

struct Inner {
    config: ServerConfig,
    plugins: Vec<Arc<dyn Plugin>>,
    pipeline: Pipeline,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    state: Mutex<LifecycleState>,
    capabilities: Mutex<Option<ServerCapabilities>>,
    background: waituntil::Registry,
    in_error_hook: AtomicBool,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
}

/// The server runtime: binds a listener (or bridge), dispatches requests
/// through the middleware chain into the user fetch handler, and manages
/// the full construct → serve → close lifecycle. Cheap to clone — clones
/// share the same underlying state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

/// Builds a [`Server`] from a fetch handler, optional middleware, plugins,
/// an error handler, and configuration.
pub struct Builder {
    fetch: Arc<dyn FetchHandler>,
    middleware: Vec<Arc<dyn Middleware>>,
    plugins: Vec<Arc<dyn Plugin>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
    config: PartialServerConfig,
    transport: Option<Box<dyn Transport>>,
}

impl Builder {
    pub fn new(fetch: impl FetchHandler) -> Self {
        Builder {
            fetch: Arc::new(fetch),
            middleware: Vec::new(),
            plugins: Vec::new(),
            error_handler: None,
            config: PartialServerConfig::default(),
            transport: None,
        }
    }

    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn plugin(mut self, plugin: impl Plugin) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    pub fn error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn config(mut self, config: PartialServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the transport used by `serve()`. Defaults to the native
    /// TCP/TLS transport; tests substitute `UnsupportedTransport` or a fake
    /// to exercise dispatch without binding a real socket.
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Server {
        self.build_with_env(&ProcessEnv)
    }

    pub fn build_with_env(self, env: &dyn EnvSource) -> Server {
        let config = ServerConfig::resolve(self.config, env);
        let pipeline = Pipeline::new(self.middleware, self.fetch);
        let transport = self
            .transport
            .unwrap_or_else(|| Box::new(UnsupportedTransport::new("no transport configured")));
        Server {
            inner: Arc::new(Inner {
                config,
                plugins: self.plugins,
                pipeline,
                error_handler: self.error_handler,
                state: Mutex::new(LifecycleState::Constructed),
                capabilities: Mutex::new(None),
                background: waituntil::Registry::new(),
                in_error_hook: AtomicBool::new(false),
                transport: tokio::sync::Mutex::new(transport),
            }),
        }
    }
}

impl Server {
    pub fn builder(fetch: impl FetchHandler) -> Builder {
        Builder::new(fetch)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock().unwrap()
    }

    pub fn is_serving(&self) -> bool {
        self.state() == LifecycleState::Serving
    }

    pub fn capabilities(&self) -> Option<ServerCapabilities> {
        self.inner.capabilities.lock().unwrap().clone()
    }

    pub(crate) fn background_registry(&self) -> waituntil::Registry {
        self.inner.background.clone()
    }

    fn transition(&self, next: LifecycleState) {
        let mut state = self.inner.state.lock().unwrap();
        if state.can_transition_to(next) {
            debug!(from = %*state, to = %next, "osrv::lifecycle");
            *state = next;
        } else {
            warn!(from = %*state, attempted = %next, "osrv::lifecycle illegal transition");
        }
    }

    fn fail(&self) {
        self.transition(LifecycleState::Failed);
    }

    /// Binds the transport and transitions Constructed → Serving. Idempotent:
    /// a second call while already serving is a no-op that returns `Ok(())`.
    pub async fn serve(&self) -> Result<(), Error> {
        if self.is_serving() {
            return Ok(());
        }

        self.transition(LifecycleState::Registering);
        for plugin in &self.inner.plugins {
            if let Err(err) = plugin.on_register().await {
                error!(plugin = plugin.name(), error = %err, "osrv::serve onRegister failed");
                self.notify_error(ErrorStage::Register, &err, None).await;
                self.fail();
                return Err(err);
            }
        }

        self.transition(LifecycleState::Starting);
        for plugin in &self.inner.plugins {
            if let Err(err) = plugin.on_before_serve().await {
                error!(plugin = plugin.name(), error = %err, "osrv::serve onBeforeServe failed");
                self.notify_error(ErrorStage::BeforeServe, &err, None).await;
                self.fail();
                return Err(err);
            }
        }

        let capabilities = {
            let mut transport = self.inner.transport.lock().await;
            match transport.bind(&self.inner.config, self.clone()).await {
                Ok(caps) => caps,
                Err(err) => {
                    error!(error = %err, "osrv::serve transport bind failed");
                    self.notify_error(ErrorStage::Transport, &err, None).await;
                    self.fail();
                    return Err(err);
                }
            }
        };
        *self.inner.capabilities.lock().unwrap() = Some(capabilities);

        self.transition(LifecycleState::Serving);
        for plugin in &self.inner.plugins {
            if let Err(err) = plugin.on_after_serve().await {
                error!(plugin = plugin.name(), error = %err, "osrv::serve onAfterServe failed");
                self.notify_error(ErrorStage::AfterServe, &err, None).await;
                self.fail();
                return Err(err);
            }
        }

        debug!("osrv::serve ready");
        Ok(())
    }

    /// Transitions Serving → Closed. `force=true` skips the background-task
    /// drain. Exit is guaranteed: a graceful drain that exceeds
    /// `gracefulTimeout` is logged and close proceeds regardless.
    pub async fn close(&self, force: bool) -> Result<(), Error> {
        self.transition(LifecycleState::Draining);

        for plugin in &self.inner.plugins {
            if let Err(err) = plugin.on_before_close().await {
                error!(plugin = plugin.name(), error = %err, "osrv::close onBeforeClose failed");
                self.notify_error(ErrorStage::BeforeClose, &err, None).await;
            }
        }

        let transport_close = {
            let mut transport = self.inner.transport.lock().await;
            transport
                .close(
                    force,
                    self.inner.config.graceful_shutdown.graceful_timeout,
                    self.inner.config.graceful_shutdown.force_timeout,
                )
                .await
        };
        if let Err(err) = transport_close {
            error!(error = %err, "osrv::close transport close failed");
            self.notify_error(ErrorStage::Transport, &err, None).await;
        }

        if !force {
            let settled = self
                .inner
                .background
                .drain(self.inner.config.graceful_shutdown.graceful_timeout)
                .await;
            if !settled {
                warn!("osrv::close graceful drain timed out; proceeding");
            }
        }

        for plugin in &self.inner.plugins {
            if let Err(err) = plugin.on_after_close().await {
                error!(plugin = plugin.name(), error = %err, "osrv::close onAfterClose failed");
                self.notify_error(ErrorStage::AfterClose, &err, None).await;
            }
        }

        self.transition(LifecycleState::Closed);
        debug!("osrv::close complete");
        Ok(())
    }

    /// Runs the middleware chain into the user fetch handler, routing any
    /// failure through error-stage handling. Always produces a response —
    /// callers (transports) never see a bare request-stage error.
    pub async fn dispatch(&self, mut request: Request) -> Response {
        match self.inner.pipeline.dispatch(&mut request).await {
            Ok(response) => response,
            Err(err) => self.handle_request_error(err, Some(&request)).await,
        }
    }

    async fn handle_request_error(&self, err: Error, request: Option<&Request>) -> Response {
        warn!(error = %err, "osrv::dispatch request failed");
        self.notify_error(ErrorStage::Request, &err, request).await;

        if err.is_request_limit_exceeded() {
            if let Error::RequestLimitExceeded {
                max_bytes,
                actual_bytes,
            } = &err
            {
                let body = serde_json::json!({
                    "ok": false,
                    "error": "Request body too large",
                    "maxBytes": max_bytes,
                    "actualBytes": actual_bytes,
                })
                .to_string();
                return Response::json_raw(body).with_status(413);
            }
        }

        if let Some(handler) = &self.inner.error_handler {
            return handler.handle(&err, request).await;
        }

        self.default_error_response(&err)
    }

    fn default_error_response(&self, err: &Error) -> Response {
        let body = if self.inner.config.is_production {
            serde_json::json!({
                "ok": false,
                "error": "Internal Server Error",
            })
        } else {
            serde_json::json!({
                "ok": false,
                "error": "Internal Server Error",
                "details": err.to_string(),
                "stack": format!("{err:?}"),
            })
        };
        Response::json_raw(body.to_string()).with_status(500)
    }

    /// Notifies every plugin's `on_error`, guarded against re-entrancy: a
    /// failure raised from inside a plugin's own `on_error` is logged and
    /// dropped rather than re-entering this loop (§4.1).
    async fn notify_error(&self, stage: ErrorStage, err: &Error, request: Option<&Request>) {
        if self
            .inner
            .in_error_hook
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(stage = %stage, error = %err, "osrv::onError re-entrant call dropped");
            return;
        }
        for plugin in &self.inner.plugins {
            plugin.on_error(stage, err, request).await;
        }
        self.inner.in_error_hook.store(false, Ordering::SeqCst);
    }
}
