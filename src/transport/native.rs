//! The native TCP/TLS transport: binds a real listener, decodes HTTP/1.1 and
//! HTTP/2 wire requests through `hyper_util`'s combined connection builder,
//! and writes responses back.
//!
//! Grounded on `rtrtr`'s `http::Server::single_listener` (the
//! accept-loop-spawns-`hyper_util::server::conn::auto::Builder` shape) and
//! on `ckir-rsdev`'s TLS material loading.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::body::Body;
use crate::capabilities::ServerCapabilities;
use crate::common::drain;
use crate::config::{PemSource, ServerConfig};
use crate::error::Error;
use crate::headers::Headers;
use crate::request::Request;
use crate::runtime::{HttpVersion, Protocol, RawHandle, RuntimeContext};
use crate::server::Server;
use crate::transport::Transport;

/// The bound TCP/TLS transport.
pub struct NativeTransport {
    shutdown: Option<drain::Signal>,
    accept_task: Option<JoinHandle<()>>,
    connections: Arc<StdMutex<Vec<JoinHandle<()>>>>,
}

impl Default for NativeTransport {
    fn default() -> Self {
        NativeTransport {
            shutdown: None,
            accept_task: None,
            connections: Arc::new(StdMutex::new(Vec::new())),
        }
    }
}

impl NativeTransport {
    pub fn new() -> Self {
        NativeTransport::default()
    }
}

fn load_tls_acceptor(config: &ServerConfig) -> Result<TlsAcceptor, Error> {
    let tls = &config.tls;
    let cert_source = tls
        .cert
        .as_ref()
        .ok_or_else(|| Error::transport("https protocol requires tls.cert"))?;
    let key_source = tls
        .key
        .as_ref()
        .ok_or_else(|| Error::transport("https protocol requires tls.key"))?;

    let cert_pem = read_pem(cert_source)?;
    let key_pem = read_pem(key_source)?;

    let certs = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(Error::transport)?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(Error::transport)?
        .ok_or_else(|| Error::transport("no private key found in tls.key"))?;

    let mut server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(Error::transport)?;

    if config.http2 {
        server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    } else {
        server_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    }

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn read_pem(source: &PemSource) -> Result<String, Error> {
    match source {
        PemSource::Inline(text) => Ok(text.clone()),
        PemSource::Path(path) => std::fs::read_to_string(path).map_err(Error::transport),
    }
}

#[async_trait]
impl Transport for NativeTransport {
    async fn bind(&mut self, config: &ServerConfig, dispatcher: Server) -> Result<ServerCapabilities, Error> {
        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port)
            .parse()
            .map_err(Error::transport)?;
        let listener = TcpListener::bind(addr).await.map_err(Error::transport)?;
        debug!(%addr, "osrv::serve listening");

        let tls_acceptor = if config.protocol == Protocol::Https {
            Some(load_tls_acceptor(config)?)
        } else {
            None
        };

        let mut http2_negotiated = config.http2 && tls_acceptor.is_some();
        if config.protocol == Protocol::Https && config.http2 && tls_acceptor.is_none() {
            warn!("osrv::serve ALPN h2 unavailable, falling back to HTTP/1.1");
            http2_negotiated = false;
        }

        let capabilities = match config.protocol {
            Protocol::Http => ServerCapabilities::native(false, config.http2),
            Protocol::Https => {
                let mut caps = ServerCapabilities::native(true, config.http2);
                caps.http2 = http2_negotiated;
                caps
            }
        };

        let (signal, watch) = drain::channel();
        let max_body = config.limits.max_request_body_bytes;
        let request_timeout = config.limits.request_timeout;
        let trust_proxy = config.trust_proxy;
        let protocol = config.protocol;
        let connections = self.connections.clone();

        let accept_task = tokio::spawn(async move {
            let mut watch = watch;
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, peer_addr) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(error = %err, "osrv::serve accept failed");
                                continue;
                            }
                        };
                        let dispatcher = dispatcher.clone();
                        let tls_acceptor = tls_acceptor.clone();
                        let guard = watch.guard();
                        let handle = tokio::spawn(async move {
                            let _guard = guard;
                            if let Err(err) = serve_connection(
                                stream,
                                peer_addr,
                                tls_acceptor,
                                protocol,
                                dispatcher,
                                max_body,
                                request_timeout,
                                trust_proxy,
                            )
                            .await
                            {
                                debug!(error = %err, "osrv::serve connection ended with error");
                            }
                        });
                        let mut connections = connections.lock().unwrap();
                        connections.retain(|h| !h.is_finished());
                        connections.push(handle);
                    }
                    _ = watch.shutdown_triggered() => {
                        break;
                    }
                }
            }
        });

        self.shutdown = Some(signal);
        self.accept_task = Some(accept_task);

        Ok(capabilities)
    }

    async fn close(&mut self, force: bool, graceful_timeout: Duration, force_timeout: Duration) -> Result<(), Error> {
        let mut needs_forced_abort = force;
        if let Some(signal) = self.shutdown.take() {
            let draining = signal.drain();
            if !force && tokio::time::timeout(graceful_timeout, draining.wait()).await.is_err() {
                warn!("osrv::close graceful timeout waiting for connections to drain; forcing close");
                needs_forced_abort = true;
            }
        }

        if needs_forced_abort {
            let handles = std::mem::take(&mut *self.connections.lock().unwrap());
            for handle in &handles {
                handle.abort();
            }
            if tokio::time::timeout(force_timeout, futures_util::future::join_all(handles))
                .await
                .is_err()
            {
                warn!("osrv::close forceTimeout exceeded waiting for connections to abort; abandoning them");
            }
        }

        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    protocol: Protocol,
    dispatcher: Server,
    max_body: u64,
    request_timeout: Duration,
    trust_proxy: bool,
) -> Result<(), Error> {
    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let dispatcher = dispatcher.clone();
        async move {
            let response = handle_wire_request(
                req,
                peer_addr,
                protocol,
                &dispatcher,
                max_body,
                trust_proxy,
            )
            .await;
            Ok::<_, std::convert::Infallible>(response)
        }
    });

    let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());

    let result = if let Some(acceptor) = tls_acceptor {
        let tls_stream = tokio::time::timeout(request_timeout, acceptor.accept(stream))
            .await
            .map_err(|_| Error::transport("tls handshake timed out"))?
            .map_err(Error::transport)?;
        tokio::time::timeout(
            request_timeout,
            builder.serve_connection_with_upgrades(TokioIo::new(tls_stream), service),
        )
        .await
        .map_err(|_| Error::transport("connection idle timeout exceeded"))?
    } else {
        tokio::time::timeout(
            request_timeout,
            builder.serve_connection_with_upgrades(TokioIo::new(stream), service),
        )
        .await
        .map_err(|_| Error::transport("connection idle timeout exceeded"))?
    };

    result.map_err(|err| Error::transport(err.to_string()))
}

/// Wraps a raw IPv6 literal in brackets so it can appear as the host part of
/// an authority (`::1` -> `[::1]`). Leaves already-bracketed and
/// non-IPv6-shaped hosts untouched.
fn bracket_ipv6_host(host: &str) -> String {
    if host.starts_with('[') || host.matches(':').count() < 2 {
        host.to_string()
    } else {
        format!("[{host}]")
    }
}

fn resolve_url(req: &hyper::Request<Incoming>, protocol: Protocol, bound_hostname: &str) -> http::Uri {
    if req.uri().scheme().is_some() && req.uri().authority().is_some() {
        return req.uri().clone();
    }

    let host_header = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok());

    let authority = match host_header {
        Some(h) if !h.is_empty() => bracket_ipv6_host(h),
        _ => bracket_ipv6_host(bound_hostname),
    };

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    format!("{}://{}{}", protocol.as_str(), authority, path_and_query)
        .parse()
        .unwrap_or_else(|_| {
            format!("{}://{}/", protocol.as_str(), bracket_ipv6_host(bound_hostname))
                .parse()
                .unwrap_or_else(|_| http::Uri::from_static("/"))
        })
}

fn resolve_ip(req: &hyper::Request<Incoming>, peer_addr: SocketAddr, trust_proxy: bool) -> Option<String> {
    if trust_proxy {
        if let Some(forwarded) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    Some(peer_addr.ip().to_string())
}

fn is_websocket_handshake(req: &hyper::Request<Incoming>) -> bool {
    let has_token = |name: http::header::HeaderName, token: &str| {
        req.headers()
            .get(&name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').any(|part| part.trim().eq_ignore_ascii_case(token)))
            .unwrap_or(false)
    };
    has_token(http::header::CONNECTION, "upgrade")
        && has_token(http::header::UPGRADE, "websocket")
        && req.headers().contains_key("sec-websocket-key")
}

async fn handle_wire_request(
    mut req: hyper::Request<Incoming>,
    peer_addr: SocketAddr,
    protocol: Protocol,
    dispatcher: &Server,
    max_body: u64,
    trust_proxy: bool,
) -> hyper::Response<http_body_util::combinators::BoxBody<Bytes, Error>> {
    let bound_hostname = dispatcher.config().hostname.clone();
    let url = resolve_url(&req, protocol, &bound_hostname);
    let method = req.method().clone();
    let http_version = HttpVersion::from(req.version());
    let ip = resolve_ip(&req, peer_addr, trust_proxy);
    let headers = Headers::from_header_map(req.headers());

    let pending_upgrade = if is_websocket_handshake(&req) {
        Some(hyper::upgrade::on(&mut req))
    } else {
        None
    };

    let (_parts, incoming) = req.into_parts();
    let body = if !Request::method_allows_body(&method) {
        Body::empty()
    } else {
        let stream = incoming
            .into_data_stream()
            .map(|chunk| chunk.map_err(Error::transport));
        Body::from_stream(stream).limited(max_body)
    };

    let runtime = RuntimeContext::new(
        "native",
        protocol,
        http_version,
        None,
        Some(peer_addr.to_string()),
        std::collections::HashMap::new(),
        RawHandle::Native {
            peer_addr: Some(peer_addr),
        },
        None,
    );

    let wait_until = crate::waituntil::WaitUntil::new(dispatcher.background_registry());
    let mut request = Request::new(url, method, headers, body, runtime, ip, wait_until);
    if let Some(on_upgrade) = pending_upgrade {
        request.set_websocket_upgrade(on_upgrade);
    }

    let mut response = dispatcher.dispatch(request).await;

    let mut builder = hyper::Response::builder().status(response.status());
    let mut response_headers = response.headers().clone();
    if response.status() != 101 {
        // A 101 response's Connection/Upgrade headers are exactly the
        // hop-by-hop ones this would otherwise strip, and are mandatory for
        // the handshake itself.
        response_headers.strip_hop_by_hop();
    }
    for (name, value) in response_headers.iter() {
        builder = builder.header(name, value);
    }

    let body = response.take_body().unwrap_or_else(Body::empty);
    let boxed_body = StreamBody::new(body.into_stream().map(|chunk| chunk.map(Frame::data))).boxed();

    builder.body(boxed_body).unwrap_or_else(|_| {
        let empty = http_body_util::Empty::<Bytes>::new().map_err(|never| match never {});
        hyper::Response::new(empty.boxed())
    })
}
