//! The JSON bridge transport: lets a foreign host invoke `dispatch` without
//! a native socket, trading the real listener for a request/response
//! envelope (§4.3, §6.3).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::body::Body;
use crate::capabilities::ServerCapabilities;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::headers::Headers;
use crate::request::Request;
use crate::response::Response;
use crate::runtime::{HttpVersion, Protocol, RawHandle, RuntimeContext};
use crate::server::Server;
use crate::transport::Transport;

/// Header whose presence on a 101 response tells the host to complete a
/// WebSocket upgrade out-of-band.
pub const WEBSOCKET_UPGRADE_HINT_HEADER: &str = "x-osrv-websocket-upgrade";

#[derive(Debug, Deserialize)]
pub struct BridgeRequestEnvelope {
    pub request: BridgeRequest,
    pub runtime: BridgeRuntime,
    #[serde(default)]
    pub context: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct BridgeRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    #[serde(rename = "bodyBase64")]
    pub body_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BridgeRuntime {
    pub provider: String,
    pub runtime: String,
    pub protocol: String,
    #[serde(rename = "httpVersion")]
    pub http_version: String,
    pub tls: bool,
    pub ip: Option<String>,
    #[serde(rename = "localAddress")]
    pub local_address: Option<String>,
    #[serde(rename = "remoteAddress")]
    pub remote_address: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BridgeResponseEnvelope {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(rename = "bodyBase64")]
    pub body_base64: Option<String>,
}

fn parse_http_version(version: &str) -> HttpVersion {
    match version {
        "1.0" => HttpVersion::Http10,
        "2" => HttpVersion::Http2,
        _ => HttpVersion::Http11,
    }
}

/// Decodes a bridge envelope into a `Request`, runs it through `dispatch`,
/// and re-encodes the result. The only I/O is base64 (de)coding; no socket
/// is involved.
pub async fn dispatch_envelope(
    server: &Server,
    envelope: BridgeRequestEnvelope,
) -> Result<BridgeResponseEnvelope, Error> {
    let url: http::Uri = envelope
        .request
        .url
        .parse()
        .map_err(|e| Error::handler(format!("invalid bridge request url: {e}")))?;
    let method: http::Method = envelope
        .request
        .method
        .parse()
        .map_err(|e| Error::handler(format!("invalid bridge request method: {e}")))?;
    let headers = Headers::from_pairs(envelope.request.headers);

    let body = match envelope.request.body_base64 {
        Some(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| Error::handler(format!("invalid bridge request body: {e}")))?;
            Body::from_bytes(bytes)
        }
        None => Body::empty(),
    };

    let protocol = if envelope.runtime.protocol == "https" {
        Protocol::Https
    } else {
        Protocol::Http
    };

    let runtime = RuntimeContext::new(
        format!("{}:{}", envelope.runtime.provider, envelope.runtime.runtime),
        protocol,
        parse_http_version(&envelope.runtime.http_version),
        envelope.runtime.local_address,
        envelope.runtime.remote_address,
        envelope.runtime.env,
        RawHandle::Bridge {
            provider: envelope.runtime.provider,
            runtime: envelope.runtime.runtime,
        },
        envelope.runtime.request_id,
    );

    let wait_until = crate::waituntil::WaitUntil::new(server.background_registry());
    let request = Request::new(url, method, headers, body, runtime, envelope.runtime.ip, wait_until);

    let mut response = server.dispatch(request).await;
    encode_response(&mut response).await
}

async fn encode_response(response: &mut Response) -> Result<BridgeResponseEnvelope, Error> {
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let body_base64 = match response.take_body() {
        Some(body) if !body.is_empty() => {
            let bytes = crate::body::to_bytes(body).await?;
            Some(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        _ => None,
    };

    Ok(BridgeResponseEnvelope {
        status: response.status(),
        headers,
        body_base64,
    })
}

/// The bridge transport itself implements [`Transport`] as a no-op bind:
/// there is no listener to accept connections on, since the host drives
/// dispatch directly via [`dispatch_envelope`].
pub struct BridgeTransport {
    provider: String,
}

impl BridgeTransport {
    pub fn new(provider: impl Into<String>) -> Self {
        BridgeTransport {
            provider: provider.into(),
        }
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn bind(&mut self, _config: &ServerConfig, _dispatcher: Server) -> Result<ServerCapabilities, Error> {
        Ok(ServerCapabilities::bridge(self.provider.clone()))
    }

    async fn close(&mut self, _force: bool, _graceful_timeout: Duration, _force_timeout: Duration) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    async fn echo_path(req: &mut Request) -> Result<Response, Error> {
        Ok(Response::text(req.url().path().to_string()))
    }

    fn test_server() -> Server {
        Server::builder(echo_path).build()
    }

    #[tokio::test]
    async fn round_trips_status_headers_and_body() {
        let server = test_server();
        let envelope = BridgeRequestEnvelope {
            request: BridgeRequest {
                url: "http://localhost/hello".to_string(),
                method: "GET".to_string(),
                headers: vec![],
                body_base64: None,
            },
            runtime: BridgeRuntime {
                provider: "cloudflare".to_string(),
                runtime: "workerd".to_string(),
                protocol: "https".to_string(),
                http_version: "1.1".to_string(),
                tls: true,
                ip: Some("203.0.113.1".to_string()),
                local_address: None,
                remote_address: None,
                env: HashMap::new(),
                request_id: None,
            },
            context: serde_json::Value::Null,
        };
        let response = dispatch_envelope(&server, envelope).await.unwrap();
        assert_eq!(response.status, 200);
        let body = base64::engine::general_purpose::STANDARD
            .decode(response.body_base64.unwrap())
            .unwrap();
        assert_eq!(body, b"/hello");
    }
}
