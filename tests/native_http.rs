//! Black-box coverage of the native transport's basic request/response path
//! (scenario 1) and its 413 body-limit shape (scenario 4), driven over a
//! real loopback TCP socket rather than `Server::dispatch` directly.

use std::time::Duration;

use osrv::body::to_bytes;
use osrv::transport::NativeTransport;
use osrv::{PartialServerConfig, Request, Response, Server, ServerSecurityLimits};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
            Ok(Err(_)) => break,
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn basic_get_returns_ok_over_the_wire() {
    let server = Server::builder(|_req: &mut Request| async { Ok(Response::text("ok")) })
        .config(PartialServerConfig {
            port: Some(18181),
            hostname: Some("127.0.0.1".to_string()),
            ..PartialServerConfig::default()
        })
        .transport(Box::new(NativeTransport::new()))
        .build();

    server.serve().await.expect("serve should bind");

    let mut stream = TcpStream::connect("127.0.0.1:18181").await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;

    assert!(response.starts_with("HTTP/1.1 200"), "unexpected status line: {response}");
    assert!(response.contains("ok"), "unexpected body: {response}");

    server.close(false).await.expect("close should succeed");
}

#[tokio::test]
async fn oversized_body_yields_413_with_documented_shape() {
    let server = Server::builder(|req: &mut Request| async move {
        let body = req.take_body()?;
        to_bytes(body).await?;
        Ok(Response::text("unreachable"))
    })
    .config(PartialServerConfig {
        port: Some(18182),
        hostname: Some("127.0.0.1".to_string()),
        limits: Some(ServerSecurityLimits {
            max_request_body_bytes: 4,
            ..ServerSecurityLimits::default()
        }),
        ..PartialServerConfig::default()
    })
    .transport(Box::new(NativeTransport::new()))
    .build();

    server.serve().await.expect("serve should bind");

    let mut stream = TcpStream::connect("127.0.0.1:18182").await.unwrap();
    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: 127.0.0.1\r\nContent-Length: 10\r\nConnection: close\r\n\r\n1234567890")
        .await
        .unwrap();
    let response = read_response(&mut stream).await;

    assert!(response.starts_with("HTTP/1.1 413"), "unexpected status line: {response}");
    assert!(response.contains("\"maxBytes\":4"), "unexpected body: {response}");
    assert!(response.contains("\"actualBytes\":10"), "unexpected body: {response}");

    server.close(false).await.expect("close should succeed");
}
