//! Black-box coverage of a real WebSocket upgrade and echo round-trip over
//! loopback TCP (scenario 7), driven through the native transport rather
//! than any in-process shortcut.

use std::time::Duration;

use osrv::transport::NativeTransport;
use osrv::websocket::{accept_key, upgrade, Message};
use osrv::{PartialServerConfig, Request, Response, Server, WebSocketLimits};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn mask_client_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mask = [0x37, 0x21, 0xa9, 0x04];
    let mut out = vec![0x80 | opcode, 0x80 | payload.len() as u8];
    out.extend_from_slice(&mask);
    for (i, b) in payload.iter().enumerate() {
        out.push(b ^ mask[i % 4]);
    }
    out
}

/// Decodes one unmasked server-to-client frame (servers never mask, so this
/// is simpler than the client-frame decoder the server itself uses).
fn decode_unmasked_frame(buf: &[u8]) -> Option<(u8, Vec<u8>, usize)> {
    if buf.len() < 2 {
        return None;
    }
    let opcode = buf[0] & 0x0F;
    let mut offset = 2usize;
    let mut len = (buf[1] & 0x7F) as u64;
    if len == 126 {
        if buf.len() < offset + 2 {
            return None;
        }
        len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as u64;
        offset += 2;
    } else if len == 127 {
        if buf.len() < offset + 8 {
            return None;
        }
        let mut b = [0u8; 8];
        b.copy_from_slice(&buf[offset..offset + 8]);
        len = u64::from_be_bytes(b);
        offset += 8;
    }
    let total = offset + len as usize;
    if buf.len() < total {
        return None;
    }
    Some((opcode, buf[offset..total].to_vec(), total))
}

async fn read_more(stream: &mut TcpStream, buf: &mut Vec<u8>) {
    let mut chunk = [0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk))
        .await
        .expect("read timed out")
        .expect("read failed");
    assert!(n > 0, "connection closed early");
    buf.extend_from_slice(&chunk[..n]);
}

#[tokio::test]
async fn websocket_echo_round_trip() {
    let server = Server::builder(|req: &mut Request| async move {
        let client_key = req
            .headers()
            .get("sec-websocket-key")
            .expect("handshake request carries a key")
            .to_string();
        let handle = upgrade(req, WebSocketLimits::default())?;

        let reader = handle.clone();
        tokio::spawn(async move {
            if let Some(Message::Text(text)) = reader.recv().await {
                let _ = reader.send_text(text);
            }
        });

        Ok(Response::websocket_upgrade(accept_key(&client_key)))
    })
    .config(PartialServerConfig {
        port: Some(18183),
        hostname: Some("127.0.0.1".to_string()),
        ..PartialServerConfig::default()
    })
    .transport(Box::new(NativeTransport::new()))
    .build();

    server.serve().await.expect("serve should bind");

    let mut stream = TcpStream::connect("127.0.0.1:18183").await.unwrap();
    let request = concat!(
        "GET / HTTP/1.1\r\n",
        "Host: 127.0.0.1\r\n",
        "Upgrade: websocket\r\n",
        "Connection: Upgrade\r\n",
        "Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n",
        "Sec-WebSocket-Version: 13\r\n",
        "\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        read_more(&mut stream, &mut buf).await;
    }
    let header_end = buf.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
    let header_text = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    assert!(header_text.starts_with("HTTP/1.1 101"), "unexpected status line: {header_text}");
    assert!(
        header_text
            .to_ascii_lowercase()
            .contains("sec-websocket-accept: s3pplmbitxaq9kygzzhzrbk+xoo="),
        "missing or wrong accept key: {header_text}"
    );
    let mut leftover = buf[header_end..].to_vec();

    stream
        .write_all(&mask_client_frame(0x1, b"hello"))
        .await
        .unwrap();

    let (opcode, payload, _consumed) = loop {
        if let Some(decoded) = decode_unmasked_frame(&leftover) {
            break decoded;
        }
        read_more(&mut stream, &mut leftover).await;
    };
    assert_eq!(opcode, 0x1, "expected a text frame");
    assert_eq!(payload, b"hello");

    server.close(true).await.expect("close should succeed");
}
