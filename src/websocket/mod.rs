//! RFC 6455 WebSocket upgrade and message handle (§4.4, §6.2).

pub mod frame;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use base64::Engine;
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::config::WebSocketLimits;
use crate::error::Error;
use crate::request::Request;
use frame::{decode_client_frame, encode_server_frame, CloseReason, Opcode};

const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a client's
/// `Sec-WebSocket-Key`: `base64(SHA1(key + GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(HANDSHAKE_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// One inbound application message (a coalesced, unfragmented text or
/// binary frame).
#[derive(Debug, Clone)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

enum Outbound {
    Message(Message),
    Close { code: u16, reason: String },
}

/// A handle to an open (or opening) WebSocket connection.
///
/// Sends issued before the handshake is confirmed (relevant on the bridge
/// transport, where a host may allocate a socket id before its own upgrade
/// completes) are queued locally, bounded by `maxBufferedBytes`, and
/// flushed in call order once [`WebSocketHandle::mark_open`] runs.
pub struct WebSocketHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    incoming: Mutex<mpsc::Receiver<Message>>,
    is_open: Arc<AtomicBool>,
    is_done: Arc<AtomicBool>,
    pending: StdMutex<VecDeque<Outbound>>,
    pending_bytes: StdMutex<u64>,
    max_buffered_bytes: u64,
}

impl WebSocketHandle {
    fn message_len(message: &Message) -> usize {
        match message {
            Message::Text(s) => s.len(),
            Message::Binary(b) => b.len(),
        }
    }

    fn enqueue(&self, item: Outbound) -> Result<(), Error> {
        if self.is_open.load(Ordering::SeqCst) {
            let _ = self.outbound.send(item);
            return Ok(());
        }
        let len = match &item {
            Outbound::Message(m) => Self::message_len(m) as u64,
            Outbound::Close { reason, .. } => reason.len() as u64,
        };
        let mut pending_bytes = self.pending_bytes.lock().unwrap();
        if *pending_bytes + len > self.max_buffered_bytes {
            return Err(Error::handler("websocket send buffer exceeded maxBufferedBytes"));
        }
        *pending_bytes += len;
        self.pending.lock().unwrap().push_back(item);
        Ok(())
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), Error> {
        self.enqueue(Outbound::Message(Message::Text(text.into())))
    }

    pub fn send_bytes(&self, bytes: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.enqueue(Outbound::Message(Message::Binary(bytes.into())))
    }

    pub fn close(&self, code: Option<u16>, reason: Option<String>) -> Result<(), Error> {
        self.enqueue(Outbound::Close {
            code: code.unwrap_or(1000),
            reason: reason.unwrap_or_default(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst) && !self.is_done.load(Ordering::SeqCst)
    }

    /// A terminal signal: resolves once the socket has fully closed.
    pub fn is_done(&self) -> bool {
        self.is_done.load(Ordering::SeqCst)
    }

    /// Marks the handshake confirmed, flushing anything queued in call
    /// order. Called immediately after a successful native upgrade, or once
    /// a bridge host confirms its side of the upgrade.
    pub fn mark_open(&self) {
        self.is_open.store(true, Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap();
        while let Some(item) = pending.pop_front() {
            let _ = self.outbound.send(item);
        }
        *self.pending_bytes.lock().unwrap() = 0;
    }

    /// The next inbound message, or `None` once the socket has closed.
    pub async fn recv(&self) -> Option<Message> {
        self.incoming.lock().await.recv().await
    }
}

/// Performs a WebSocket upgrade on `request`, returning a handle usable
/// immediately. Fails if the request was already upgraded, or never carried
/// a pending upgrade (no prior successful handshake negotiation by the
/// transport).
///
/// The handle is returned before the underlying transport upgrade future
/// resolves: sends issued in the gap are queued exactly as the bridge
/// transport's pre-open case is (§4.4), and flushed once the connection is
/// actually ready.
pub fn upgrade(request: &mut Request, limits: WebSocketLimits) -> Result<Arc<WebSocketHandle>, Error> {
    if request.is_websocket_upgraded() {
        return Err(Error::handler("request was already upgraded to a websocket"));
    }
    let on_upgrade = request
        .take_websocket_upgrade()
        .ok_or_else(|| Error::handler("request has no pending websocket upgrade"))?;

    let handle = spawn_pending_driver(limits, async move {
        let upgraded = on_upgrade.await.map_err(Error::transport)?;
        Ok(TokioIo::new(upgraded))
    });

    request.mark_websocket_upgraded();
    Ok(handle)
}

/// Builds a handle whose driver only starts once `stream_fut` resolves.
/// Sends issued before that point are queued, same as the pre-open bridge
/// case, then flushed in order once the real connection is ready.
fn spawn_pending_driver<F, S>(limits: WebSocketLimits, stream_fut: F) -> Arc<WebSocketHandle>
where
    F: Future<Output = Result<S, Error>> + Send + 'static,
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (incoming_tx, incoming_rx) = mpsc::channel(32);
    let is_open = Arc::new(AtomicBool::new(false));
    let is_done = Arc::new(AtomicBool::new(false));

    let handle = Arc::new(WebSocketHandle {
        outbound: outbound_tx,
        incoming: Mutex::new(incoming_rx),
        is_open: is_open.clone(),
        is_done: is_done.clone(),
        pending: StdMutex::new(VecDeque::new()),
        pending_bytes: StdMutex::new(0),
        max_buffered_bytes: limits.max_buffered_bytes,
    });

    let handle_for_task = handle.clone();
    tokio::spawn(async move {
        match stream_fut.await {
            Ok(stream) => {
                handle_for_task.mark_open();
                run_driver(stream, limits, outbound_rx, incoming_tx, is_done).await;
            }
            Err(err) => {
                warn!(error = %err, "osrv::websocket upgrade failed");
                is_done.store(true, Ordering::SeqCst);
            }
        }
    });

    handle
}

async fn run_driver<S>(
    mut stream: S,
    limits: WebSocketLimits,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    incoming_tx: mpsc::Sender<Message>,
    is_done: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let mut read_buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let mut ping_timer = tokio::time::interval(limits.ping_interval());
    ping_timer.tick().await;

    let close_reason = loop {
        tokio::select! {
            read_result = stream.read(&mut chunk) => {
                match read_result {
                    Ok(0) => break None,
                    Ok(n) => {
                        read_buf.extend_from_slice(&chunk[..n]);
                        match drain_frames(&mut read_buf, limits.max_frame_bytes, &incoming_tx, &mut stream).await {
                            Ok(should_close) if should_close => break Some((1000, String::new())),
                            Ok(_) => {}
                            Err(reason) => break Some((reason.code(), reason.reason_text().to_string())),
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "osrv::websocket read error");
                        break None;
                    }
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Message(Message::Text(text))) => {
                        if text.len() as u64 > limits.max_frame_bytes {
                            break Some((CloseReason::MessageTooBig.code(), CloseReason::MessageTooBig.reason_text().to_string()));
                        }
                        let frame = encode_server_frame(Opcode::Text, text.as_bytes());
                        if stream.write_all(&frame).await.is_err() {
                            break None;
                        }
                    }
                    Some(Outbound::Message(Message::Binary(bytes))) => {
                        if bytes.len() as u64 > limits.max_frame_bytes {
                            break Some((CloseReason::MessageTooBig.code(), CloseReason::MessageTooBig.reason_text().to_string()));
                        }
                        let frame = encode_server_frame(Opcode::Binary, &bytes);
                        if stream.write_all(&frame).await.is_err() {
                            break None;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        break Some((code, reason));
                    }
                    None => break None,
                }
            }
            _ = ping_timer.tick() => {
                let frame = encode_server_frame(Opcode::Ping, &[]);
                if stream.write_all(&frame).await.is_err() {
                    break None;
                }
            }
        }
    };

    if let Some((code, reason)) = close_reason {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        let frame = encode_server_frame(Opcode::Close, &payload);
        let _ = stream.write_all(&frame).await;
    }
    let _ = stream.shutdown().await;
    is_done.store(true, Ordering::SeqCst);
}

/// Decodes and dispatches every complete frame currently buffered in
/// `read_buf`, answering pings inline. Returns `Ok(true)` if a client close
/// frame was seen (the caller should echo a close and stop), or `Err` if a
/// limit/protocol violation requires an immediate close.
async fn drain_frames<S>(
    read_buf: &mut Vec<u8>,
    max_frame_bytes: u64,
    incoming_tx: &mpsc::Sender<Message>,
    stream: &mut S,
) -> Result<bool, CloseReason>
where
    S: AsyncWrite + Unpin,
{
    loop {
        match decode_client_frame(read_buf, max_frame_bytes)? {
            None => return Ok(false),
            Some((frame, consumed)) => {
                read_buf.drain(..consumed);
                match frame.opcode {
                    Opcode::Text => {
                        if let Ok(text) = String::from_utf8(frame.payload) {
                            let _ = incoming_tx.send(Message::Text(text)).await;
                        }
                    }
                    Opcode::Binary => {
                        let _ = incoming_tx.send(Message::Binary(frame.payload)).await;
                    }
                    Opcode::Ping => {
                        let pong = encode_server_frame(Opcode::Pong, &frame.payload);
                        let _ = stream.write_all(&pong).await;
                    }
                    Opcode::Pong => {}
                    Opcode::Close => return Ok(true),
                    Opcode::Continuation => {
                        warn!("osrv::websocket unexpected continuation frame");
                    }
                }
            }
        }
    }
}
