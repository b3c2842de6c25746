//! Socket.IO client transport.
//!
//! Speaks Engine.IO v4 / Socket.IO v5 on the default namespace over a single
//! WebSocket. Requests are emitted with an ack id and resolved when the server
//! acknowledges; every other event the server emits becomes an
//! [`InboundMessage`].

use crate::connection::{Connection, InboundMessage};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One decoded Engine.IO frame (with its Socket.IO packet, if any).
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Packet {
    Open(Value),
    Close,
    Ping,
    Pong,
    Noop,
    Connect(Value),
    Disconnect,
    Event { ack_id: Option<u64>, args: Vec<Value> },
    Ack { ack_id: u64, args: Vec<Value> },
    ConnectError(Value),
    Unsupported(String),
}

fn parse_json_or_null(text: &str) -> Result<Value> {
    if text.is_empty() { Ok(Value::Null) } else { Ok(serde_json::from_str(text)?) }
}

fn split_ack_id(body: &str) -> (Option<u64>, &str) {
    let digits = body.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (None, body);
    }
    (body[..digits].parse().ok(), &body[digits..])
}

fn parse_args(ack_id: Option<u64>, body: &str) -> Result<Vec<Value>> {
    match serde_json::from_str::<Value>(body)? {
        Value::Array(args) => Ok(args),
        other => Err(ClientError::Connection(format!(
            "packet {ack_id:?} carries {other} instead of an argument array"
        ))),
    }
}

/// Decodes one WebSocket text frame.
pub(crate) fn parse_packet(frame: &str) -> Result<Packet> {
    let mut chars = frame.chars();
    let engine_type = chars.next().ok_or_else(|| ClientError::Connection("empty frame".to_string()))?;
    let rest = chars.as_str();

    match engine_type {
        '0' => Ok(Packet::Open(parse_json_or_null(rest)?)),
        '1' => Ok(Packet::Close),
        '2' => Ok(Packet::Ping),
        '3' => Ok(Packet::Pong),
        '6' => Ok(Packet::Noop),
        '4' => {
            let mut chars = rest.chars();
            let socket_type =
                chars.next().ok_or_else(|| ClientError::Connection("empty message packet".to_string()))?;
            let mut body = chars.as_str();
            // Non-default namespace prefix "/nsp,"; only the default namespace is used.
            if body.starts_with('/') {
                body = body.split_once(',').map_or("", |(_, tail)| tail);
            }

            match socket_type {
                '0' => Ok(Packet::Connect(parse_json_or_null(body)?)),
                '1' => Ok(Packet::Disconnect),
                '2' => {
                    let (ack_id, body) = split_ack_id(body);
                    Ok(Packet::Event { ack_id, args: parse_args(ack_id, body)? })
                }
                '3' => {
                    let (ack_id, body) = split_ack_id(body);
                    let ack_id = ack_id.ok_or_else(|| ClientError::Connection("ack without id".to_string()))?;
                    Ok(Packet::Ack { ack_id, args: parse_args(Some(ack_id), body)? })
                }
                '4' => Ok(Packet::ConnectError(parse_json_or_null(body)?)),
                _ => Ok(Packet::Unsupported(frame.to_string())),
            }
        }
        _ => Ok(Packet::Unsupported(frame.to_string())),
    }
}

/// Encodes an event emission, with the payload stringified the way the server expects.
pub(crate) fn encode_event(ack_id: u64, event: &str, payload: Option<&Value>) -> Result<String> {
    let payload = serde_json::to_string(payload.unwrap_or(&Value::Null))?;
    let args = serde_json::to_string(&[event, payload.as_str()])?;
    Ok(format!("42{ack_id}{args}"))
}

/// Maps an `http(s)://` server URL to its Socket.IO WebSocket endpoint.
pub(crate) fn websocket_url(server_url: &str) -> Result<String> {
    let (scheme, rest) = if let Some(rest) = server_url.strip_prefix("http://") {
        ("ws", rest)
    } else if let Some(rest) = server_url.strip_prefix("https://") {
        ("wss", rest)
    } else {
        return Err(ClientError::Connection(format!(
            "URL must start with http:// or https://, got: {}",
            server_url
        )));
    };
    Ok(format!("{}://{}/socket.io/?EIO=4&transport=websocket", scheme, rest.trim_end_matches('/')))
}

/// Socket.IO connection to a Pek server.
pub struct SocketIoConnection {
    id: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingAcks,
    next_ack_id: AtomicU64,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<InboundMessage>>>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for SocketIoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketIoConnection")
            .field("id", &self.id)
            .field("pending", &lock(&self.pending).len())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SocketIoConnection {
    /// Opens the WebSocket and completes the Engine.IO and Socket.IO handshakes.
    pub async fn connect(server_url: &str, connect_timeout: Duration) -> Result<Self> {
        let url = websocket_url(server_url)?;
        debug!(url = %url, "Opening WebSocket");

        let timed_out = || ClientError::Connection(format!("connecting to {server_url} timed out"));
        let (ws, _) = tokio::time::timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| timed_out())??;
        let (mut sink, mut stream) = ws.split();

        let id = tokio::time::timeout(connect_timeout, handshake(&mut sink, &mut stream))
            .await
            .map_err(|_| timed_out())??;
        info!(server = %server_url, client_id = %id, "Connected to Pek server");

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(run_writer(sink, outgoing_rx));
        let reader = tokio::spawn(run_reader(
            stream,
            outgoing.clone(),
            Arc::clone(&pending),
            inbound_tx,
            Arc::clone(&closed),
        ));

        Ok(Self {
            id,
            outgoing,
            pending,
            next_ack_id: AtomicU64::new(0),
            inbound: Mutex::new(Some(inbound_rx)),
            closed,
            reader,
            writer,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

async fn handshake(sink: &mut SplitSink<WsStream, Message>, stream: &mut SplitStream<WsStream>) -> Result<String> {
    let mut namespace_requested = false;

    while let Some(message) = stream.next().await {
        let message = message?;
        if !message.is_text() {
            continue;
        }

        match parse_packet(message.to_text()?)? {
            Packet::Open(open) => {
                debug!(open = %open, "Engine.IO session opened");
                sink.send(Message::text("40")).await?;
                namespace_requested = true;
            }
            Packet::Ping => sink.send(Message::text("3")).await?,
            Packet::Connect(connect) if namespace_requested => {
                return connect
                    .get("sid")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
                    .ok_or_else(|| ClientError::Connection(format!("connect packet without sid: {connect}")));
            }
            Packet::ConnectError(error) => {
                return Err(ClientError::Connection(format!("server refused connection: {error}")));
            }
            Packet::Close => break,
            other => debug!(packet = ?other, "Ignoring packet during handshake"),
        }
    }

    Err(ClientError::Connection("connection closed during handshake".to_string()))
}

async fn run_writer(mut sink: SplitSink<WsStream, Message>, mut outgoing: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = outgoing.recv().await {
        let is_close = message.is_close();
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "WebSocket write failed");
            break;
        }
        if is_close {
            break;
        }
    }
}

async fn run_reader(
    mut stream: SplitStream<WsStream>,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingAcks,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    closed: Arc<AtomicBool>,
) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "WebSocket read failed");
                break;
            }
        };
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_text() else {
            continue;
        };
        if text.is_empty() {
            continue;
        }

        let packet = match parse_packet(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                continue;
            }
        };

        match packet {
            Packet::Ping => {
                let _ = outgoing.send(Message::text("3"));
            }
            Packet::Ack { ack_id, args } => {
                let waiter = lock(&pending).remove(&ack_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(args.into_iter().next().unwrap_or(Value::Null)));
                    }
                    None => debug!(ack_id, "Ack for unknown or abandoned request"),
                }
            }
            Packet::Event { ack_id, args } => {
                let mut args = args.into_iter();
                let Some(Value::String(topic)) = args.next() else {
                    warn!("Event without a name");
                    continue;
                };
                if ack_id.is_some() {
                    debug!(topic = %topic, "Server requested an ack; not supported");
                }
                let payload = match args.next() {
                    Some(Value::String(raw)) => raw,
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                if inbound.send(InboundMessage { topic, payload }).is_err() {
                    debug!("Inbound stream dropped");
                }
            }
            Packet::Disconnect | Packet::Close => {
                info!("Server closed the connection");
                break;
            }
            Packet::ConnectError(error) => warn!(error = %error, "Server reported a connect error"),
            other => debug!(packet = ?other, "Ignoring packet"),
        }
    }

    fail_pending(&pending, &closed);
}

/// Registers an ack waiter unless the connection is already closed.
///
/// The closed flag is read under the `pending` lock, so a waiter is either
/// rejected here or failed by [`fail_pending`].
fn register_waiter(
    pending: &PendingAcks,
    closed: &AtomicBool,
    ack_id: u64,
) -> Result<oneshot::Receiver<Result<Value>>> {
    let mut pending = lock(pending);
    if closed.load(Ordering::SeqCst) {
        return Err(ClientError::Connection("connection is closed".to_string()));
    }
    let (tx, rx) = oneshot::channel();
    pending.insert(ack_id, tx);
    Ok(rx)
}

/// Marks the connection closed and fails every waiting request.
fn fail_pending(pending: &PendingAcks, closed: &AtomicBool) {
    let mut pending = lock(pending);
    closed.store(true, Ordering::SeqCst);
    for (_, waiter) in pending.drain() {
        let _ = waiter.send(Err(ClientError::Connection("connection closed".to_string())));
    }
}

/// Drops the pending ack entry if the request is abandoned (e.g. timed out).
struct PendingGuard<'a> {
    pending: &'a PendingAcks,
    ack_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.ack_id);
    }
}

#[async_trait]
impl Connection for SocketIoConnection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn request(&self, event: &str, payload: Option<Value>) -> Result<Value> {
        let ack_id = self.next_ack_id.fetch_add(1, Ordering::SeqCst);
        let frame = encode_event(ack_id, event, payload.as_ref())?;

        let rx = register_waiter(&self.pending, &self.closed, ack_id)?;
        let _guard = PendingGuard { pending: &self.pending, ack_id };

        debug!(event = %event, ack_id, "Emitting event");
        self.outgoing
            .send(Message::text(frame))
            .map_err(|_| ClientError::Connection("connection is closed".to_string()))?;

        rx.await.map_err(|_| ClientError::Connection("connection closed before ack".to_string()))?
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        lock(&self.inbound).take()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.outgoing.send(Message::text("41"));
        let _ = self.outgoing.send(Message::Close(None));
        info!(client_id = %self.id, "Connection closed");
        Ok(())
    }
}

impl Drop for SocketIoConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("http://localhost:3347").unwrap(),
            "ws://localhost:3347/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            websocket_url("https://pek.example/").unwrap(),
            "wss://pek.example/socket.io/?EIO=4&transport=websocket"
        );
        assert!(websocket_url("localhost:3347").is_err());
    }

    #[test]
    fn test_parse_engine_packets() {
        assert_eq!(parse_packet("2").unwrap(), Packet::Ping);
        assert_eq!(parse_packet("3").unwrap(), Packet::Pong);
        assert_eq!(parse_packet("1").unwrap(), Packet::Close);
        assert_eq!(
            parse_packet(r#"0{"sid":"e1","pingInterval":25000}"#).unwrap(),
            Packet::Open(json!({"sid": "e1", "pingInterval": 25000}))
        );
    }

    #[test]
    fn test_parse_socket_packets() {
        assert_eq!(parse_packet(r#"40{"sid":"s1"}"#).unwrap(), Packet::Connect(json!({"sid": "s1"})));
        assert_eq!(parse_packet("41").unwrap(), Packet::Disconnect);
        assert_eq!(
            parse_packet(r#"42["t-1","{\"info\":{}}"]"#).unwrap(),
            Packet::Event { ack_id: None, args: vec![json!("t-1"), json!("{\"info\":{}}")] }
        );
        assert_eq!(
            parse_packet(r#"4317[{"error":false}]"#).unwrap(),
            Packet::Ack { ack_id: 17, args: vec![json!({"error": false})] }
        );
        assert_eq!(
            parse_packet(r#"44{"message":"nope"}"#).unwrap(),
            Packet::ConnectError(json!({"message": "nope"}))
        );
        assert_eq!(
            parse_packet(r#"42/admin,["x"]"#).unwrap(),
            Packet::Event { ack_id: None, args: vec![json!("x")] }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_packet("").is_err());
        assert!(parse_packet("42{not json").is_err());
        assert!(parse_packet("43[1]").is_err());
        assert!(matches!(parse_packet("5").unwrap(), Packet::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_waiter_registered_before_close_is_failed() {
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let closed = AtomicBool::new(false);

        let rx = register_waiter(&pending, &closed, 1).unwrap();
        fail_pending(&pending, &closed);

        assert!(matches!(rx.await.unwrap(), Err(ClientError::Connection(_))));
        assert!(lock(&pending).is_empty());
    }

    #[test]
    fn test_waiter_rejected_after_close() {
        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let closed = AtomicBool::new(false);

        fail_pending(&pending, &closed);
        assert!(closed.load(Ordering::SeqCst));
        assert!(matches!(register_waiter(&pending, &closed, 2), Err(ClientError::Connection(_))));
        assert!(lock(&pending).is_empty());
    }

    #[test]
    fn test_encode_event_stringifies_payload() {
        let frame = encode_event(3, "pause-task", Some(&json!({"clientId": "c", "taskId": "t"}))).unwrap();
        assert_eq!(frame, r#"423["pause-task","{\"clientId\":\"c\",\"taskId\":\"t\"}"]"#);

        assert_eq!(encode_event(0, "info", None).unwrap(), r#"420["info","null"]"#);
    }
}
