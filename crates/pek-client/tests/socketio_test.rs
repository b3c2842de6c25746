//! End-to-end tests of the Socket.IO transport against a scripted local server.

use futures::{SinkExt, StreamExt};
use pek_client::{Client, ClientConfig, ClientError, SocketIoConnection};
use pek_core::TaskStatus;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

const OPEN: &str = r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

/// How the scripted server treats `start-task`.
#[derive(Clone, Copy)]
enum OnStart {
    AckAndPush,
    Hangup,
}

async fn send(ws: &mut WebSocketStream<TcpStream>, frame: impl Into<String>) {
    ws.send(Message::text(frame.into())).await.unwrap();
}

/// Splits `42<id>["event","payload"]` into its ack id, event and decoded payload.
fn parse_emit(frame: &str) -> (u64, String, Value) {
    let body = frame.strip_prefix("42").unwrap();
    let digits = body.bytes().take_while(u8::is_ascii_digit).count();
    let ack_id = body[..digits].parse().unwrap();
    let args: Vec<Value> = serde_json::from_str(&body[digits..]).unwrap();
    let event = args[0].as_str().unwrap().to_string();
    let payload = serde_json::from_str(args[1].as_str().unwrap()).unwrap();
    (ack_id, event, payload)
}

/// Serves one client and returns every text frame it received.
async fn spawn_server(on_start: OnStart) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        let mut received = Vec::new();

        send(&mut ws, OPEN).await;
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                break;
            }
            let Ok(text) = message.to_text() else { continue };
            let text = text.to_string();
            received.push(text.clone());

            if text == "40" {
                send(&mut ws, r#"40{"sid":"sock-1"}"#).await;
                send(&mut ws, "2").await;
            } else if text == "41" {
                break;
            } else if text.starts_with("42") {
                let (ack_id, event, payload) = parse_emit(&text);
                match event.as_str() {
                    "info" => {
                        let ack = json!([{"error": false, "data": {"serverVersion": "0.9.1", "datasets": ["iris"]}}]);
                        send(&mut ws, format!("43{ack_id}{ack}")).await;
                    }
                    "start-task" => match on_start {
                        OnStart::AckAndPush => {
                            send(&mut ws, format!(r#"43{ack_id}[{{"error":false}}]"#)).await;
                            let task_id = payload["taskId"].as_str().unwrap();
                            let result = format!(
                                r#"{{"info":{{"iteration":1,"cost":NaN}},"metrics":{{}},"taskId":"{task_id}"}}"#
                            );
                            send(&mut ws, format!("42{}", json!([task_id, result]))).await;
                        }
                        OnStart::Hangup => break,
                    },
                    "kill-task" => {
                        send(&mut ws, format!(r#"43{ack_id}[{{"error":true,"errorMessage":"not allowed"}}]"#)).await;
                    }
                    _ => send(&mut ws, format!(r#"43{ack_id}[{{"error":false}}]"#)).await,
                }
            }
        }
        received
    });

    (url, handle)
}

#[tokio::test]
async fn test_full_session() {
    let (url, server) = spawn_server(OnStart::AckAndPush).await;
    let client = Client::connect(ClientConfig::default().with_server_url(url)).await.unwrap();

    assert_eq!(client.id(), "sock-1");
    assert_eq!(client.server().version, "0.9.1");
    assert_eq!(client.dataset_names(), ["iris"]);

    let task = client.create_task().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    task.on_partial_result(move |result| {
        let _ = tx.send(result);
    });
    task.set_data("iris").unwrap();
    task.start().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(result.info.iteration, Some(1));
    assert_eq!(result.info.cost, None);
    assert_eq!(&result.task_id, task.id());

    match task.kill().await.unwrap_err() {
        ClientError::Remote { message, .. } => assert_eq!(message, "not allowed"),
        other => panic!("Expected Remote error, got {other:?}"),
    }
    assert_eq!(task.status(), TaskStatus::Running);

    client.close().await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap();

    assert_eq!(received[0], "40");
    assert!(received.contains(&"3".to_string()), "ping was not answered: {received:?}");
    assert!(received.iter().any(|frame| frame.starts_with("42") && frame.contains("\"start-task\"")));
    assert_eq!(received.last().map(String::as_str), Some("41"));
}

#[tokio::test]
async fn test_pending_request_fails_when_server_hangs_up() {
    let (url, _server) = spawn_server(OnStart::Hangup).await;
    let client = Client::connect(ClientConfig::default().with_server_url(url)).await.unwrap();
    let task = client.create_task().await;

    let err = tokio::time::timeout(Duration::from_secs(5), task.start()).await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Connection(_) | ClientError::WebSocket(_)), "unexpected error: {err:?}");
    assert_eq!(task.status(), TaskStatus::Pending);
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let result = SocketIoConnection::connect(&url, Duration::from_secs(2)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_connect_rejects_non_http_url() {
    let err = Client::connect(ClientConfig::default().with_server_url("tcp://localhost:1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Config(_)));
}
