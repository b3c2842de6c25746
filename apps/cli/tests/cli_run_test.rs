//! Runs `pek run` against a scripted server that hangs up mid-task.

use assert_cmd::Command;
use futures::{SinkExt, StreamExt};
use predicates::prelude::*;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const OPEN: &str = r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

/// Acks `info` and `start-task`, pushes one result, then closes the socket.
fn spawn_hangup_server() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            ws.send(Message::text(OPEN)).await.unwrap();

            while let Some(Ok(message)) = ws.next().await {
                let Ok(text) = message.to_text() else { continue };
                if text == "40" {
                    ws.send(Message::text(r#"40{"sid":"sock-1"}"#)).await.unwrap();
                    continue;
                }
                let Some(body) = text.strip_prefix("42") else { continue };
                let digits = body.bytes().take_while(u8::is_ascii_digit).count();
                let ack_id = &body[..digits];
                let args: Vec<Value> = serde_json::from_str(&body[digits..]).unwrap();
                match args[0].as_str().unwrap() {
                    "info" => {
                        let ack = json!([{"error": false, "data": {"serverVersion": "0.9.1", "datasets": ["iris"]}}]);
                        ws.send(Message::text(format!("43{ack_id}{ack}"))).await.unwrap();
                    }
                    "start-task" => {
                        let payload: Value = serde_json::from_str(args[1].as_str().unwrap()).unwrap();
                        let task_id = payload["taskId"].as_str().unwrap().to_string();
                        ws.send(Message::text(format!("43{ack_id}[{{\"error\":false}}]"))).await.unwrap();
                        let result = r#"{"info":{"iteration":1,"cost":NaN}}"#;
                        ws.send(Message::text(format!("42{}", json!([task_id, result])))).await.unwrap();
                        let _ = ws.close(None).await;
                        break;
                    }
                    _ => {}
                }
            }
        });
    });

    url
}

#[test]
fn test_run_fails_when_server_hangs_up() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let url = spawn_hangup_server();

    Command::cargo_bin("pek")
        .unwrap()
        .current_dir(temp_dir.path())
        .env("HOME", temp_dir.path())
        .env_remove("PEK_SERVER_URL")
        .args(["--server", &url, "run", "--dataset", "iris"])
        .timeout(Duration::from_secs(20))
        .assert()
        .failure()
        .stdout(predicate::str::contains("iteration    1"))
        .stderr(predicate::str::contains("Lost connection to the server"));
}
