use std::sync::Arc;

use pushgate_gateway::{Gateway, GatewayConfig};
use pushgate_ipc::{ArgBag, Backend, MemoryBackend, Notification};
use serde_json::{json, Value};

use crate::frame::{parse_line, FrameWriter, OutboundFrame};
use crate::{load_config, serve};

async fn run(input: &str) -> Vec<Value> {
    let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new().expect("memory backend"));
    let (gateway, _notifications) = Gateway::new(GatewayConfig::default(), backend);
    let handle = gateway.spawn();
    let writer = FrameWriter::new(Vec::new());

    serve(input.as_bytes(), &handle, &writer)
        .await
        .expect("serve");

    let output = writer.inner().lock().await.clone();
    String::from_utf8(output)
        .expect("utf-8 output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect()
}

#[tokio::test]
async fn each_request_line_gets_a_correlated_response() {
    let input = concat!(
        r#"{"id": 1, "command": "Client.create", "arguments": {"id": "c1"}}"#,
        "\n\n",
        r#"{"id": "two", "command": "Client.create", "arguments": {"id": "c1"}}"#,
        "\n",
        r#"{"id": 3, "command": "Client.getStatus", "arguments": {"id": "c1"}}"#,
        "\n",
        r#"{"id": 4, "command": "Client.setLoggerProvider"}"#,
        "\n",
    );
    let frames = run(input).await;
    assert_eq!(frames.len(), 4);

    assert_eq!(frames[0]["type"], "response");
    assert_eq!(frames[0]["id"], 1);
    assert_eq!(frames[0]["response"]["status"], "success");

    assert_eq!(frames[1]["id"], "two");
    assert_eq!(frames[1]["response"]["code"], "ALREADY_EXISTS");

    assert_eq!(frames[2]["response"]["payload"], "DISCONNECTED");
    assert_eq!(frames[3]["response"]["status"], "notImplemented");
}

#[tokio::test]
async fn malformed_lines_are_answered_without_an_id() {
    let frames = run("{not json}\n{\"id\": 9, \"arguments\": {}}\n").await;
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert_eq!(frame["id"], Value::Null);
        assert_eq!(frame["response"]["code"], "INVALID_ARGUMENT");
    }
}

#[test]
fn requests_default_to_empty_arguments() {
    let (id, request) = parse_line(r#"{"command": "MpnBuilder.build"}"#).expect("request");
    assert_eq!(id, Value::Null);
    assert_eq!(request.command, "MpnBuilder.build");
    assert!(request.arguments.is_empty());
}

#[test]
fn notifications_are_framed_with_their_type() {
    let mut arguments = ArgBag::new();
    arguments.insert("id", "c1").insert("status", "CONNECTING");
    let frame: OutboundFrame =
        Notification::new("ClientListener.onStatusChange", arguments).into();
    assert_eq!(
        serde_json::to_value(&frame).expect("frame"),
        json!({
            "type": "notification",
            "event": "ClientListener.onStatusChange",
            "arguments": { "id": "c1", "status": "CONNECTING" },
        })
    );
}

#[test]
fn config_file_is_optional() {
    assert_eq!(
        load_config(None).expect("defaults"),
        GatewayConfig::default()
    );

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("pushgated.toml");
    std::fs::write(&path, "lenient_client_lookup = true\ncommand_buffer = 8\n").expect("write");
    let config = load_config(Some(&path)).expect("config");
    assert!(config.lenient_client_lookup);
    assert_eq!(config.command_buffer, 8);

    let missing = load_config(Some(&dir.path().join("absent.toml")));
    assert!(missing.is_err());
}
