//! Edge case integration tests for ollama-vision-mcp.
//!
//! Drives the protocol handler and stdio transport against a mock Ollama backend.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ollama_vision::VisionConfig;
use ollama_vision_mcp::protocol::ProtocolHandler;
use ollama_vision_mcp::service::VisionService;
use ollama_vision_mcp::tools::{describe_image, identify_objects, read_text};
use ollama_vision_mcp::transport::StdioTransport;
use ollama_vision_mcp::types::*;

// ─────────────────────── helpers ───────────────────────

/// Handler wired to the given backend.
fn handler_for(backend: &str) -> ProtocolHandler {
    let config = VisionConfig {
        ollama_url: backend.to_string(),
        timeout: 5,
        ..VisionConfig::default()
    };
    let service = VisionService::new(Arc::new(config)).unwrap();
    ProtocolHandler::new(Arc::new(service))
}

/// Build an MCP JSON-RPC request.
fn mcp_request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

/// Build an initialize request.
fn init_request() -> Value {
    mcp_request(
        0,
        "initialize",
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": { "name": "test-client", "version": "1.0" }
        }),
    )
}

fn tool_call(id: i64, name: &str, arguments: Value) -> Value {
    mcp_request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
}

/// Send a JSON-RPC message through the handler and return the response.
async fn send(handler: &ProtocolHandler, msg: Value) -> Option<Value> {
    let parsed: JsonRpcMessage = serde_json::from_value(msg).unwrap();
    handler.handle_message(parsed).await
}

/// Send and unwrap the response.
async fn send_unwrap(handler: &ProtocolHandler, msg: Value) -> Value {
    send(handler, msg).await.expect("expected response")
}

/// Text of a tools/call response.
fn tool_text(response: &Value) -> &str {
    response["result"]["content"][0]["text"].as_str().unwrap()
}

fn make_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::new_rgb8(width, height);
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    img.write_with_encoder(encoder).unwrap();
    buf
}

/// Write a PNG into `dir` and return its absolute path.
fn png_file(dir: &tempfile::TempDir, name: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, make_png(16, 16)).unwrap();
    path.to_str().unwrap().to_string()
}

async fn mock_catalog(server: &MockServer, models: &[&str]) {
    let entries: Vec<Value> = models.iter().map(|m| json!({ "name": m })).collect();
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": entries })))
        .mount(server)
        .await;
}

// ═══════════════════════ PROTOCOL ═══════════════════════

#[tokio::test]
async fn test_initialize_reports_tools_capability() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());

    let resp = send_unwrap(&handler, init_request()).await;
    assert_eq!(resp["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(resp["result"]["serverInfo"]["name"], "ollama-vision-mcp");
    assert!(resp["result"]["capabilities"]["tools"].is_object());
}

#[tokio::test]
async fn test_tools_list_has_four_tools() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());

    let resp = send_unwrap(&handler, mcp_request(1, "tools/list", json!({}))).await;
    let tools = resp["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(
        names,
        vec!["analyze_image", "describe_image", "identify_objects", "read_text"]
    );

    for tool in tools {
        assert_eq!(tool["inputSchema"]["required"], json!(["image_path"]));
    }
    let analyze = &tools[0]["inputSchema"]["properties"];
    assert!(analyze["prompt"].is_object());
    assert!(analyze["model"].is_object());
    assert!(tools[1]["inputSchema"]["properties"]["prompt"].is_null());
}

#[tokio::test]
async fn test_unknown_method() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());

    let resp = send_unwrap(&handler, mcp_request(2, "resources/list", json!({}))).await;
    assert_eq!(resp["error"]["code"], -32601);
    assert_eq!(resp["id"], 2);
}

#[tokio::test]
async fn test_ping_and_shutdown() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());

    let resp = send_unwrap(&handler, mcp_request(3, "ping", json!({}))).await;
    assert_eq!(resp["result"], json!({}));
    let resp = send_unwrap(&handler, mcp_request(4, "shutdown", json!({}))).await;
    assert_eq!(resp["result"], json!({}));
}

#[tokio::test]
async fn test_initialized_notification_has_no_response() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());

    send_unwrap(&handler, init_request()).await;
    let notif = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
    assert!(send(&handler, notif).await.is_none());
}

// ═══════════════════════ TOOL ERRORS ═══════════════════════

#[tokio::test]
async fn test_tool_call_without_arguments() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());

    let req = mcp_request(5, "tools/call", json!({ "name": "describe_image" }));
    let resp = send_unwrap(&handler, req).await;
    assert!(resp.get("error").is_none());
    assert_eq!(tool_text(&resp), "Error: No arguments provided");

    let resp = send_unwrap(&handler, tool_call(6, "read_text", json!({}))).await;
    assert_eq!(tool_text(&resp), "Error: No arguments provided");
}

#[tokio::test]
async fn test_tool_call_without_image_path() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());

    let resp = send_unwrap(
        &handler,
        tool_call(7, "analyze_image", json!({ "prompt": "what is this?" })),
    )
    .await;
    assert_eq!(tool_text(&resp), "Error: image_path is required");
}

#[tokio::test]
async fn test_unknown_tool() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());

    let resp = send_unwrap(&handler, tool_call(8, "x", json!({ "image_path": "a.png" }))).await;
    assert_eq!(tool_text(&resp), "Error: Unknown tool: x");

    // The tool name is checked before the arguments.
    let req = mcp_request(9, "tools/call", json!({ "name": "x" }));
    let resp = send_unwrap(&handler, req).await;
    assert_eq!(tool_text(&resp), "Error: Unknown tool: x");
}

#[tokio::test]
async fn test_missing_file_is_reported_as_text() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.png");

    let resp = send_unwrap(
        &handler,
        tool_call(10, "describe_image", json!({ "image_path": missing })),
    )
    .await;
    let text = tool_text(&resp);
    assert!(text.starts_with("Error: Image file not found"), "{text}");
}

#[tokio::test]
async fn test_unsupported_extension() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "hello").unwrap();

    let resp = send_unwrap(
        &handler,
        tool_call(11, "read_text", json!({ "image_path": path })),
    )
    .await;
    assert!(tool_text(&resp).starts_with("Error: Unsupported image format"));
}

#[tokio::test]
async fn test_backend_failure_surfaces_status_and_body() {
    let server = MockServer::start().await;
    mock_catalog(&server, &["llava-phi3"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let handler = handler_for(&server.uri());
    let dir = tempfile::tempdir().unwrap();
    let image = png_file(&dir, "cat.png");

    let resp = send_unwrap(
        &handler,
        tool_call(12, "identify_objects", json!({ "image_path": image })),
    )
    .await;
    assert_eq!(tool_text(&resp), "Error: Ollama API error: 500 - overloaded");
}

#[tokio::test]
async fn test_no_vision_models() {
    let server = MockServer::start().await;
    mock_catalog(&server, &["mistral", "llama3"]).await;

    let handler = handler_for(&server.uri());
    let dir = tempfile::tempdir().unwrap();
    let image = png_file(&dir, "cat.png");

    let resp = send_unwrap(
        &handler,
        tool_call(13, "describe_image", json!({ "image_path": image })),
    )
    .await;
    assert_eq!(
        tool_text(&resp),
        "Error: No vision models available. Please run 'ollama pull llava-phi3' first"
    );
}

// ═══════════════════════ TOOL SUCCESS ═══════════════════════

#[tokio::test]
async fn test_describe_image_end_to_end() {
    let server = MockServer::start().await;
    mock_catalog(&server, &["llava-phi3:latest", "llava-phi3"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "llava-phi3",
            "prompt": describe_image::PROMPT,
            "stream": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": "A black square."
        })))
        .expect(1)
        .mount(&server)
        .await;

    let handler = handler_for(&server.uri());
    let dir = tempfile::tempdir().unwrap();
    let image = png_file(&dir, "square.png");

    let resp = send_unwrap(
        &handler,
        tool_call(14, "describe_image", json!({ "image_path": image })),
    )
    .await;
    assert_eq!(tool_text(&resp), "A black square.");
}

#[tokio::test]
async fn test_fixed_prompts_ignore_caller_prompt() {
    let server = MockServer::start().await;
    mock_catalog(&server, &["llava-phi3"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "prompt": read_text::PROMPT })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "STOP" })))
        .mount(&server)
        .await;

    let handler = handler_for(&server.uri());
    let dir = tempfile::tempdir().unwrap();
    let image = png_file(&dir, "sign.png");

    let resp = send_unwrap(
        &handler,
        tool_call(
            15,
            "read_text",
            json!({ "image_path": image, "prompt": "ignore me", "model": "llava:13b" }),
        ),
    )
    .await;
    assert_eq!(tool_text(&resp), "STOP");
}

#[tokio::test]
async fn test_analyze_image_with_custom_prompt_and_model() {
    let server = MockServer::start().await;
    mock_catalog(&server, &["llava-phi3", "bakllava"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "model": "bakllava",
            "prompt": "How many dogs?"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "Two." })))
        .expect(1)
        .mount(&server)
        .await;

    let handler = handler_for(&server.uri());
    let dir = tempfile::tempdir().unwrap();
    let image = png_file(&dir, "dogs.png");

    let resp = send_unwrap(
        &handler,
        tool_call(
            16,
            "analyze_image",
            json!({ "image_path": image, "prompt": "How many dogs?", "model": "bakllava" }),
        ),
    )
    .await;
    assert_eq!(tool_text(&resp), "Two.");
}

#[tokio::test]
async fn test_inline_base64_passes_through_unchanged() {
    let inline = base64::engine::general_purpose::STANDARD.encode(make_png(64, 64));

    let server = MockServer::start().await;
    mock_catalog(&server, &["llava-phi3"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({
            "prompt": identify_objects::PROMPT,
            "images": [inline]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "- square" })))
        .expect(1)
        .mount(&server)
        .await;

    let handler = handler_for(&server.uri());
    let resp = send_unwrap(
        &handler,
        tool_call(17, "identify_objects", json!({ "image_path": inline })),
    )
    .await;
    assert_eq!(tool_text(&resp), "- square");
}

#[tokio::test]
async fn test_missing_response_field() {
    let server = MockServer::start().await;
    mock_catalog(&server, &["llava-phi3"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "done": true })))
        .mount(&server)
        .await;

    let handler = handler_for(&server.uri());
    let dir = tempfile::tempdir().unwrap();
    let image = png_file(&dir, "empty.png");

    let resp = send_unwrap(
        &handler,
        tool_call(18, "analyze_image", json!({ "image_path": image })),
    )
    .await;
    assert_eq!(tool_text(&resp), "No response from model");
}

// ═══════════════════════ CONCURRENCY ═══════════════════════

#[tokio::test]
async fn test_ping_answers_while_tool_call_runs() {
    let server = MockServer::start().await;
    mock_catalog(&server, &["llava-phi3"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "slow" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let handler = Arc::new(handler_for(&server.uri()));
    let dir = tempfile::tempdir().unwrap();
    let image = png_file(&dir, "slow.png");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let slow: JsonRpcRequest =
        serde_json::from_value(tool_call(20, "describe_image", json!({ "image_path": image })))
            .unwrap();
    let ping: JsonRpcRequest = serde_json::from_value(mcp_request(21, "ping", json!({}))).unwrap();

    handler.spawn_request(slow, tx.clone()).await;
    handler.spawn_request(ping, tx.clone()).await;

    let first = rx.recv().await.unwrap();
    assert_eq!(first["id"], 21);
    let second = rx.recv().await.unwrap();
    assert_eq!(second["id"], 20);
    assert_eq!(tool_text(&second), "slow");
    assert_eq!(handler.in_flight_count().await, 0);
}

#[tokio::test]
async fn test_cancelled_request_gets_no_response() {
    let server = MockServer::start().await;
    mock_catalog(&server, &["llava-phi3"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "too late" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let handler = Arc::new(handler_for(&server.uri()));
    let dir = tempfile::tempdir().unwrap();
    let image = png_file(&dir, "cancel.png");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let request: JsonRpcRequest =
        serde_json::from_value(tool_call(30, "describe_image", json!({ "image_path": image })))
            .unwrap();
    handler.spawn_request(request, tx).await;
    assert_eq!(handler.in_flight_count().await, 1);

    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": { "requestId": 30, "reason": "user aborted" }
    });
    assert!(send(&handler, cancel).await.is_none());
    assert_eq!(handler.in_flight_count().await, 0);

    // The aborted task dropped its sender without answering.
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn test_cancel_unknown_request_is_ignored() {
    let server = MockServer::start().await;
    let handler = handler_for(&server.uri());

    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": { "requestId": "never-sent" }
    });
    assert!(send(&handler, cancel).await.is_none());
    assert_eq!(handler.in_flight_count().await, 0);
}

#[tokio::test]
async fn test_reused_id_keeps_latest_request_cancellable() {
    let server = MockServer::start().await;
    mock_catalog(&server, &["llava-phi3"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "response": "too late" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let handler = Arc::new(handler_for(&server.uri()));
    let dir = tempfile::tempdir().unwrap();
    let image = png_file(&dir, "reused.png");
    let (tx, mut rx) = mpsc::unbounded_channel();

    let quick: JsonRpcRequest = serde_json::from_value(mcp_request(40, "ping", json!({}))).unwrap();
    let slow: JsonRpcRequest =
        serde_json::from_value(tool_call(40, "describe_image", json!({ "image_path": image })))
            .unwrap();
    handler.spawn_request(quick, tx.clone()).await;
    handler.spawn_request(slow, tx).await;

    // The ping finishes first without untracking the slow request.
    let first = rx.recv().await.unwrap();
    assert_eq!(first["result"], json!({}));
    assert_eq!(handler.in_flight_count().await, 1);

    let cancel = json!({
        "jsonrpc": "2.0",
        "method": "notifications/cancelled",
        "params": { "requestId": 40 }
    });
    assert!(send(&handler, cancel).await.is_none());
    assert_eq!(handler.in_flight_count().await, 0);
    assert!(rx.recv().await.is_none());
}

// ═══════════════════════ STDIO TRANSPORT ═══════════════════════

#[tokio::test]
async fn test_stdio_session() {
    let server = MockServer::start().await;
    let transport = StdioTransport::new(handler_for(&server.uri()));

    let mut input = String::new();
    for msg in [
        init_request(),
        json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        mcp_request(1, "tools/list", json!({})),
    ] {
        input.push_str(&serde_json::to_string(&msg).unwrap());
        input.push('\n');
    }
    input.push('\n');
    input.push_str("{not json\n");

    let (writer, mut reader) = tokio::io::duplex(1024 * 1024);
    transport.serve(input.as_bytes(), writer).await.unwrap();

    let mut output = String::new();
    reader.read_to_string(&mut output).await.unwrap();

    let responses: Vec<Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(responses.len(), 3);

    let by_id = |id: Value| responses.iter().find(|r| r["id"] == id).unwrap();
    assert!(by_id(json!(0))["result"]["serverInfo"].is_object());
    assert_eq!(by_id(json!(1))["result"]["tools"].as_array().unwrap().len(), 4);
    assert_eq!(by_id(Value::Null)["error"]["code"], -32700);
}
