//! Streamable HTTP backend and stdio bridge integration tests
//!
//! Verifies the behaviour of `src/proxy/backend.rs` and `src/proxy/bridge.rs`
//! against a wiremock MCP server:
//!
//! - JSON and SSE responses are forwarded as individual messages.
//! - `202 Accepted` forwards nothing.
//! - The session id is captured, replayed, and dropped on `404`.
//! - The negotiated protocol version is sent once known.
//! - A failed request reaches the client as a JSON-RPC error.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use authful_mcp_proxy::auth::browser::NoBrowser;
use authful_mcp_proxy::auth::{MemoryTokenStore, RequestAuthenticator, TokenRecord};
use authful_mcp_proxy::proxy::{bridge, HttpBackend};
use authful_mcp_proxy::ProxyError;

const INITIALIZE: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
const INITIALIZE_RESULT: &str =
    r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2025-06-18","capabilities":{}}}"#;
const TOOLS_LIST: &str = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
const INITIALIZED: &str = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn backend_for(
    server: &MockServer,
) -> (
    Arc<HttpBackend>,
    mpsc::UnboundedSender<String>,
    mpsc::UnboundedReceiver<String>,
) {
    let store = Arc::new(MemoryTokenStore::with_record(
        &server.uri(),
        TokenRecord::new("AT1"),
    ));
    let auth = common::auth_for(
        &server.uri(),
        common::free_port(),
        store,
        Arc::new(NoBrowser),
        Duration::from_millis(200),
    );
    let (tx, rx) = mpsc::unbounded_channel();
    let endpoint = url::Url::parse(&format!("{}/mcp", server.uri())).unwrap();
    let backend = HttpBackend::new(
        reqwest::Client::new(),
        endpoint,
        RequestAuthenticator::new(Arc::new(auth)),
        tx.clone(),
    );
    (Arc::new(backend), tx, rx)
}

fn json_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "application/json")
}

// ---------------------------------------------------------------------------
// HttpBackend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_json_response_forwarded_and_session_captured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("authorization", "Bearer AT1"))
        .respond_with(json_response(INITIALIZE_RESULT).insert_header("MCP-Session-Id", "sess-1"))
        .expect(1)
        .mount(&server)
        .await;

    let (backend, _tx, mut rx) = backend_for(&server);
    backend.send(INITIALIZE.to_string()).await.unwrap();

    assert_eq!(rx.recv().await.unwrap(), INITIALIZE_RESULT);
    assert_eq!(backend.session_id().await.as_deref(), Some("sess-1"));
    assert_eq!(backend.protocol_version().await.as_deref(), Some("2025-06-18"));
}

#[tokio::test]
async fn test_session_and_version_headers_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(json_response(INITIALIZE_RESULT).insert_header("MCP-Session-Id", "sess-1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(header("mcp-session-id", "sess-1"))
        .and(header("mcp-protocol-version", "2025-06-18"))
        .respond_with(json_response(r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let (backend, _tx, mut rx) = backend_for(&server);
    backend.send(INITIALIZE.to_string()).await.unwrap();
    backend.send(TOOLS_LIST.to_string()).await.unwrap();

    rx.recv().await.unwrap();
    let second: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(second["id"], 2);
}

#[tokio::test]
async fn test_sse_response_forwards_each_event() {
    let server = MockServer::start().await;
    let body = format!(
        "event: ping\ndata: [PING]\n\nevent: message\ndata: {}\n\nevent: message\ndata: {}\n\n",
        r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#,
        INITIALIZE_RESULT
    );
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let (backend, _tx, mut rx) = backend_for(&server);
    backend.send(INITIALIZE.to_string()).await.unwrap();

    let first: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(first["method"], "notifications/progress");
    assert_eq!(rx.recv().await.unwrap(), INITIALIZE_RESULT);
    assert!(rx.try_recv().is_err());
    assert_eq!(backend.protocol_version().await.as_deref(), Some("2025-06-18"));
}

#[tokio::test]
async fn test_accepted_forwards_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let (backend, _tx, mut rx) = backend_for(&server);
    backend.send(INITIALIZED.to_string()).await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_not_found_clears_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(json_response(INITIALIZE_RESULT).insert_header("MCP-Session-Id", "sess-1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (backend, _tx, _rx) = backend_for(&server);
    backend.send(INITIALIZE.to_string()).await.unwrap();
    assert!(backend.session_id().await.is_some());

    let err = backend.send(TOOLS_LIST.to_string()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ProxyError>(),
        Some(ProxyError::Transport(_))
    ));
    assert!(backend.session_id().await.is_none());
}

#[tokio::test]
async fn test_persistent_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    // No refresh token and no browser: renewal fails, the 401 surfaces.
    let (backend, _tx, _rx) = backend_for(&server);
    let err = backend.send(TOOLS_LIST.to_string()).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ProxyError>(),
        Some(ProxyError::Auth(_))
    ));
}

#[tokio::test]
async fn test_close_deletes_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(json_response(INITIALIZE_RESULT).insert_header("MCP-Session-Id", "sess-1"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/mcp"))
        .and(header("mcp-session-id", "sess-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (backend, _tx, _rx) = backend_for(&server);
    backend.send(INITIALIZE.to_string()).await.unwrap();
    backend.close().await;
    assert!(backend.session_id().await.is_none());

    // A second close has nothing to delete.
    backend.close().await;
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

async fn run_bridge(server: &MockServer, input: &str) -> Vec<Value> {
    let (backend, tx, rx) = backend_for(server);
    let (mut client_in, proxy_in) = tokio::io::duplex(64 * 1024);
    let (proxy_out, mut client_out) = tokio::io::duplex(64 * 1024);

    client_in.write_all(input.as_bytes()).await.unwrap();
    drop(client_in);

    bridge::run(backend, tx, rx, proxy_in, proxy_out)
        .await
        .unwrap();

    let mut output = String::new();
    client_out.read_to_string(&mut output).await.unwrap();
    output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_bridge_relays_backend_responses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(json_response(INITIALIZE_RESULT))
        .expect(1)
        .mount(&server)
        .await;

    let lines = run_bridge(&server, &format!("{INITIALIZE}\n\n")).await;

    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["result"]["protocolVersion"], "2025-06-18");
}

#[tokio::test]
async fn test_bridge_reports_backend_failure_as_jsonrpc_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&server)
        .await;

    let lines = run_bridge(&server, &format!("{TOOLS_LIST}\n{INITIALIZED}\n")).await;

    // Only the request gets an error; the notification fails silently.
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["id"], 2);
    assert_eq!(lines[0]["error"]["code"], bridge::INTERNAL_ERROR);
}

#[tokio::test]
async fn test_bridge_answers_malformed_input_with_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .expect(0)
        .mount(&server)
        .await;

    let lines = run_bridge(&server, "{not json\n").await;

    assert_eq!(lines.len(), 1);
    assert!(lines[0]["id"].is_null());
    assert_eq!(lines[0]["error"]["code"], bridge::PARSE_ERROR);
}
