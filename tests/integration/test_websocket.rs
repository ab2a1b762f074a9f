//! Integration tests for the view socket and the HTTP API.
//!
//! These tests run the real router on a local port, drive the session over
//! HTTP, and check what view clients receive.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use mathboard_session::{
    create_router, AppState, BroadcastSink, ClientEvent, DecodingPlayer, DisplayStepPayload,
    PhaseName, RenderContent, RequestId, ServerEvent, SessionController, SessionSnapshot,
    TimedOutput, TransportEvent, TransportHandle, ViewBroadcaster, ViewEvent,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running router with a controller behind it.
///
/// The transport is a bare channel: tests read what would be sent to the
/// step service from `outbound` and inject service events through `inbound`.
struct TestServer {
    base_url: String,
    ws_url: String,
    broadcaster: ViewBroadcaster,
    outbound: mpsc::UnboundedReceiver<ClientEvent>,
    inbound: mpsc::Sender<TransportEvent>,
}

/// Spawns the test server.
async fn spawn_test_server() -> TestServer {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");

    let broadcaster = ViewBroadcaster::new(64);
    let (transport, outbound) = TransportHandle::channel();
    let player = DecodingPlayer::with_enabled(TimedOutput::new(64, Duration::ZERO), false);
    let controller = SessionController::new(
        transport,
        Arc::new(BroadcastSink::new(broadcaster.clone())),
        Arc::new(player),
    );
    let (inbound, inbound_rx) = mpsc::channel(16);
    let (session, _task) = controller.spawn(8, inbound_rx);

    let router = create_router(AppState::new(session, broadcaster.clone()));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base_url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/ws"),
        broadcaster,
        outbound,
        inbound,
    }
}

/// Connects a WebSocket client to the given URL.
async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text message from the WebSocket and parses it as a
/// `ViewEvent`. Answers pings along the way.
async fn receive_event(client: &mut WsClient) -> ViewEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Receives events until one named `name` arrives.
async fn receive_named(client: &mut WsClient, name: &str) -> ViewEvent {
    loop {
        let event = receive_event(client).await;
        if event.event_name() == name {
            return event;
        }
    }
}

fn display_step(request_id: &RequestId, math: &str) -> TransportEvent {
    TransportEvent::Server(ServerEvent::DisplayStep(DisplayStepPayload {
        request_id: request_id.clone(),
        math: Some(math.to_string()),
        mathml: None,
        natural: Some(format!("Now {math}")),
        has_audio: false,
        audio: None,
    }))
}

/// Asks a question over HTTP and returns the request identity.
async fn ask(server: &TestServer, prompt: &str) -> RequestId {
    let response: serde_json::Value = reqwest::Client::new()
        .post(format!("{}/api/ask", server.base_url))
        .json(&serde_json::json!({ "prompt": prompt }))
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON");

    RequestId::new(
        response["requestId"]
            .as_str()
            .expect("Missing requestId"),
    )
}

// ============================================================================
// Connection Tests
// ============================================================================

/// A view client receives the session snapshot on connect.
#[tokio::test]
async fn test_client_receives_connected_event_on_connect() {
    let server = spawn_test_server().await;

    let mut client = connect_client(&server.ws_url).await;
    let event = receive_event(&mut client).await;

    if let ViewEvent::Connected(payload) = event {
        assert_eq!(payload.snapshot.phase, PhaseName::Idle);
        assert_eq!(payload.snapshot.cursor, None);
        assert!(payload.snapshot.current_step.is_none());
    } else {
        panic!("Expected Connected event, got: {event:?}");
    }
}

/// A client connecting mid-session sees the step on screen.
#[tokio::test]
async fn test_connected_event_contains_current_step() {
    let server = spawn_test_server().await;
    let request_id = ask(&server, "solve x + 1 = 2").await;
    server
        .inbound
        .send(display_step(&request_id, "x + 1 = 2"))
        .await
        .expect("Controller stopped");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = connect_client(&server.ws_url).await;
    let event = receive_event(&mut client).await;

    if let ViewEvent::Connected(payload) = event {
        assert_eq!(payload.snapshot.phase, PhaseName::Displaying);
        assert_eq!(payload.snapshot.request_id, Some(request_id));
        assert_eq!(payload.snapshot.cursor, Some(0));
    } else {
        panic!("Expected Connected event, got: {event:?}");
    }
}

/// Tests that multiple clients can connect concurrently.
#[tokio::test]
async fn test_multiple_clients_can_connect() {
    let server = spawn_test_server().await;

    let mut client1 = connect_client(&server.ws_url).await;
    let mut client2 = connect_client(&server.ws_url).await;

    assert!(matches!(
        receive_event(&mut client1).await,
        ViewEvent::Connected(_)
    ));
    assert!(matches!(
        receive_event(&mut client2).await,
        ViewEvent::Connected(_)
    ));
}

// ============================================================================
// Event Broadcast Tests
// ============================================================================

/// Asking over HTTP clears the board and shows the loading indicator on
/// every view.
#[tokio::test]
async fn test_ask_broadcasts_to_all_clients() {
    let mut server = spawn_test_server().await;

    let mut client1 = connect_client(&server.ws_url).await;
    let mut client2 = connect_client(&server.ws_url).await;
    receive_event(&mut client1).await;
    receive_event(&mut client2).await;

    let request_id = ask(&server, "solve x + 1 = 2").await;

    let ClientEvent::RequestMath(sent) = server.outbound.recv().await.expect("Nothing sent");
    assert_eq!(sent.request_id, request_id);
    assert_eq!(sent.prompt, "solve x + 1 = 2");

    for client in [&mut client1, &mut client2] {
        assert!(matches!(receive_event(client).await, ViewEvent::Cleared));
        if let ViewEvent::Loading(payload) = receive_named(client, "loading").await {
            assert!(payload.active);
        }
    }
}

/// An arriving first step is rendered as display math with its explanation.
#[tokio::test]
async fn test_first_step_is_rendered() {
    let server = spawn_test_server().await;
    let mut client = connect_client(&server.ws_url).await;
    receive_event(&mut client).await;

    let request_id = ask(&server, "solve x + 1 = 2").await;
    server
        .inbound
        .send(display_step(&request_id, "x + 1 = 2"))
        .await
        .expect("Controller stopped");

    let render = receive_named(&mut client, "render").await;
    if let ViewEvent::Render(payload) = render {
        assert_eq!(
            payload.content,
            RenderContent::Latex(r"\[x + 1 = 2\]".to_string())
        );
    }

    let explanation = receive_named(&mut client, "explanation").await;
    if let ViewEvent::Explanation(payload) = explanation {
        assert_eq!(payload.text.as_deref(), Some("Now x + 1 = 2"));
    }
}

/// Broadcast events reach clients in the wire format.
#[tokio::test]
async fn test_error_event_broadcast() {
    let server = spawn_test_server().await;
    let mut client = connect_client(&server.ws_url).await;
    receive_event(&mut client).await;

    server.broadcaster.send(ViewEvent::error("Error processing math request"));

    let event = receive_event(&mut client).await;
    if let ViewEvent::Error(payload) = event {
        assert_eq!(payload.message, "Error processing math request");
    } else {
        panic!("Expected Error event, got: {event:?}");
    }
}

// ============================================================================
// HTTP API Tests
// ============================================================================

/// The status endpoint reflects navigation done over HTTP.
#[tokio::test]
async fn test_status_after_navigation() {
    let server = spawn_test_server().await;
    let client = reqwest::Client::new();

    let request_id = ask(&server, "solve x + 1 = 2").await;
    for math in ["x + 1 = 2", "x = 1"] {
        server
            .inbound
            .send(display_step(&request_id, math))
            .await
            .expect("Controller stopped");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let next: serde_json::Value = client
        .post(format!("{}/api/next", server.base_url))
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON");
    assert_eq!(next, serde_json::json!({ "applied": true }));

    let next_again: serde_json::Value = client
        .post(format!("{}/api/next", server.base_url))
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON");
    assert_eq!(
        next_again,
        serde_json::json!({ "applied": false, "reason": "nothing_queued" })
    );

    let status: SessionSnapshot = client
        .get(format!("{}/api/status", server.base_url))
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid JSON");
    assert_eq!(status.cursor, Some(1));
    assert_eq!(status.history_len, 2);
    assert!(status.navigation.previous);
}

/// A blank question is a client error.
#[tokio::test]
async fn test_blank_question_returns_400() {
    let server = spawn_test_server().await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/ask", server.base_url))
        .json(&serde_json::json!({ "prompt": "" }))
        .send()
        .await
        .expect("Request failed");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.expect("Invalid JSON");
    assert_eq!(body["error"], "Please enter a question");
}
