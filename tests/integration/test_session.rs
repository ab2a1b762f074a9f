//! Integration tests for step playback against a live step service.
//!
//! Each test starts an in-process fake step service over WebSocket, connects
//! the real transport adapter to it, and drives the session controller
//! through its handle.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use mathboard_session::{
    spawn_ws_transport, ActionOutcome, AudioPlayer, BroadcastSink, ClientEvent,
    DisplayStepPayload, IgnoredReason, PhaseName, PlaybackOutcome, RequestId, RequestMathPayload,
    ServerEvent, ServiceErrorPayload, SessionController, SessionHandle, SessionSnapshot,
    ViewBroadcaster, ViewEvent, CONNECT_ERROR_MESSAGE,
};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::{sleep, timeout};

// ============================================================================
// Fake step service
// ============================================================================

/// Starts the fake step service and returns its WebSocket URL.
///
/// Replies depend on the prompt: `fail` gets an error event, `slow` waits
/// before answering, `narrated` gets a narrated first step. Every answer is
/// three steps echoing the request identity.
async fn spawn_step_service() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind step service");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let router = Router::new().route("/ws", get(step_service_handler));

    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Step service failed");
    });

    format!("ws://{addr}/ws")
}

async fn step_service_handler(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(serve_steps)
}

async fn serve_steps(mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Ok(ClientEvent::RequestMath(request)) = serde_json::from_str::<ClientEvent>(&text)
        else {
            continue;
        };

        if request.prompt.contains("slow") {
            sleep(Duration::from_millis(300)).await;
        }

        for event in answer(&request) {
            let frame = serde_json::to_string(&event).expect("Failed to encode event");
            if socket.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
    }
}

fn answer(request: &RequestMathPayload) -> Vec<ServerEvent> {
    if request.prompt.contains("fail") {
        return vec![ServerEvent::Error(ServiceErrorPayload {
            message: "Error processing math request".to_string(),
        })];
    }

    let narrated = request.prompt.contains("narrated");
    vec![
        step(&request.request_id, "x + 1 = 2", "Start with the equation", narrated),
        step(&request.request_id, "x = 2 - 1", "Subtract 1 from both sides", false),
        step(&request.request_id, "x = 1", "Simplify", false),
    ]
}

fn step(request_id: &RequestId, math: &str, natural: &str, narrated: bool) -> ServerEvent {
    ServerEvent::DisplayStep(DisplayStepPayload {
        request_id: request_id.clone(),
        math: Some(math.to_string()),
        mathml: None,
        natural: Some(natural.to_string()),
        has_audio: narrated,
        // "hello" in base64
        audio: narrated.then(|| "aGVsbG8=".to_string()),
    })
}

// ============================================================================
// Session under test
// ============================================================================

/// Holds every clip until the test releases it.
#[derive(Debug, Default)]
struct GatedPlayer {
    release: Notify,
}

#[async_trait]
impl AudioPlayer for GatedPlayer {
    async fn play(&self, _encoded: &str) -> PlaybackOutcome {
        self.release.notified().await;
        PlaybackOutcome::Completed
    }
}

struct TestSession {
    session: SessionHandle,
    broadcaster: ViewBroadcaster,
    player: Arc<GatedPlayer>,
}

/// Starts a controller whose transport points at `service_url`.
fn start_session(service_url: &str) -> TestSession {
    let broadcaster = ViewBroadcaster::new(64);
    let player = Arc::new(GatedPlayer::default());

    let (events_tx, events_rx) = mpsc::channel(64);
    let (transport, _adapter) = spawn_ws_transport(service_url, events_tx);
    let controller = SessionController::new(
        transport,
        Arc::new(BroadcastSink::new(broadcaster.clone())),
        Arc::clone(&player) as Arc<dyn AudioPlayer>,
    );
    let (session, _task) = controller.spawn(8, events_rx);

    TestSession {
        session,
        broadcaster,
        player,
    }
}

/// Polls the session until `done` holds for its snapshot.
async fn wait_for(
    session: &SessionHandle,
    mut done: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = session.snapshot().await.expect("Session closed");
            if done(&snapshot) {
                return snapshot;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Timeout waiting for session state")
}

/// Waits for the next `error` view event.
async fn next_error(events: &mut broadcast::Receiver<ViewEvent>) -> String {
    timeout(Duration::from_secs(5), async {
        loop {
            if let ViewEvent::Error(payload) = events.recv().await.expect("View events closed") {
                return payload.message;
            }
        }
    })
    .await
    .expect("Timeout waiting for error event")
}

fn all_steps_arrived(snapshot: &SessionSnapshot) -> bool {
    snapshot.history_len == 1 && snapshot.queue_len == 2
}

// ============================================================================
// Playback Tests
// ============================================================================

/// The first step shows at once, later steps wait until the learner advances.
#[tokio::test]
async fn test_first_step_displayed_and_rest_queued() {
    let url = spawn_step_service().await;
    let test = start_session(&url);

    let request_id = test.session.ask("solve x + 1 = 2").await.expect("ask failed");
    let snapshot = wait_for(&test.session, all_steps_arrived).await;

    assert_eq!(snapshot.phase, PhaseName::Displaying);
    assert_eq!(snapshot.request_id, Some(request_id));
    assert_eq!(snapshot.cursor, Some(0));
    assert!(snapshot.navigation.next);
    assert!(!snapshot.navigation.previous);
    let current = snapshot.current_step.expect("No current step");
    assert_eq!(current.explanation(), Some("Start with the equation"));
}

/// Advancing walks the queue; rewinding and advancing again returns to the
/// same step.
#[tokio::test]
async fn test_navigation_through_steps() {
    let url = spawn_step_service().await;
    let test = start_session(&url);

    test.session.ask("solve x + 1 = 2").await.expect("ask failed");
    wait_for(&test.session, all_steps_arrived).await;

    assert_eq!(test.session.next().await.unwrap(), ActionOutcome::Applied);
    assert_eq!(test.session.next().await.unwrap(), ActionOutcome::Applied);
    assert_eq!(
        test.session.next().await.unwrap(),
        ActionOutcome::Ignored(IgnoredReason::NothingQueued)
    );

    let at_end = test.session.snapshot().await.unwrap();
    assert_eq!(at_end.cursor, Some(2));
    assert_eq!(at_end.queue_len, 0);

    assert_eq!(test.session.back().await.unwrap(), ActionOutcome::Applied);
    let rewound = test.session.snapshot().await.unwrap();
    assert_eq!(rewound.cursor, Some(1));
    assert_eq!(
        rewound.current_step.expect("No current step").explanation(),
        Some("Subtract 1 from both sides")
    );

    assert_eq!(test.session.next().await.unwrap(), ActionOutcome::Applied);
    let returned = test.session.snapshot().await.unwrap();
    assert_eq!(returned.cursor, Some(2));
    assert_eq!(returned.history_len, 3);
    assert_eq!(
        returned.current_step.expect("No current step").explanation(),
        Some("Simplify")
    );
}

/// Steps answering a superseded question never reach the store.
#[tokio::test]
async fn test_superseded_question_steps_are_discarded() {
    let url = spawn_step_service().await;
    let test = start_session(&url);

    let stale = test.session.ask("slow question").await.expect("ask failed");
    let current = test.session.ask("fast question").await.expect("ask failed");
    assert_ne!(stale, current);

    let snapshot = wait_for(&test.session, all_steps_arrived).await;
    // Leave time for anything else in flight
    sleep(Duration::from_millis(100)).await;
    let settled = test.session.snapshot().await.unwrap();

    assert_eq!(snapshot.request_id, Some(current.clone()));
    assert_eq!(settled.history_len, 1);
    assert_eq!(settled.queue_len, 2);
    assert_eq!(
        settled
            .current_step
            .expect("No current step")
            .request_id(),
        &current
    );
}

/// Navigation is dropped while narration plays and works once it ends.
#[tokio::test]
async fn test_narration_gates_navigation() {
    let url = spawn_step_service().await;
    let test = start_session(&url);

    test.session.ask("narrated question").await.expect("ask failed");
    let playing = wait_for(&test.session, |s| {
        all_steps_arrived(s) && s.phase == PhaseName::AwaitingAudio
    })
    .await;
    assert!(!playing.navigation.next);

    assert_eq!(
        test.session.next().await.unwrap(),
        ActionOutcome::Ignored(IgnoredReason::AudioPlaying)
    );
    assert_eq!(test.session.snapshot().await.unwrap().cursor, Some(0));

    test.player.release.notify_one();
    wait_for(&test.session, |s| s.phase == PhaseName::Displaying).await;

    assert_eq!(test.session.next().await.unwrap(), ActionOutcome::Applied);
    assert_eq!(test.session.snapshot().await.unwrap().cursor, Some(1));
}

// ============================================================================
// Error Tests
// ============================================================================

/// Service errors are shown verbatim and leave the store alone.
#[tokio::test]
async fn test_service_error_is_shown() {
    let url = spawn_step_service().await;
    let test = start_session(&url);
    let mut events = test.broadcaster.subscribe();

    test.session.ask("please fail").await.expect("ask failed");

    assert_eq!(next_error(&mut events).await, "Error processing math request");
    let snapshot = test.session.snapshot().await.unwrap();
    assert_eq!(snapshot.history_len, 0);
    assert_eq!(snapshot.queue_len, 0);
}

/// An unreachable service produces the generic connection message.
#[tokio::test]
async fn test_unreachable_service_reports_connection_error() {
    // Bind and release a port so nothing is listening on it
    let port = TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port();
    let test = start_session(&format!("ws://127.0.0.1:{port}/ws"));
    let mut events = test.broadcaster.subscribe();

    test.session.ask("solve x + 1 = 2").await.expect("ask failed");

    assert_eq!(next_error(&mut events).await, CONNECT_ERROR_MESSAGE);
}

/// A blank question is rejected without contacting the service.
#[tokio::test]
async fn test_blank_question_rejected() {
    let url = spawn_step_service().await;
    let test = start_session(&url);

    let result = test.session.ask("   ").await;

    assert!(result.is_err());
    let snapshot = test.session.snapshot().await.unwrap();
    assert_eq!(snapshot.phase, PhaseName::Idle);
    assert_eq!(snapshot.request_id, None);
}
