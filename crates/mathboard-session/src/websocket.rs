//! View events and the browser view socket.
//!
//! Everything the presentation sink does is published as a [`ViewEvent`] and
//! forwarded to every client connected to `/ws`. The browser typesets the
//! content it receives; the terminal client prints it.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes the session snapshot
//! - `cleared` - The whiteboard was cleared
//! - `loading` - Loading indicator shown or hidden
//! - `render` - Math content to typeset
//! - `explanation` - Explanation panel text
//! - `navigation` - Which navigation controls are enabled
//! - `playback` - Narration started or stopped
//! - `error` - User-visible error message
//!
//! # Example
//!
//! ```no_run
//! use mathboard_session::websocket::{ViewBroadcaster, ViewEvent};
//!
//! # async fn example() {
//! let broadcaster = ViewBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(ViewEvent::loading(true));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session_state::{NavigationAffordances, SessionSnapshot};
use crate::step::RenderContent;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// The session as it stands when the client connects.
    pub snapshot: SessionSnapshot,
}

/// Payload for the `loading` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingPayload {
    /// Whether the indicator is shown.
    pub active: bool,
}

/// Payload for the `render` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPayload {
    /// What to typeset.
    pub content: RenderContent,
}

/// Payload for the `explanation` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationPayload {
    /// New panel text; `None` empties the panel.
    pub text: Option<String>,
}

/// Payload for the `playback` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackPayload {
    /// Whether narration is playing.
    pub playing: bool,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events published to view clients.
///
/// Serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ViewEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// The whiteboard was cleared.
    Cleared,
    /// Loading indicator changed.
    Loading(LoadingPayload),
    /// Content to typeset.
    Render(RenderPayload),
    /// Explanation panel changed.
    Explanation(ExplanationPayload),
    /// Navigation controls changed.
    Navigation(NavigationAffordances),
    /// Narration started or stopped.
    Playback(PlaybackPayload),
    /// A user-visible error.
    Error(ErrorPayload),
}

impl ViewEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(snapshot: SessionSnapshot) -> Self {
        Self::Connected(ConnectedPayload { snapshot })
    }

    /// Creates a `Loading` event.
    #[must_use]
    pub const fn loading(active: bool) -> Self {
        Self::Loading(LoadingPayload { active })
    }

    /// Creates a `Render` event.
    #[must_use]
    pub const fn render(content: RenderContent) -> Self {
        Self::Render(RenderPayload { content })
    }

    /// Creates an `Explanation` event.
    #[must_use]
    pub const fn explanation(text: Option<String>) -> Self {
        Self::Explanation(ExplanationPayload { text })
    }

    /// Creates a `Playback` event.
    #[must_use]
    pub const fn playback(playing: bool) -> Self {
        Self::Playback(PlaybackPayload { playing })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Cleared => "cleared",
            Self::Loading(_) => "loading",
            Self::Render(_) => "render",
            Self::Explanation(_) => "explanation",
            Self::Navigation(_) => "navigation",
            Self::Playback(_) => "playback",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// View Broadcaster
// ============================================================================

/// Broadcasts view events to every connected view client.
///
/// Uses a tokio broadcast channel. Events are not kept for clients that
/// connect later; they get a `connected` snapshot instead.
#[derive(Debug, Clone)]
pub struct ViewBroadcaster {
    sender: broadcast::Sender<ViewEvent>,
}

impl ViewBroadcaster {
    /// Creates a broadcaster with `capacity` buffered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind receives `Lagged` and misses events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning how many subscribers will see it.
    pub fn send(&self, event: ViewEvent) -> usize {
        // send() returns Err only if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ViewBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::api::AppState;

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New view client connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Time between heartbeat pings.
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Ping bookkeeping for one view client.
///
/// A ping only counts as missed when the next tick finds it still
/// unanswered.
#[derive(Debug, Default)]
struct Heartbeat {
    awaiting_pong: bool,
    missed_pongs: u8,
}

impl Heartbeat {
    /// Records a heartbeat tick. Returns `false` once the client has missed
    /// `MAX_MISSED_PONGS` pings, otherwise a new ping should be sent.
    fn on_tick(&mut self) -> bool {
        if self.awaiting_pong {
            self.missed_pongs = self.missed_pongs.saturating_add(1);
        }
        self.awaiting_pong = true;
        self.missed_pongs < MAX_MISSED_PONGS
    }

    fn on_pong(&mut self) {
        self.awaiting_pong = false;
        self.missed_pongs = 0;
    }
}

/// Handles a single view client.
///
/// - Sends `connected` with the current snapshot immediately
/// - Forwards all view events to the client
/// - Sends a heartbeat ping every 30 seconds, starting 30 seconds in
/// - Closes the connection when a tick finds the third ping in a row
///   unanswered
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before taking the snapshot so nothing falls in between
    let mut event_receiver = state.broadcaster.subscribe();

    let snapshot = match state.session.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "Cannot snapshot session for view client");
            return;
        }
    };

    let connected_json = match serde_json::to_string(&ViewEvent::connected(snapshot)) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize connected event: {}", e);
            return;
        }
    };

    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    info!("View client connected, sent snapshot");

    let mut heartbeat_interval = interval_at(Instant::now() + HEARTBEAT_PERIOD, HEARTBEAT_PERIOD);
    let mut heartbeat = Heartbeat::default();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        heartbeat.on_pong();
                        debug!("Received pong from view client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("View client requested close");
                        break;
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        // Commands go through the HTTP API
                        debug!("Ignoring data message from view client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(view_event) => {
                        let json = match serde_json::to_string(&view_event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };

                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("View client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if !heartbeat.on_tick() {
                    info!("View client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
            }
        }
    }

    info!("View client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
