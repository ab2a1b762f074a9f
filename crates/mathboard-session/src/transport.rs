//! Transport adapter for the remote step service.
//!
//! The service speaks JSON text frames over a WebSocket, each shaped as
//! `{"event": <name>, "payload": {...}}`. Outbound events are queued on a
//! [`TransportHandle`]; inbound events and connection changes are pushed as
//! [`TransportEvent`]s onto a channel the session controller consumes.
//!
//! The adapter connects lazily when the first event is emitted and, after a
//! failure, tries again on the next emit. It does nothing else for
//! reliability.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{MathboardError, Result};
use crate::step::{RequestId, Step, StepAudio};

/// Message shown when the service cannot be reached.
pub const CONNECT_ERROR_MESSAGE: &str = "Connection error. Please try again later.";

// ============================================================================
// Wire events
// ============================================================================

/// Payload of `request_math`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMathPayload {
    /// The user's question.
    pub prompt: String,
    /// Identity the service must echo on every step.
    pub request_id: RequestId,
}

/// Events sent to the step service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Ask for an explanation.
    RequestMath(RequestMathPayload),
}

impl ClientEvent {
    /// Creates a `RequestMath` event.
    #[must_use]
    pub fn request_math(prompt: impl Into<String>, request_id: RequestId) -> Self {
        Self::RequestMath(RequestMathPayload {
            prompt: prompt.into(),
            request_id,
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::RequestMath(_) => "request_math",
        }
    }
}

/// Payload of `display_step`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayStepPayload {
    /// The request this step answers.
    pub request_id: RequestId,
    /// LaTeX source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math: Option<String>,
    /// MathML markup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mathml: Option<String>,
    /// Natural-language explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural: Option<String>,
    /// Whether the step is narrated.
    #[serde(default)]
    pub has_audio: bool,
    /// Base64-encoded narration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl From<DisplayStepPayload> for Step {
    fn from(payload: DisplayStepPayload) -> Self {
        let mut step = Self::new(payload.request_id);
        if let Some(mathml) = payload.mathml {
            step = step.with_mathml(mathml);
        }
        if let Some(math) = payload.math {
            step = step.with_latex(math);
        }
        if let Some(natural) = payload.natural {
            step = step.with_explanation(natural);
        }
        if payload.has_audio || payload.audio.is_some() {
            step = step.with_audio(StepAudio {
                has_audio: payload.has_audio,
                data: payload.audio.unwrap_or_default(),
            });
        }
        step
    }
}

/// Payload of the service's `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceErrorPayload {
    /// Message shown to the user as-is.
    pub message: String,
}

/// Events received from the step service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// One explanation step.
    DisplayStep(DisplayStepPayload),
    /// The service reported a failure.
    Error(ServiceErrorPayload),
}

/// What the adapter pushes to the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An event from the service.
    Server(ServerEvent),
    /// The connection opened.
    Connected,
    /// The connection closed.
    Disconnected,
    /// The service could not be reached or the send failed.
    ConnectError(String),
}

// ============================================================================
// TransportHandle
// ============================================================================

/// Cloneable sender for outbound events.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<ClientEvent>,
}

impl TransportHandle {
    /// Creates a handle and the receiver the adapter drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        (Self { outbound }, receiver)
    }

    /// Queues `event` for sending.
    ///
    /// # Errors
    ///
    /// Returns `MathboardError::TransportClosed` if the adapter has stopped.
    pub fn emit(&self, event: ClientEvent) -> Result<()> {
        let name = event.event_name();
        self.outbound
            .send(event)
            .map_err(|_| MathboardError::transport_closed(name))
    }
}

// ============================================================================
// WebSocket adapter
// ============================================================================

/// Starts the WebSocket adapter for `url`.
///
/// Returns the outbound handle and the adapter task. The task ends when every
/// handle is dropped or the controller stops listening.
pub fn spawn_ws_transport(
    url: impl Into<String>,
    events: mpsc::Sender<TransportEvent>,
) -> (TransportHandle, JoinHandle<()>) {
    let (handle, outbound) = TransportHandle::channel();
    let task = tokio::spawn(run_ws_transport(url.into(), outbound, events));
    (handle, task)
}

async fn run_ws_transport(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    events: mpsc::Sender<TransportEvent>,
) {
    // Each iteration is one connection, opened for the event that needs it
    while let Some(first) = outbound.recv().await {
        let socket = match connect_async(url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                warn!(url = %url, error = %e, "Cannot connect to step service");
                if events
                    .send(TransportEvent::ConnectError(e.to_string()))
                    .await
                    .is_err()
                {
                    return;
                }
                continue;
            }
        };
        info!(url = %url, "Connected to step service");
        if events.send(TransportEvent::Connected).await.is_err() {
            return;
        }

        let (mut sink, mut stream) = socket.split();
        let mut pending = Some(first);

        loop {
            if let Some(event) = pending.take() {
                if let Err(e) = send_event(&mut sink, &event).await {
                    warn!(error = %e, event = event.event_name(), "Failed to send event");
                    if events.send(TransportEvent::ConnectError(e)).await.is_err() {
                        return;
                    }
                    break;
                }
            }

            tokio::select! {
                next = outbound.recv() => {
                    match next {
                        Some(event) => pending = Some(event),
                        None => {
                            debug!("All transport handles dropped, closing connection");
                            let _ = sink.close().await;
                            return;
                        }
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(&text) {
                                Ok(event) => {
                                    if events.send(TransportEvent::Server(event)).await.is_err() {
                                        return;
                                    }
                                }
                                Err(e) => debug!(error = %e, "Ignoring unrecognised frame"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("Step service closed the connection");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ping replies are queued by tungstenite itself
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Step service connection failed");
                            break;
                        }
                    }
                }
            }
        }

        if events.send(TransportEvent::Disconnected).await.is_err() {
            return;
        }
    }
    debug!("Transport adapter stopped");
}

async fn send_event<S>(sink: &mut S, event: &ClientEvent) -> std::result::Result<(), String>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let json = serde_json::to_string(event).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
