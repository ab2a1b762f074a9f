//! Mathboard session client
//!
//! Plays a math explanation step by step: submits a question to the step
//! service, queues the steps it streams back, and lets the learner move
//! through them while narration gates navigation.

pub mod api;
pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod markup;
pub mod presentation;
pub mod session_state;
pub mod step;
pub mod step_store;
pub mod transport;
pub mod websocket;

pub use api::{create_router, ActionResponse, AppState, AskRequest, AskResponse, ErrorResponse};
pub use audio::{AudioError, AudioOutput, AudioPlayer, DecodingPlayer, PlaybackOutcome, TimedOutput};
pub use config::{AudioConfig, Config};
pub use controller::{
    ActionOutcome, ArrivalOutcome, IgnoredReason, SessionCommand, SessionController,
    SessionHandle,
};
pub use error::{MathboardError, Result};
pub use markup::{format_display_math, is_well_formed_mathml};
pub use presentation::{BroadcastSink, PresentationSink, RenderError, RENDER_ERROR_MESSAGE};
pub use session_state::{
    NavigationAffordances, PhaseName, PlaybackTicket, SessionPhase, SessionSnapshot,
};
pub use step::{RenderContent, RequestId, RequestIdGenerator, Step, StepAudio};
pub use step_store::StepStore;
pub use transport::{
    spawn_ws_transport, ClientEvent, DisplayStepPayload, RequestMathPayload, ServerEvent,
    ServiceErrorPayload, TransportEvent, TransportHandle, CONNECT_ERROR_MESSAGE,
};
pub use websocket::{ViewBroadcaster, ViewEvent};
