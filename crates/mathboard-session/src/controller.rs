//! The session controller: step playback state machine.
//!
//! One controller owns the request identity, the [`StepStore`], and the
//! [`SessionPhase`]. It runs as a single task that selects over user
//! commands, transport events, and playback completions, so every state
//! change happens in one place and in order.
//!
//! Audio plays in a spawned task whose result comes back over a channel.
//! While it plays the phase is `AwaitingAudio`: arrivals are still queued,
//! and navigation requests are answered with
//! [`IgnoredReason::AudioPlaying`] and dropped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mathboard_session::{
//!     BroadcastSink, DecodingPlayer, SessionController, TimedOutput, ViewBroadcaster,
//!     spawn_ws_transport,
//! };
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> mathboard_session::Result<()> {
//! let (events_tx, events_rx) = mpsc::channel(64);
//! let (transport, _adapter) = spawn_ws_transport("ws://127.0.0.1:8000/ws", events_tx);
//!
//! let sink = Arc::new(BroadcastSink::new(ViewBroadcaster::default()));
//! let player = Arc::new(DecodingPlayer::new(TimedOutput::new(64, Duration::from_secs(120))));
//!
//! let (session, _task) = SessionController::new(transport, sink, player).spawn(32, events_rx);
//! session.ask("solve x+1=2").await?;
//! session.next().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{AudioPlayer, PlaybackOutcome};
use crate::error::{MathboardError, Result};
use crate::presentation::{PresentationSink, RENDER_ERROR_MESSAGE};
use crate::session_state::{NavigationAffordances, PlaybackTicket, SessionPhase, SessionSnapshot};
use crate::step::{RequestId, RequestIdGenerator, Step};
use crate::step_store::StepStore;
use crate::transport::{
    ClientEvent, ServerEvent, TransportEvent, TransportHandle, CONNECT_ERROR_MESSAGE,
};

// ============================================================================
// Outcomes
// ============================================================================

/// Why a user action did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoredReason {
    /// Narration is playing.
    AudioPlaying,
    /// No further step has arrived yet.
    NothingQueued,
    /// Already at the first step.
    AtFirstStep,
    /// No step has been shown.
    NoStep,
    /// The current step has no narration.
    NoAudio,
}

/// Result of a navigation or replay request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action took effect.
    Applied,
    /// The action was dropped.
    Ignored(IgnoredReason),
}

impl ActionOutcome {
    /// Returns `true` if the action took effect.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// What happened to an arrived step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// First step of the session; shown immediately.
    Displayed,
    /// Waiting in the pending queue.
    Queued,
    /// Belonged to another request; dropped.
    Discarded,
}

/// Whether a display came from moving forward to a new step or revisiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DisplayPath {
    /// First display of a step; narration autoplays.
    Forward,
    /// Re-showing a step from history; narration does not autoplay.
    Revisit,
}

/// Sent by a playback task when its clip ends.
#[derive(Debug)]
struct PlaybackFinished {
    ticket: PlaybackTicket,
    outcome: PlaybackOutcome,
}

// ============================================================================
// Commands and handle
// ============================================================================

/// Requests sent to a running controller.
#[derive(Debug)]
pub enum SessionCommand {
    /// Submit a new question.
    Ask {
        /// The question text.
        prompt: String,
        /// Receives the new request identity.
        reply: oneshot::Sender<Result<RequestId>>,
    },
    /// Show the next step.
    Next {
        /// Receives the outcome.
        reply: oneshot::Sender<ActionOutcome>,
    },
    /// Show the previous step.
    Back {
        /// Receives the outcome.
        reply: oneshot::Sender<ActionOutcome>,
    },
    /// Replay the current step's narration.
    Replay {
        /// Receives the outcome.
        reply: oneshot::Sender<ActionOutcome>,
    },
    /// Read the session state.
    Snapshot {
        /// Receives the snapshot.
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Cloneable handle to a running controller.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Wraps a command sender.
    #[must_use]
    pub const fn new(commands: mpsc::Sender<SessionCommand>) -> Self {
        Self { commands }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| MathboardError::SessionClosed)?;
        response.await.map_err(|_| MathboardError::SessionClosed)
    }

    /// Submits a question, returning its request identity.
    ///
    /// # Errors
    ///
    /// `EmptyInput` for a blank question, `TransportClosed` if the adapter
    /// stopped, `SessionClosed` if the controller stopped.
    pub async fn ask(&self, prompt: impl Into<String>) -> Result<RequestId> {
        let prompt = prompt.into();
        self.request(|reply| SessionCommand::Ask { prompt, reply })
            .await?
    }

    /// Shows the next step.
    pub async fn next(&self) -> Result<ActionOutcome> {
        self.request(|reply| SessionCommand::Next { reply }).await
    }

    /// Shows the previous step.
    pub async fn back(&self) -> Result<ActionOutcome> {
        self.request(|reply| SessionCommand::Back { reply }).await
    }

    /// Replays the current step's narration.
    pub async fn replay(&self) -> Result<ActionOutcome> {
        self.request(|reply| SessionCommand::Replay { reply }).await
    }

    /// Reads the session state.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply })
            .await
    }
}

// ============================================================================
// SessionController
// ============================================================================

/// The step playback state machine.
pub struct SessionController {
    phase: SessionPhase,
    store: StepStore,
    ids: RequestIdGenerator,
    transport: TransportHandle,
    sink: Arc<dyn PresentationSink>,
    player: Arc<dyn AudioPlayer>,
    next_ticket: u64,
    playback_task: Option<JoinHandle<()>>,
    playback_tx: mpsc::UnboundedSender<PlaybackFinished>,
    playback_rx: mpsc::UnboundedReceiver<PlaybackFinished>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("phase", &self.phase)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Creates an idle controller.
    #[must_use]
    pub fn new(
        transport: TransportHandle,
        sink: Arc<dyn PresentationSink>,
        player: Arc<dyn AudioPlayer>,
    ) -> Self {
        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        Self {
            phase: SessionPhase::Idle,
            store: StepStore::new(),
            ids: RequestIdGenerator::new(),
            transport,
            sink,
            player,
            next_ticket: 0,
            playback_task: None,
            playback_tx,
            playback_rx,
        }
    }

    /// Starts the controller task, returning its handle.
    ///
    /// `inbound` is the channel the transport adapter pushes events onto.
    pub fn spawn(
        self,
        command_buffer: usize,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::channel(command_buffer.max(1));
        let task = tokio::spawn(self.run(commands_rx, inbound));
        (SessionHandle::new(commands_tx), task)
    }

    /// Processes commands, transport events, and playback completions until
    /// every [`SessionHandle`] is dropped.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut inbound: mpsc::Receiver<TransportEvent>,
    ) {
        let mut inbound_open = true;
        info!("Session controller started");

        loop {
            tokio::select! {
                // Apply arrivals and completions before acting on user commands
                biased;

                Some(finished) = self.playback_rx.recv() => {
                    self.finish_playback(finished).await;
                }

                event = inbound.recv(), if inbound_open => {
                    match event {
                        Some(event) => self.handle_transport_event(event).await,
                        None => {
                            warn!("Transport adapter stopped; no more steps will arrive");
                            inbound_open = false;
                        }
                    }
                }

                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("All session handles dropped");
                            break;
                        }
                    }
                }
            }
        }

        self.stop_playback();
        info!("Session controller stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Ask { prompt, reply } => {
                let result = self.submit_query(&prompt).await;
                let _ = reply.send(result);
            }
            SessionCommand::Next { reply } => {
                let outcome = self.advance().await;
                let _ = reply.send(outcome);
            }
            SessionCommand::Back { reply } => {
                let outcome = self.rewind().await;
                let _ = reply.send(outcome);
            }
            SessionCommand::Replay { reply } => {
                let outcome = self.replay_audio().await;
                let _ = reply.send(outcome);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    /// Applies one event from the transport adapter.
    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Server(ServerEvent::DisplayStep(payload)) => {
                self.on_step_arrived(Step::from(payload)).await;
            }
            TransportEvent::Server(ServerEvent::Error(payload)) => {
                warn!(message = %payload.message, "Step service reported an error");
                self.sink.show_loading(false).await;
                self.sink.show_error(&payload.message).await;
            }
            TransportEvent::Connected => info!("Step service connected"),
            TransportEvent::Disconnected => warn!("Step service disconnected"),
            TransportEvent::ConnectError(reason) => {
                warn!(reason = %reason, "Step service connection error");
                self.sink.show_loading(false).await;
                self.sink.show_error(CONNECT_ERROR_MESSAGE).await;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Starts a new query, superseding the current one.
    ///
    /// Stops narration still playing, resets the store, and emits
    /// `request_math` with a fresh identity.
    ///
    /// # Errors
    ///
    /// `EmptyInput` if `text` is blank (nothing is sent), `TransportClosed` if
    /// the adapter has stopped.
    pub async fn submit_query(&mut self, text: &str) -> Result<RequestId> {
        let prompt = text.trim();
        if prompt.is_empty() {
            debug!("Rejected blank question");
            self.sink.show_error(&MathboardError::EmptyInput.to_string()).await;
            return Err(MathboardError::EmptyInput);
        }

        self.stop_playback();
        let request_id = self.ids.next_id();
        self.store.reset();
        self.phase = SessionPhase::Loading {
            request_id: request_id.clone(),
        };

        self.sink.clear().await;
        self.sink.show_explanation(None).await;
        self.sink.show_loading(true).await;
        self.publish_navigation().await;

        info!(request_id = %request_id, prompt = %prompt, "Submitting question");
        if let Err(e) = self
            .transport
            .emit(ClientEvent::request_math(prompt, request_id.clone()))
        {
            warn!(error = %e, "Cannot send question");
            self.sink.show_loading(false).await;
            self.sink.show_error(CONNECT_ERROR_MESSAGE).await;
            return Err(e);
        }

        Ok(request_id)
    }

    /// Accepts a step from the service.
    ///
    /// Steps for any request but the current one are discarded. The first
    /// step of a session is shown at once; later ones wait for `advance`.
    pub async fn on_step_arrived(&mut self, step: Step) -> ArrivalOutcome {
        if !self.phase.is_current(step.request_id()) {
            debug!(
                request_id = %step.request_id(),
                current = ?self.phase.request_id().map(RequestId::as_str),
                "Discarding stale step"
            );
            return ArrivalOutcome::Discarded;
        }

        self.store.enqueue(Arc::new(step));

        if self.store.history_len() == 0 {
            if let Ok(first) = self.store.promote_one() {
                debug!(request_id = %first.request_id(), "Showing first step");
                self.phase.mark_displaying();
                self.sink.show_loading(false).await;
                self.display(&first, DisplayPath::Forward).await;
                return ArrivalOutcome::Displayed;
            }
        }

        debug!(queued = self.store.queue_len(), "Step queued");
        self.publish_navigation().await;
        ArrivalOutcome::Queued
    }

    /// Shows the next step.
    ///
    /// After a rewind this steps forward through history without replaying
    /// narration; at the end of history it promotes the next pending step and
    /// plays its narration.
    pub async fn advance(&mut self) -> ActionOutcome {
        if self.phase.is_awaiting_audio() {
            debug!("Advance ignored: audio playing");
            return ActionOutcome::Ignored(IgnoredReason::AudioPlaying);
        }

        if self.store.is_rewound() {
            self.store.move_cursor(1);
            return match self.store.current() {
                Ok(step) => {
                    self.display(&step, DisplayPath::Revisit).await;
                    ActionOutcome::Applied
                }
                Err(_) => ActionOutcome::Ignored(IgnoredReason::NoStep),
            };
        }

        match self.store.promote_one() {
            Ok(step) => {
                debug!(cursor = ?self.store.cursor(), "Advanced to new step");
                self.display(&step, DisplayPath::Forward).await;
                ActionOutcome::Applied
            }
            Err(_) => ActionOutcome::Ignored(IgnoredReason::NothingQueued),
        }
    }

    /// Shows the previous step without replaying its narration.
    pub async fn rewind(&mut self) -> ActionOutcome {
        if self.phase.is_awaiting_audio() {
            debug!("Rewind ignored: audio playing");
            return ActionOutcome::Ignored(IgnoredReason::AudioPlaying);
        }
        if !self.store.move_cursor(-1) {
            return ActionOutcome::Ignored(IgnoredReason::AtFirstStep);
        }

        match self.store.current() {
            Ok(step) => {
                debug!(cursor = ?self.store.cursor(), "Rewound");
                self.display(&step, DisplayPath::Revisit).await;
                ActionOutcome::Applied
            }
            Err(_) => ActionOutcome::Ignored(IgnoredReason::NoStep),
        }
    }

    /// Plays the current step's narration again.
    pub async fn replay_audio(&mut self) -> ActionOutcome {
        if self.phase.is_awaiting_audio() {
            return ActionOutcome::Ignored(IgnoredReason::AudioPlaying);
        }
        let Ok(step) = self.store.current() else {
            return ActionOutcome::Ignored(IgnoredReason::NoStep);
        };
        let Some(audio) = step.playable_audio() else {
            return ActionOutcome::Ignored(IgnoredReason::NoAudio);
        };

        if self.start_playback(audio.data.clone()).await {
            self.publish_navigation().await;
            ActionOutcome::Applied
        } else {
            ActionOutcome::Ignored(IgnoredReason::NoStep)
        }
    }

    /// Waits for the narration in flight to end and applies the result.
    ///
    /// Returns `None` if nothing is playing.
    pub async fn await_playback(&mut self) -> Option<PlaybackOutcome> {
        while self.phase.is_awaiting_audio() {
            let finished = self.playback_rx.recv().await?;
            let outcome = finished.outcome;
            if self.finish_playback(finished).await {
                return Some(outcome);
            }
        }
        None
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// The current phase.
    #[must_use]
    pub const fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    /// The step store.
    #[must_use]
    pub const fn store(&self) -> &StepStore {
        &self.store
    }

    /// Which navigation controls are enabled right now.
    #[must_use]
    pub fn affordances(&self) -> NavigationAffordances {
        if self.phase.is_awaiting_audio() {
            return NavigationAffordances::default();
        }
        NavigationAffordances {
            next: self.store.has_next(),
            previous: self.store.has_previous(),
            replay: self
                .store
                .current()
                .is_ok_and(|step| step.playable_audio().is_some()),
        }
    }

    /// Point-in-time view of the session.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase.name(),
            request_id: self.phase.request_id().cloned(),
            cursor: self.store.cursor(),
            history_len: self.store.history_len(),
            queue_len: self.store.queue_len(),
            navigation: self.affordances(),
            current_step: self.store.current().ok(),
        }
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    async fn display(&mut self, step: &Arc<Step>, path: DisplayPath) {
        self.sink.clear().await;

        match step.display_content() {
            Some(content) => {
                if let Err(e) = self.sink.render(&content).await {
                    warn!(error = %e, "Render failed");
                    self.sink.show_error(RENDER_ERROR_MESSAGE).await;
                }
            }
            None => {
                warn!(request_id = %step.request_id(), "Step has no renderable markup");
                self.sink.show_error(RENDER_ERROR_MESSAGE).await;
            }
        }

        self.sink.show_explanation(step.explanation()).await;

        if path == DisplayPath::Forward {
            if let Some(audio) = step.playable_audio() {
                self.start_playback(audio.data.clone()).await;
            }
        }

        self.publish_navigation().await;
    }

    async fn start_playback(&mut self, encoded: String) -> bool {
        self.next_ticket += 1;
        let ticket = PlaybackTicket(self.next_ticket);
        if !self.phase.start_playback(ticket) {
            return false;
        }

        let player = Arc::clone(&self.player);
        let done = self.playback_tx.clone();
        self.playback_task = Some(tokio::spawn(async move {
            let outcome = player.play(&encoded).await;
            // The controller may have stopped; nothing to report to then
            let _ = done.send(PlaybackFinished { ticket, outcome });
        }));

        debug!(ticket = ticket.0, "Playback started");
        self.sink.show_playback(true).await;
        true
    }

    async fn finish_playback(&mut self, finished: PlaybackFinished) -> bool {
        if !self.phase.finish_playback(finished.ticket) {
            debug!(ticket = finished.ticket.0, "Ignoring superseded playback");
            return false;
        }
        self.playback_task = None;

        debug!(ticket = finished.ticket.0, outcome = ?finished.outcome, "Playback finished");
        self.sink.show_playback(false).await;
        self.publish_navigation().await;
        true
    }

    fn stop_playback(&mut self) {
        if let Some(task) = self.playback_task.take() {
            debug!("Stopping superseded playback");
            task.abort();
        }
    }

    async fn publish_navigation(&self) {
        self.sink.set_navigation(self.affordances()).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
