//! The presentation boundary.
//!
//! The controller only talks to a [`PresentationSink`]. The shipped
//! [`BroadcastSink`] turns each call into a [`ViewEvent`] for the browser view
//! socket and the terminal client; typesetting happens on their side.

use async_trait::async_trait;
use tracing::debug;

use crate::session_state::NavigationAffordances;
use crate::step::RenderContent;
use crate::websocket::{ViewBroadcaster, ViewEvent};

/// Message shown when a step cannot be rendered.
pub const RENDER_ERROR_MESSAGE: &str = "Error displaying mathematical content";

/// Rendering failed; the controller reports it and carries on.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The content had nothing to typeset.
    #[error("nothing to render")]
    EmptyContent,

    /// The typesetter rejected the content.
    #[error("typesetter rejected content: {0}")]
    Rejected(String),
}

/// Where steps are shown.
#[async_trait]
pub trait PresentationSink: Send + Sync + 'static {
    /// Removes whatever is currently shown.
    async fn clear(&self);

    /// Typesets `content`, resolving when the typesetter acknowledges it.
    async fn render(&self, content: &RenderContent) -> Result<(), RenderError>;

    /// Replaces the explanation panel text.
    async fn show_explanation(&self, text: Option<&str>);

    /// Shows or hides the loading indicator.
    async fn show_loading(&self, active: bool);

    /// Shows a user-visible error.
    async fn show_error(&self, message: &str);

    /// Enables or disables navigation controls.
    async fn set_navigation(&self, navigation: NavigationAffordances);

    /// Reports whether narration is playing.
    async fn show_playback(&self, _playing: bool) {}
}

/// Publishes every sink call as a [`ViewEvent`].
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    broadcaster: ViewBroadcaster,
}

impl BroadcastSink {
    /// Creates a sink publishing through `broadcaster`.
    #[must_use]
    pub const fn new(broadcaster: ViewBroadcaster) -> Self {
        Self { broadcaster }
    }

    fn publish(&self, event: ViewEvent) {
        let receivers = self.broadcaster.send(event);
        if receivers == 0 {
            debug!("No view clients connected");
        }
    }
}

#[async_trait]
impl PresentationSink for BroadcastSink {
    async fn clear(&self) {
        self.publish(ViewEvent::Cleared);
    }

    async fn render(&self, content: &RenderContent) -> Result<(), RenderError> {
        let source = match content {
            RenderContent::Mathml(source) | RenderContent::Latex(source) => source,
        };
        if source.trim().is_empty() {
            return Err(RenderError::EmptyContent);
        }
        self.publish(ViewEvent::render(content.clone()));
        Ok(())
    }

    async fn show_explanation(&self, text: Option<&str>) {
        self.publish(ViewEvent::explanation(text.map(str::to_string)));
    }

    async fn show_loading(&self, active: bool) {
        self.publish(ViewEvent::loading(active));
    }

    async fn show_error(&self, message: &str) {
        self.publish(ViewEvent::error(message));
    }

    async fn set_navigation(&self, navigation: NavigationAffordances) {
        self.publish(ViewEvent::Navigation(navigation));
    }

    async fn show_playback(&self, playing: bool) {
        self.publish(ViewEvent::playback(playing));
    }
}
