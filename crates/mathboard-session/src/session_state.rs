//! Session phase and snapshot types.
//!
//! The controller's state is one tagged value rather than a set of loose
//! flags. The current request identity and the "audio is playing" condition
//! are both read from it, so navigating while audio plays has no
//! representation outside `AwaitingAudio`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::step::{RequestId, Step};

// ============================================================================
// PlaybackTicket
// ============================================================================

/// Identifies one started playback so late completions can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybackTicket(pub u64);

// ============================================================================
// SessionPhase
// ============================================================================

/// Current phase of the session controller.
///
/// Transitions:
/// - any phase → `Loading` on a new query
/// - `Loading` → `Displaying` when the first step is shown
/// - `Loading` | `Displaying` → `AwaitingAudio` when narration starts
/// - `AwaitingAudio` → `Displaying` when that narration ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionPhase {
    /// No query has been submitted.
    #[default]
    Idle,
    /// A query was sent and no step has been shown yet.
    Loading {
        /// The query's identity.
        request_id: RequestId,
    },
    /// A step is shown and navigation is allowed.
    Displaying {
        /// The query's identity.
        request_id: RequestId,
    },
    /// Narration is playing; navigation is rejected.
    AwaitingAudio {
        /// The query's identity.
        request_id: RequestId,
        /// The playback in flight.
        playback: PlaybackTicket,
    },
}

impl SessionPhase {
    /// The identity of the current query, if any.
    #[must_use]
    pub const fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Idle => None,
            Self::Loading { request_id }
            | Self::Displaying { request_id }
            | Self::AwaitingAudio { request_id, .. } => Some(request_id),
        }
    }

    /// Returns `true` if `request_id` is the current query.
    #[must_use]
    pub fn is_current(&self, request_id: &RequestId) -> bool {
        self.request_id() == Some(request_id)
    }

    /// Returns `true` while narration is playing.
    #[must_use]
    pub const fn is_awaiting_audio(&self) -> bool {
        matches!(self, Self::AwaitingAudio { .. })
    }

    /// The playback in flight, if any.
    #[must_use]
    pub const fn playback(&self) -> Option<PlaybackTicket> {
        match self {
            Self::AwaitingAudio { playback, .. } => Some(*playback),
            _ => None,
        }
    }

    /// The phase's name, for logging and snapshots.
    #[must_use]
    pub const fn name(&self) -> PhaseName {
        match self {
            Self::Idle => PhaseName::Idle,
            Self::Loading { .. } => PhaseName::Loading,
            Self::Displaying { .. } => PhaseName::Displaying,
            Self::AwaitingAudio { .. } => PhaseName::AwaitingAudio,
        }
    }

    /// Enters `AwaitingAudio` for `playback`.
    ///
    /// Returns `false` (and changes nothing) from `Idle` or while another
    /// playback is in flight.
    pub fn start_playback(&mut self, playback: PlaybackTicket) -> bool {
        match self {
            Self::Loading { request_id } | Self::Displaying { request_id } => {
                *self = Self::AwaitingAudio {
                    request_id: request_id.clone(),
                    playback,
                };
                true
            }
            Self::Idle | Self::AwaitingAudio { .. } => false,
        }
    }

    /// Leaves `AwaitingAudio` if `playback` is the one in flight.
    ///
    /// Returns `false` for a stale or unknown ticket.
    pub fn finish_playback(&mut self, playback: PlaybackTicket) -> bool {
        match self {
            Self::AwaitingAudio {
                request_id,
                playback: current,
            } if *current == playback => {
                *self = Self::Displaying {
                    request_id: request_id.clone(),
                };
                true
            }
            _ => false,
        }
    }

    /// Moves `Loading` to `Displaying`; other phases are left alone.
    pub fn mark_displaying(&mut self) {
        if let Self::Loading { request_id } = self {
            *self = Self::Displaying {
                request_id: request_id.clone(),
            };
        }
    }
}

/// Serializable name of a [`SessionPhase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    /// No query yet.
    Idle,
    /// Waiting for the first step.
    Loading,
    /// Showing a step.
    Displaying,
    /// Narration playing.
    AwaitingAudio,
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading => write!(f, "loading"),
            Self::Displaying => write!(f, "displaying"),
            Self::AwaitingAudio => write!(f, "awaiting_audio"),
        }
    }
}

// ============================================================================
// Navigation affordances and snapshot
// ============================================================================

/// Which navigation controls the view should enable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationAffordances {
    /// "Next step" is available.
    pub next: bool,
    /// "Previous step" is available.
    pub previous: bool,
    /// "Replay narration" is available.
    pub replay: bool,
}

/// Point-in-time view of the session, served by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Current phase.
    pub phase: PhaseName,
    /// Current query identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Cursor into history; absent before the first step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<usize>,
    /// Number of shown steps.
    pub history_len: usize,
    /// Number of pending steps.
    pub queue_len: usize,
    /// Enabled controls.
    pub navigation: NavigationAffordances,
    /// The step under the cursor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<Arc<Step>>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            phase: PhaseName::Idle,
            request_id: None,
            cursor: None,
            history_len: 0,
            queue_len: 0,
            navigation: NavigationAffordances::default(),
            current_step: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn loading() -> SessionPhase {
        SessionPhase::Loading {
            request_id: RequestId::new("r1"),
        }
    }

    #[test]
    fn test_idle_has_no_request() {
        let phase = SessionPhase::default();
        assert_eq!(phase.name(), PhaseName::Idle);
        assert!(phase.request_id().is_none());
        assert!(!phase.is_current(&RequestId::new("r1")));
    }

    #[test]
    fn test_is_current_matches_only_own_request() {
        let phase = loading();
        assert!(phase.is_current(&RequestId::new("r1")));
        assert!(!phase.is_current(&RequestId::new("r0")));
    }

    #[test]
    fn test_mark_displaying_only_from_loading() {
        let mut phase = loading();
        phase.mark_displaying();
        assert_eq!(phase.name(), PhaseName::Displaying);

        let mut idle = SessionPhase::Idle;
        idle.mark_displaying();
        assert_eq!(idle, SessionPhase::Idle);
    }

    #[test]
    fn test_playback_round_trip() {
        let mut phase = loading();
        phase.mark_displaying();

        assert!(phase.start_playback(PlaybackTicket(7)));
        assert!(phase.is_awaiting_audio());
        assert_eq!(phase.playback(), Some(PlaybackTicket(7)));
        assert!(phase.is_current(&RequestId::new("r1")));

        // A second playback cannot start while one is in flight
        assert!(!phase.start_playback(PlaybackTicket(8)));

        assert!(phase.finish_playback(PlaybackTicket(7)));
        assert_eq!(phase.name(), PhaseName::Displaying);
    }

    #[test]
    fn test_stale_ticket_is_ignored() {
        let mut phase = loading();
        assert!(phase.start_playback(PlaybackTicket(2)));
        assert!(!phase.finish_playback(PlaybackTicket(1)));
        assert!(phase.is_awaiting_audio());
    }

    #[test]
    fn test_idle_cannot_start_playback() {
        let mut phase = SessionPhase::Idle;
        assert!(!phase.start_playback(PlaybackTicket(1)));
        assert_eq!(phase, SessionPhase::Idle);
    }

    #[test]
    fn test_phase_name_serialization() {
        assert_eq!(
            serde_json::to_string(&PhaseName::AwaitingAudio).unwrap(),
            r#""awaiting_audio""#
        );
        assert_eq!(PhaseName::Loading.to_string(), "loading");
    }

    #[test]
    fn test_snapshot_serialization_skips_absent_fields() {
        let json = serde_json::to_string(&SessionSnapshot::default()).unwrap();
        assert!(json.contains(r#""phase":"idle""#));
        assert!(json.contains(r#""historyLen":0"#));
        assert!(!json.contains("cursor"));
        assert!(!json.contains("requestId"));
    }
}
