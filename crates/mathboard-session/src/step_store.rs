//! Pending queue, displayed history, and the cursor into history.
//!
//! The store has no side effects beyond its own state. The session controller
//! decides when each call is legal relative to audio playback.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{MathboardError, Result};
use crate::step::Step;

/// Steps that arrived but were not shown yet, and steps already shown.
///
/// Invariants:
/// - once a step has been shown, history is non-empty and the cursor points
///   inside it
/// - a step moves queue → history exactly once, appended at the end
/// - cursor moves never add or remove steps
#[derive(Debug, Default)]
pub struct StepStore {
    queue: VecDeque<Arc<Step>>,
    history: Vec<Arc<Step>>,
    cursor: Option<usize>,
}

impl StepStore {
    /// Creates an empty store with no cursor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an arrived step to the pending queue.
    pub fn enqueue(&mut self, step: Arc<Step>) {
        self.queue.push_back(step);
    }

    /// Moves the head of the queue to the end of history and points the cursor at it.
    ///
    /// # Errors
    ///
    /// Returns `MathboardError::EmptyQueue` if nothing is pending.
    pub fn promote_one(&mut self) -> Result<Arc<Step>> {
        let step = self.queue.pop_front().ok_or(MathboardError::EmptyQueue)?;
        self.history.push(Arc::clone(&step));
        self.cursor = Some(self.history.len() - 1);
        Ok(step)
    }

    /// Returns the step under the cursor.
    ///
    /// # Errors
    ///
    /// Returns `MathboardError::NoCurrentStep` before anything was shown.
    pub fn current(&self) -> Result<Arc<Step>> {
        self.cursor
            .and_then(|index| self.history.get(index))
            .cloned()
            .ok_or(MathboardError::NoCurrentStep)
    }

    /// Moves the cursor by `delta`, clamped to the bounds of history.
    ///
    /// Returns `true` if the cursor changed. Does nothing while history is empty.
    pub fn move_cursor(&mut self, delta: isize) -> bool {
        let Some(current) = self.cursor else {
            return false;
        };
        let last = self.history.len().saturating_sub(1);
        let target = current.saturating_add_signed(delta).min(last);
        if target == current {
            return false;
        }
        self.cursor = Some(target);
        true
    }

    /// Clears queue and history and drops the cursor.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.history.clear();
        self.cursor = None;
    }

    /// Position of the displayed step in history, `None` before the first one.
    #[must_use]
    pub const fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    /// Number of steps already shown.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Number of steps waiting to be shown.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Shown steps in display order.
    #[must_use]
    pub fn history(&self) -> &[Arc<Step>] {
        &self.history
    }

    /// Pending steps in arrival order.
    pub fn queue(&self) -> impl Iterator<Item = &Arc<Step>> {
        self.queue.iter()
    }

    /// Returns `true` if the cursor sits before the last shown step.
    #[must_use]
    pub fn is_rewound(&self) -> bool {
        self.cursor
            .is_some_and(|index| index + 1 < self.history.len())
    }

    /// Returns `true` if advancing would show something.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.is_rewound() || !self.queue.is_empty()
    }

    /// Returns `true` if rewinding would show something.
    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.cursor.is_some_and(|index| index > 0)
    }

    /// Returns `true` if nothing has arrived or been shown.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.history.is_empty()
    }
}
