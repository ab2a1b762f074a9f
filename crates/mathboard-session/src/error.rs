//! Error types for the Mathboard session client.
//!
//! This module defines the error hierarchy for operations that can fail in a
//! way the caller must see: configuration loading, query submission, step
//! store access, and the transport channel. Rendering and audio failures are
//! absorbed at their boundaries and have their own small types in
//! [`crate::presentation`] and [`crate::audio`].

use std::path::PathBuf;

/// A specialized `Result` type for Mathboard operations.
pub type Result<T> = std::result::Result<T, MathboardError>;

/// Errors that can occur while running a Mathboard session.
///
/// Variants carry an actionable suggestion where one exists.
#[derive(Debug, thiserror::Error)]
pub enum MathboardError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your mathboard.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// The configuration file exists but could not be read.
    #[error("Cannot read config file '{path}': {source}\n\nSuggestion: Check that the file is readable, or remove the --config flag to use defaults")]
    ConfigReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying read failure.
        #[source]
        source: std::io::Error,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The user submitted a question that is blank after trimming.
    #[error("Please enter a question")]
    EmptyInput,

    /// `promote_one` was called with nothing waiting in the pending queue.
    #[error("No pending step to promote")]
    EmptyQueue,

    /// `current` was called before any step was shown.
    #[error("No step is currently displayed")]
    NoCurrentStep,

    /// The session controller task is no longer running.
    #[error("Session controller has stopped\n\nSuggestion: Restart mathboard")]
    SessionClosed,

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// The outbound transport channel was closed.
    #[error("Transport channel closed: cannot emit '{event}'")]
    TransportClosed {
        /// Name of the event that could not be emitted.
        event: String,
    },
}

impl MathboardError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigReadError` for `path`.
    #[must_use]
    pub fn config_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ConfigReadError {
            path: path.into(),
            source,
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `TransportClosed` error for the named event.
    #[must_use]
    pub fn transport_closed(event: impl Into<String>) -> Self {
        Self::TransportClosed {
            event: event.into(),
        }
    }

    /// Returns `true` if the user can recover by acting again in the same session.
    ///
    /// Blank input and a dropped transport are both fixed by submitting again.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput | Self::EmptyQueue | Self::NoCurrentStep | Self::TransportClosed { .. }
        )
    }
}
