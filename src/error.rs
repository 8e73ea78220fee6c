//! Error types for netplayer.

use crate::pipeline::types::{ElementRole, PlaybackState, WirelessRole};
use thiserror::Error;

/// Reasons a chain cannot be linked or run.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("no source element registered")]
    MissingSource,

    #[error("no sink element registered")]
    MissingSink,

    #[error("pipeline elements are not linked")]
    NotLinked,
}

#[derive(Error, Debug)]
pub enum PlayerError {
    // Lifecycle errors
    #[error("Cannot {operation}: {reason}")]
    InvalidState {
        operation: &'static str,
        reason: String,
    },

    // Graph errors
    #[error("Slot '{role}' is already registered")]
    AlreadyRegistered { role: ElementRole },

    #[error("Slot '{role}' is not registered")]
    NotRegistered { role: ElementRole },

    #[error("Pipeline is still linked; break links before changing registration")]
    StillLinked,

    #[error("Link failed: {0}")]
    Link(#[from] LinkError),

    #[error("Did not stop within timeout: {}", pending.join(", "))]
    StopTimeout { pending: Vec<&'static str> },

    // Element errors
    #[error("Failed to create {kind} element: {message}")]
    ElementInit { kind: &'static str, message: String },

    #[error("Element '{element}' failed: {message}")]
    Element {
        element: &'static str,
        message: String,
    },

    // Wireless subsystem errors
    #[error("Wireless bring-up failed at {stage}: {message}")]
    SubsystemInit {
        stage: &'static str,
        message: String,
    },

    #[error("Wireless subsystem is unusable after a failed bring-up")]
    SubsystemPoisoned,

    #[error("Wireless subsystem already running as {active}, cannot bring it up as {requested}")]
    SubsystemConflict {
        active: WirelessRole,
        requested: WirelessRole,
    },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    #[error("Configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlayerError {
    /// An operation is not allowed in the player's current state.
    pub fn invalid_state(operation: &'static str, reason: impl Into<String>) -> Self {
        PlayerError::InvalidState {
            operation,
            reason: reason.into(),
        }
    }

    /// An operation is not allowed while the player is in `state`.
    pub fn wrong_state(operation: &'static str, state: PlaybackState) -> Self {
        Self::invalid_state(operation, format!("player is {state}"))
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Errors raised by an element while its task is running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElementError {
    /// The element can keep processing.
    #[error("Recoverable error: {0}")]
    Recoverable(String),
    /// The element task must exit.
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Failure to receive from the control event bus.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    #[error("no event within timeout")]
    Timeout,

    #[error("event bus disconnected")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_invalid_state_display() {
        let error = PlayerError::wrong_state("set source", PlaybackState::Playing);
        assert_eq!(error.to_string(), "Cannot set source: player is playing");

        let error = PlayerError::invalid_state("set source", "wireless input is active");
        assert_eq!(error.to_string(), "Cannot set source: wireless input is active");
    }

    #[test]
    fn test_already_registered_display() {
        let error = PlayerError::AlreadyRegistered {
            role: ElementRole::Decoder,
        };
        assert_eq!(error.to_string(), "Slot 'dec' is already registered");
    }

    #[test]
    fn test_link_error_display() {
        let error: PlayerError = LinkError::MissingSource.into();
        assert_eq!(error.to_string(), "Link failed: no source element registered");
    }

    #[test]
    fn test_stop_timeout_lists_pending_elements() {
        let error = PlayerError::StopTimeout {
            pending: vec!["in", "out"],
        };
        assert_eq!(error.to_string(), "Did not stop within timeout: in, out");
    }

    #[test]
    fn test_subsystem_conflict_display() {
        let error = PlayerError::SubsystemConflict {
            active: WirelessRole::Sink,
            requested: WirelessRole::Source,
        };
        assert_eq!(
            error.to_string(),
            "Wireless subsystem already running as sink, cannot bring it up as source"
        );
    }

    #[test]
    fn test_element_error_display() {
        let recoverable = ElementError::Recoverable("short read".to_string());
        assert_eq!(recoverable.to_string(), "Recoverable error: short read");

        let fatal = ElementError::Fatal("codec crashed".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: codec crashed");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: PlayerError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: PlayerError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PlayerError>();
        assert_sync::<PlayerError>();
    }
}
