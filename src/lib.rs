//! netplayer - streaming audio player pipeline
//!
//! Plays a network stream (optionally decoded) or audio received over a
//! short-range wireless link, through an optional equalizer, to a local
//! output or a remote wireless speaker.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod app;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod mock;
pub mod pipeline;

// Player
pub use pipeline::orchestrator::{AudioPlayer, PlayerEvent, PlayerOptions};

// Element contract (for backends)
pub use pipeline::element::{Element, ElementContext, ElementHandle, Flow, PlaylistControl};
pub use pipeline::factory::{ElementBackend, VariantFactory, WirelessSubsystem};

// Shared types
pub use pipeline::types::{
    CodecKind, ElementRole, ElementStatus, InputKind, OutputKind, PlaybackState, StreamFormat,
};

// Error handling
pub use error::{ElementError, LinkError, PlayerError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
