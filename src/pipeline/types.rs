//! Data types shared by the player pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Top-level playback state of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Position of an element in the chain.
///
/// The discriminant is the slot index; chain order is ascending slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ElementRole {
    Source = 0,
    Decoder = 1,
    Effect = 2,
    Sink = 3,
}

impl ElementRole {
    /// All roles in chain order.
    pub const ALL: [ElementRole; 4] = [
        ElementRole::Source,
        ElementRole::Decoder,
        ElementRole::Effect,
        ElementRole::Sink,
    ];

    /// Slot index in the graph.
    pub fn slot(self) -> usize {
        self as usize
    }

    /// Short link tag used in logs and link order listings.
    pub fn tag(self) -> &'static str {
        match self {
            ElementRole::Source => "in",
            ElementRole::Decoder => "dec",
            ElementRole::Effect => "eq",
            ElementRole::Sink => "out",
        }
    }
}

impl fmt::Display for ElementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Identity of a constructed element, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub(crate) u32);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Codec of the network stream; selects the decoder element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Raw stream, no decoder element.
    #[default]
    None,
    Mp3,
    Aac,
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodecKind::None => "none",
            CodecKind::Mp3 => "mp3",
            CodecKind::Aac => "aac",
        };
        f.write_str(name)
    }
}

impl FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "raw" => Ok(CodecKind::None),
            "mp3" => Ok(CodecKind::Mp3),
            "aac" => Ok(CodecKind::Aac),
            other => Err(format!("unknown codec '{other}' (expected none, mp3 or aac)")),
        }
    }
}

/// Which input variant is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Network stream, optionally followed by a decoder.
    NetworkDecoded,
    /// Short-range wireless sink feeding decoded audio.
    WirelessSink,
}

/// Which output variant the player was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputKind {
    /// Local output interface with a programmable clock.
    #[default]
    #[serde(rename = "local")]
    LocalOutput,
    /// Short-range wireless source streaming to a remote speaker.
    #[serde(rename = "wireless")]
    WirelessSource,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputKind::LocalOutput => "local",
            OutputKind::WirelessSource => "wireless",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" | "i2s" => Ok(OutputKind::LocalOutput),
            "wireless" | "a2dp" => Ok(OutputKind::WirelessSource),
            other => Err(format!("unknown output '{other}' (expected local or wireless)")),
        }
    }
}

/// Role the wireless subsystem is brought up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WirelessRole {
    /// The device receives audio (input side).
    Sink,
    /// The device sends audio (output side).
    Source,
}

impl fmt::Display for WirelessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WirelessRole::Sink => "sink",
            WirelessRole::Source => "source",
        };
        f.write_str(name)
    }
}

/// Sample format of the stream flowing through the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bits per sample.
    pub bit_depth: u32,
    /// Number of interleaved channels.
    pub channels: u32,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, bit_depth: u32, channels: u32) -> Self {
        Self {
            sample_rate,
            bit_depth,
            channels,
        }
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz, {} bit, {} ch",
            self.sample_rate, self.bit_depth, self.channels
        )
    }
}

/// Final status an element task reports when it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementStatus {
    /// Stopped by a stop command.
    Stopped,
    /// Reached the natural end of its input.
    Finished,
    /// Exited on a fatal element error.
    Error,
}

impl ElementStatus {
    /// True for the statuses that mean the chain halted.
    pub fn is_halt(self) -> bool {
        matches!(self, ElementStatus::Stopped | ElementStatus::Finished)
    }
}

/// Message an element pushes onto the control event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// The element parsed enough of the stream to know its format.
    FormatInfo {
        format: StreamFormat,
        origin: ElementId,
    },
    /// The element task changed status.
    StatusReport {
        status: ElementStatus,
        origin: ElementId,
    },
}

impl ControlMessage {
    /// Element that emitted the message.
    pub fn origin(&self) -> ElementId {
        match self {
            ControlMessage::FormatInfo { origin, .. } => *origin,
            ControlMessage::StatusReport { origin, .. } => *origin,
        }
    }
}

/// Opaque chunk of audio bytes passed along a link.
pub type AudioBlock = Vec<u8>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_are_in_slot_order() {
        let slots: Vec<usize> = ElementRole::ALL.iter().map(|r| r.slot()).collect();
        assert_eq!(slots, vec![0, 1, 2, 3]);
        assert!(ElementRole::Source < ElementRole::Decoder);
        assert!(ElementRole::Effect < ElementRole::Sink);
    }

    #[test]
    fn test_role_tags() {
        let tags: Vec<&str> = ElementRole::ALL.iter().map(|r| r.tag()).collect();
        assert_eq!(tags, vec!["in", "dec", "eq", "out"]);
    }

    #[test]
    fn test_codec_from_str() {
        assert_eq!("mp3".parse::<CodecKind>(), Ok(CodecKind::Mp3));
        assert_eq!("AAC".parse::<CodecKind>(), Ok(CodecKind::Aac));
        assert_eq!("none".parse::<CodecKind>(), Ok(CodecKind::None));
        assert!("flac".parse::<CodecKind>().is_err());
    }

    #[test]
    fn test_output_from_str() {
        assert_eq!("local".parse::<OutputKind>(), Ok(OutputKind::LocalOutput));
        assert_eq!("a2dp".parse::<OutputKind>(), Ok(OutputKind::WirelessSource));
        assert!("hdmi".parse::<OutputKind>().is_err());
    }

    #[test]
    fn test_halt_statuses() {
        assert!(ElementStatus::Stopped.is_halt());
        assert!(ElementStatus::Finished.is_halt());
        assert!(!ElementStatus::Error.is_halt());
    }

    #[test]
    fn test_stream_format_display() {
        let format = StreamFormat::new(44100, 16, 2);
        assert_eq!(format.to_string(), "44100 Hz, 16 bit, 2 ch");
    }

    #[test]
    fn test_control_message_origin() {
        let origin = ElementId(7);
        let msg = ControlMessage::StatusReport {
            status: ElementStatus::Finished,
            origin,
        };
        assert_eq!(msg.origin(), origin);
    }
}
