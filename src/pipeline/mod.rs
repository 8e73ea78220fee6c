//! Audio player pipeline.
//!
//! A fixed chain of up to four elements (source, decoder, equalizer, sink),
//! each running in its own thread, connected by bounded crossbeam channels.
//! Elements report format and status changes on a shared control event bus
//! that the player polls.

pub mod element;
pub mod event_bus;
pub mod factory;
pub mod graph;
pub mod orchestrator;
pub(crate) mod runner;
pub mod types;

pub use element::{
    Delivery, Element, ElementContext, ElementHandle, Flow, PlaylistControl, Received, StreamEvent,
};
pub use event_bus::{EventBus, EventSender};
pub use factory::{
    BringUpStep, ElementBackend, InputElements, NetworkSourceConfig, OutputElements,
    StreamEventHandler, VariantFactory, WirelessSubsystem, http_stream_event_handler,
};
pub use graph::{ElementGraph, GraphState};
pub use orchestrator::{AudioPlayer, PlayerEvent, PlayerOptions};
pub use types::{
    AudioBlock, CodecKind, ControlMessage, ElementId, ElementRole, ElementStatus, InputKind,
    OutputKind, PlaybackState, StreamFormat, WirelessRole,
};
