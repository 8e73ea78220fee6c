//! Element contract and the handle the pipeline uses to share elements.
//!
//! An element is a black box: the pipeline only constructs it, registers it
//! in a slot, runs it as a task and talks to it through the methods below.

use crate::defaults::TASK_POLL_MS;
use crate::error::{ElementError, PlayerError, Result};
use crate::pipeline::event_bus::EventSender;
use crate::pipeline::runner::TaskControl;
use crate::pipeline::types::{
    AudioBlock, ControlMessage, ElementId, ElementRole, ElementStatus, StreamFormat,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

static NEXT_ELEMENT_ID: AtomicU32 = AtomicU32::new(1);

/// Outcome of one `Element::process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep scheduling the element.
    Continue,
    /// The element reached its natural end.
    Finished,
}

/// A processing node: source, decoder, effect or sink.
///
/// Implementations are provided by an [`ElementBackend`](crate::pipeline::factory::ElementBackend).
pub trait Element: Send + 'static {
    /// Short description of the concrete implementation (e.g. "http", "mp3").
    fn kind(&self) -> &'static str;

    /// Does one unit of work.
    ///
    /// Called repeatedly from the element's task while the chain runs. Must
    /// return promptly; use [`ElementContext::recv`] rather than blocking reads.
    fn process(&mut self, ctx: &mut ElementContext) -> std::result::Result<Flow, ElementError>;

    /// Current stream format known to the element.
    fn format(&self) -> StreamFormat;

    /// Overrides the stream format (used on the sink after renegotiation).
    fn set_format(&mut self, format: StreamFormat);

    /// Sets the target stream identifier. Only sources accept one.
    fn set_uri(&mut self, _uri: &str) -> Result<()> {
        Err(PlayerError::Element {
            element: self.kind(),
            message: "element does not accept a target identifier".to_string(),
        })
    }

    /// Target stream identifier, if any.
    fn uri(&self) -> Option<&str> {
        None
    }

    /// Reprograms the physical output clock. Only the local output sink has one.
    fn set_output_clock(&mut self, _sample_rate: u32, _bit_depth: u32, _channels: u32) -> Result<()> {
        Err(PlayerError::Element {
            element: self.kind(),
            message: "element has no output clock".to_string(),
        })
    }

    /// Called on the element's task before the first `process`.
    fn on_start(&mut self) {}

    /// Called on the element's task after the last `process`.
    fn on_stop(&mut self) {}
}

/// Events a playlist-aware network source raises while fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// Connection established.
    Connected,
    /// The playlist was parsed and all tracks resolved.
    ResolveAllTracks,
    /// The current track ended.
    FinishTrack,
    /// Every track of the playlist has been played.
    FinishPlaylist,
}

/// Playlist navigation a network source exposes to its event handler.
pub trait PlaylistControl {
    /// Advances to the next track of the playlist.
    fn next_track(&mut self) -> Result<()>;

    /// Fetches the playlist again from the current URI.
    fn fetch_again(&mut self) -> Result<()>;
}

struct ElementCell {
    id: ElementId,
    role: ElementRole,
    kind: &'static str,
    element: Mutex<Box<dyn Element>>,
}

/// Shared handle to a constructed element.
///
/// The graph slot and the owning side of the player hold clones; the element
/// is destroyed when the last clone drops.
#[derive(Clone)]
pub struct ElementHandle {
    inner: Arc<ElementCell>,
}

impl ElementHandle {
    /// Wraps an element for `role` and assigns it a fresh id.
    pub fn new(role: ElementRole, element: Box<dyn Element>) -> Self {
        let id = ElementId(NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed));
        let kind = element.kind();
        Self {
            inner: Arc::new(ElementCell {
                id,
                role,
                kind,
                element: Mutex::new(element),
            }),
        }
    }

    pub fn id(&self) -> ElementId {
        self.inner.id
    }

    pub fn role(&self) -> ElementRole {
        self.inner.role
    }

    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    /// Runs `f` with exclusive access to the element.
    ///
    /// Blocks while the element's task is inside `process`.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Element) -> R) -> R {
        let mut guard = self.lock();
        f(guard.as_mut())
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Box<dyn Element>> {
        // A panicking element task leaves the element usable for teardown.
        self.inner
            .element
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ElementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementHandle")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("kind", &self.inner.kind)
            .finish()
    }
}

/// Result of [`ElementContext::recv`].
#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Block(AudioBlock),
    /// Nothing arrived within the task poll interval.
    Empty,
    /// Upstream closed its link, or the element has no input.
    Closed,
}

/// Result of [`ElementContext::send`].
#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Downstream did not take the block in time; it is handed back.
    Full(AudioBlock),
    /// Downstream closed its link, or the element has no output.
    Closed,
}

/// Per-task view of the chain handed to `Element::process`.
pub struct ElementContext {
    id: ElementId,
    role: ElementRole,
    input: Option<Receiver<AudioBlock>>,
    output: Option<Sender<AudioBlock>>,
    events: Option<EventSender>,
    control: Arc<TaskControl>,
    poll: Duration,
}

impl ElementContext {
    pub(crate) fn new(
        element: &ElementHandle,
        input: Option<Receiver<AudioBlock>>,
        output: Option<Sender<AudioBlock>>,
        events: Option<EventSender>,
        control: Arc<TaskControl>,
    ) -> Self {
        Self {
            id: element.id(),
            role: element.role(),
            input,
            output,
            events,
            control,
            poll: Duration::from_millis(TASK_POLL_MS),
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn role(&self) -> ElementRole {
        self.role
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub(crate) fn control(&self) -> &TaskControl {
        &self.control
    }

    /// True once a stop command has been issued for this task.
    pub fn should_stop(&self) -> bool {
        self.control.is_stopping()
    }

    /// Waits up to one poll interval for a block from upstream.
    pub fn recv(&self) -> Received {
        let Some(input) = &self.input else {
            return Received::Closed;
        };
        match input.recv_timeout(self.poll) {
            Ok(block) => Received::Block(block),
            Err(RecvTimeoutError::Timeout) => Received::Empty,
            Err(RecvTimeoutError::Disconnected) => Received::Closed,
        }
    }

    /// Offers a block to downstream, waiting at most one poll interval.
    ///
    /// A full link hands the block back so the element can retry on its next
    /// `process` call without holding up control-plane access.
    pub fn send(&self, block: AudioBlock) -> Delivery {
        let Some(output) = &self.output else {
            return Delivery::Closed;
        };
        match output.send_timeout(block, self.poll) {
            Ok(()) => Delivery::Sent,
            Err(SendTimeoutError::Timeout(block)) => Delivery::Full(block),
            Err(SendTimeoutError::Disconnected(_)) => Delivery::Closed,
        }
    }

    /// Reports the stream format this element has determined.
    pub fn report_format(&self, format: StreamFormat) {
        self.emit(ControlMessage::FormatInfo {
            format,
            origin: self.id,
        });
    }

    pub(crate) fn report_status(&self, status: ElementStatus) {
        self.emit(ControlMessage::StatusReport {
            status,
            origin: self.id,
        });
    }

    /// Drops the downstream link so the next element sees end of input.
    pub(crate) fn close_output(&mut self) {
        self.output = None;
    }

    fn emit(&self, msg: ControlMessage) {
        if let Some(events) = &self.events {
            events.send(msg);
        }
    }
}
