//! Fixed four-slot element chain.
//!
//! Slots are indexed by [`ElementRole`], so the chain order is always
//! source, decoder, effect, sink with empty slots skipped. Structural changes
//! (register, unregister, link, unlink) are only allowed while no element task
//! is running.

use crate::error::{LinkError, PlayerError, Result};
use crate::pipeline::element::{ElementContext, ElementHandle};
use crate::pipeline::event_bus::EventSender;
use crate::pipeline::runner::{ElementRunner, TaskControl};
use crate::pipeline::types::{ElementId, ElementRole};
use crossbeam_channel::bounded;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const JOIN_POLL: Duration = Duration::from_millis(5);

/// Execution state of the element tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// No tasks exist.
    Idle,
    Running,
    Paused,
    /// Stop was signalled; tasks have not been reaped yet.
    Stopping,
}

/// Ordered chain of at most one element per role.
pub struct ElementGraph {
    /// Registered elements, indexed by [`ElementRole::slot`].
    slots: [Option<ElementHandle>; 4],
    /// Whether `link_all` succeeded since the last `break_links`.
    linked: bool,
    /// Bus handed to every task started by `run`.
    listener: Option<EventSender>,
    /// Blocks buffered per link.
    link_capacity: usize,
    /// One runner per task of the current run, in chain order.
    runners: Vec<ElementRunner>,
    /// Control signal of each runner, same order as `runners`.
    controls: Vec<Arc<TaskControl>>,
    state: GraphState,
}

impl ElementGraph {
    /// Creates an empty graph whose links buffer `link_capacity` blocks each.
    pub fn new(link_capacity: usize) -> Self {
        info!("create audio pipeline");
        Self {
            slots: Default::default(),
            linked: false,
            listener: None,
            link_capacity: link_capacity.max(1),
            runners: Vec::new(),
            controls: Vec::new(),
            state: GraphState::Idle,
        }
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Element registered for `role`, if any.
    pub fn element(&self, role: ElementRole) -> Option<&ElementHandle> {
        self.slots[role.slot()].as_ref()
    }

    pub fn contains(&self, role: ElementRole) -> bool {
        self.element(role).is_some()
    }

    /// Tags of the occupied slots in chain order.
    pub fn link_order(&self) -> Vec<&'static str> {
        self.occupied().map(|el| el.role().tag()).collect()
    }

    /// The element whose format reports drive renegotiation: the decoder
    /// when one is registered, otherwise the source.
    pub fn format_reporter(&self) -> Option<ElementId> {
        self.element(ElementRole::Decoder)
            .or_else(|| self.element(ElementRole::Source))
            .map(ElementHandle::id)
    }

    /// Places `element` in the slot for its role.
    ///
    /// # Panics
    ///
    /// Panics if element tasks are running.
    pub fn register(&mut self, element: ElementHandle) -> Result<()> {
        self.assert_idle("register");
        if self.linked {
            return Err(PlayerError::StillLinked);
        }
        let role = element.role();
        let slot = &mut self.slots[role.slot()];
        if slot.is_some() {
            return Err(PlayerError::AlreadyRegistered { role });
        }
        info!(tag = role.tag(), kind = element.kind(), id = %element.id(), "register element");
        *slot = Some(element);
        Ok(())
    }

    /// Removes and returns the element in the slot for `role`.
    ///
    /// # Panics
    ///
    /// Panics if element tasks are running.
    pub fn unregister(&mut self, role: ElementRole) -> Result<ElementHandle> {
        self.assert_idle("unregister");
        if self.linked {
            return Err(PlayerError::StillLinked);
        }
        let element = self.slots[role.slot()]
            .take()
            .ok_or(PlayerError::NotRegistered { role })?;
        debug!(tag = role.tag(), id = %element.id(), "unregister element");
        Ok(element)
    }

    /// Links the registered elements in slot order.
    ///
    /// # Panics
    ///
    /// Panics if element tasks are running.
    pub fn link_all(&mut self) -> Result<()> {
        self.assert_idle("link");
        if !self.contains(ElementRole::Source) {
            return Err(LinkError::MissingSource.into());
        }
        if !self.contains(ElementRole::Sink) {
            return Err(LinkError::MissingSink.into());
        }
        self.linked = true;
        info!(order = ?self.link_order(), "link elements");
        Ok(())
    }

    /// Removes all links. Registrations are kept.
    ///
    /// # Panics
    ///
    /// Panics if element tasks are running.
    pub fn break_links(&mut self) {
        self.assert_idle("unlink");
        if self.linked {
            debug!("break links");
        }
        self.linked = false;
    }

    /// Attaches the consumer of element control messages.
    ///
    /// Takes effect at the next [`run`](Self::run).
    pub fn set_listener(&mut self, listener: EventSender) {
        self.listener = Some(listener);
    }

    /// Starts one task per linked element.
    ///
    /// # Panics
    ///
    /// Panics if element tasks already exist.
    pub fn run(&mut self) -> Result<()> {
        self.assert_idle("run");
        if !self.linked {
            return Err(LinkError::NotLinked.into());
        }

        let chain: Vec<ElementHandle> = self.occupied().cloned().collect();
        let mut upstream = None;
        for (index, element) in chain.iter().enumerate() {
            let (output, next_input) = if index + 1 < chain.len() {
                let (tx, rx) = bounded(self.link_capacity);
                (Some(tx), Some(rx))
            } else {
                (None, None)
            };
            let control = Arc::new(TaskControl::new());
            let ctx = ElementContext::new(
                element,
                upstream.take(),
                output,
                self.listener.clone(),
                control.clone(),
            );
            match ElementRunner::spawn(element.clone(), ctx) {
                Ok(runner) => {
                    self.runners.push(runner);
                    self.controls.push(control);
                }
                Err(e) => {
                    error!(tag = element.role().tag(), "failed to spawn element task: {e}");
                    self.state = GraphState::Stopping;
                    self.signal_stop();
                    if let Err(stop_error) = self.wait_for_stop(Duration::from_secs(1)) {
                        warn!("{stop_error}");
                    }
                    return Err(e.into());
                }
            }
            upstream = next_input;
        }

        self.state = GraphState::Running;
        info!(tasks = self.runners.len(), "pipeline running");
        Ok(())
    }

    /// Suspends every element task.
    ///
    /// # Panics
    ///
    /// Panics unless the graph is running.
    pub fn pause(&mut self) {
        assert_eq!(self.state, GraphState::Running, "pause requires a running pipeline");
        for control in &self.controls {
            control.pause();
        }
        self.state = GraphState::Paused;
    }

    /// Resumes every element task.
    ///
    /// # Panics
    ///
    /// Panics unless the graph is paused.
    pub fn resume(&mut self) {
        assert_eq!(self.state, GraphState::Paused, "resume requires a paused pipeline");
        for control in &self.controls {
            control.resume();
        }
        self.state = GraphState::Running;
    }

    /// Signals every task to stop without waiting. No-op when idle.
    pub fn stop(&mut self) {
        if self.state == GraphState::Idle {
            return;
        }
        self.signal_stop();
        self.state = GraphState::Stopping;
    }

    /// Waits up to `timeout` for all tasks to exit and reaps them.
    ///
    /// Tasks still alive at the deadline are detached and reported in
    /// [`PlayerError::StopTimeout`]. The graph is idle afterwards either way.
    pub fn wait_for_stop(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !self.runners.iter().all(ElementRunner::is_finished) && Instant::now() < deadline {
            thread::sleep(JOIN_POLL);
        }

        let mut pending = Vec::new();
        for runner in self.runners.drain(..) {
            if runner.is_finished() {
                if let Err(e) = runner.join() {
                    error!("{e}");
                }
            } else {
                pending.push(runner.name());
            }
        }
        self.controls.clear();
        self.state = GraphState::Idle;

        if pending.is_empty() {
            debug!("all element tasks exited");
            Ok(())
        } else {
            warn!(?pending, "element tasks did not stop in time, detaching");
            Err(PlayerError::StopTimeout { pending })
        }
    }

    /// Stops and reaps any running tasks.
    pub fn terminate(&mut self, timeout: Duration) -> Result<()> {
        if self.state == GraphState::Idle {
            return Ok(());
        }
        self.stop();
        self.wait_for_stop(timeout)
    }

    fn signal_stop(&self) {
        for control in &self.controls {
            control.stop();
        }
    }

    fn occupied(&self) -> impl Iterator<Item = &ElementHandle> {
        self.slots.iter().flatten()
    }

    fn assert_idle(&self, operation: &str) {
        assert!(
            self.state == GraphState::Idle,
            "cannot {operation} while the pipeline is {:?}",
            self.state
        );
    }
}

impl Drop for ElementGraph {
    fn drop(&mut self) {
        // Tasks own clones of their elements and exit on their own once signalled.
        self.signal_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ElementError;
    use crate::pipeline::element::{Delivery, Element, Flow, Received};
    use crate::pipeline::event_bus::EventBus;
    use crate::pipeline::types::{AudioBlock, ControlMessage, ElementStatus, StreamFormat};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Emits `remaining` blocks, or runs forever when unbounded
    struct Producer {
        remaining: Option<usize>,
        pending: Option<AudioBlock>,
    }

    impl Element for Producer {
        fn kind(&self) -> &'static str {
            "producer"
        }

        fn process(&mut self, ctx: &mut ElementContext) -> std::result::Result<Flow, ElementError> {
            let block = match self.pending.take() {
                Some(block) => block,
                None => match &mut self.remaining {
                    Some(0) => return Ok(Flow::Finished),
                    Some(n) => {
                        *n -= 1;
                        vec![0; 16]
                    }
                    None => vec![0; 16],
                },
            };
            match ctx.send(block) {
                Delivery::Sent => Ok(Flow::Continue),
                Delivery::Full(block) => {
                    self.pending = Some(block);
                    Ok(Flow::Continue)
                }
                Delivery::Closed => Ok(Flow::Finished),
            }
        }

        fn format(&self) -> StreamFormat {
            StreamFormat::default()
        }

        fn set_format(&mut self, _format: StreamFormat) {}
    }

    // Forwards blocks unchanged
    struct Relay {
        pending: Option<AudioBlock>,
    }

    impl Element for Relay {
        fn kind(&self) -> &'static str {
            "relay"
        }

        fn process(&mut self, ctx: &mut ElementContext) -> std::result::Result<Flow, ElementError> {
            let block = match self.pending.take() {
                Some(block) => block,
                None => match ctx.recv() {
                    Received::Block(block) => block,
                    Received::Empty => return Ok(Flow::Continue),
                    Received::Closed => return Ok(Flow::Finished),
                },
            };
            match ctx.send(block) {
                Delivery::Sent => Ok(Flow::Continue),
                Delivery::Full(block) => {
                    self.pending = Some(block);
                    Ok(Flow::Continue)
                }
                Delivery::Closed => Ok(Flow::Finished),
            }
        }

        fn format(&self) -> StreamFormat {
            StreamFormat::default()
        }

        fn set_format(&mut self, _format: StreamFormat) {}
    }

    struct Counter {
        count: Arc<AtomicUsize>,
    }

    impl Element for Counter {
        fn kind(&self) -> &'static str {
            "counter"
        }

        fn process(&mut self, ctx: &mut ElementContext) -> std::result::Result<Flow, ElementError> {
            match ctx.recv() {
                Received::Block(_) => {
                    self.count.fetch_add(1, Ordering::SeqCst);
                    Ok(Flow::Continue)
                }
                Received::Empty => Ok(Flow::Continue),
                Received::Closed => Ok(Flow::Finished),
            }
        }

        fn format(&self) -> StreamFormat {
            StreamFormat::default()
        }

        fn set_format(&mut self, _format: StreamFormat) {}
    }

    fn producer(blocks: Option<usize>) -> ElementHandle {
        ElementHandle::new(
            ElementRole::Source,
            Box::new(Producer {
                remaining: blocks,
                pending: None,
            }),
        )
    }

    fn relay(role: ElementRole) -> ElementHandle {
        ElementHandle::new(role, Box::new(Relay { pending: None }))
    }

    fn counter(count: &Arc<AtomicUsize>) -> ElementHandle {
        ElementHandle::new(
            ElementRole::Sink,
            Box::new(Counter {
                count: count.clone(),
            }),
        )
    }

    fn sink_status(bus: &EventBus, sink: ElementId) -> Option<ElementStatus> {
        while let Ok(msg) = bus.listen(Duration::from_millis(500)) {
            if let ControlMessage::StatusReport { status, origin } = msg
                && origin == sink
            {
                return Some(status);
            }
        }
        None
    }

    #[test]
    fn test_register_rejects_occupied_slot() {
        let mut graph = ElementGraph::new(4);
        graph.register(producer(Some(1))).unwrap();
        let result = graph.register(producer(Some(1)));
        assert!(matches!(
            result,
            Err(PlayerError::AlreadyRegistered {
                role: ElementRole::Source
            })
        ));
    }

    #[test]
    fn test_unregister_missing_slot() {
        let mut graph = ElementGraph::new(4);
        assert!(matches!(
            graph.unregister(ElementRole::Decoder),
            Err(PlayerError::NotRegistered {
                role: ElementRole::Decoder
            })
        ));
    }

    #[test]
    fn test_link_requires_source_and_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ElementGraph::new(4);
        assert!(matches!(
            graph.link_all(),
            Err(PlayerError::Link(LinkError::MissingSource))
        ));

        graph.register(producer(Some(1))).unwrap();
        assert!(matches!(
            graph.link_all(),
            Err(PlayerError::Link(LinkError::MissingSink))
        ));

        graph.register(counter(&count)).unwrap();
        graph.link_all().unwrap();
        assert!(graph.is_linked());
    }

    #[test]
    fn test_link_order_follows_slots() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ElementGraph::new(4);
        // Registration order does not matter
        graph.register(counter(&count)).unwrap();
        graph.register(relay(ElementRole::Effect)).unwrap();
        graph.register(producer(Some(1))).unwrap();
        graph.register(relay(ElementRole::Decoder)).unwrap();
        assert_eq!(graph.link_order(), vec!["in", "dec", "eq", "out"]);
    }

    #[test]
    fn test_registration_requires_unlinked_graph() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ElementGraph::new(4);
        graph.register(producer(Some(1))).unwrap();
        graph.register(counter(&count)).unwrap();
        graph.link_all().unwrap();

        assert!(matches!(
            graph.register(relay(ElementRole::Decoder)),
            Err(PlayerError::StillLinked)
        ));
        assert!(matches!(
            graph.unregister(ElementRole::Source),
            Err(PlayerError::StillLinked)
        ));

        graph.break_links();
        assert!(graph.unregister(ElementRole::Source).is_ok());
    }

    #[test]
    fn test_format_reporter_prefers_decoder() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ElementGraph::new(4);
        let source = producer(Some(1));
        let decoder = relay(ElementRole::Decoder);
        graph.register(source.clone()).unwrap();
        graph.register(counter(&count)).unwrap();
        assert_eq!(graph.format_reporter(), Some(source.id()));

        graph.register(decoder.clone()).unwrap();
        assert_eq!(graph.format_reporter(), Some(decoder.id()));
    }

    #[test]
    fn test_run_requires_links() {
        let mut graph = ElementGraph::new(4);
        assert!(matches!(
            graph.run(),
            Err(PlayerError::Link(LinkError::NotLinked))
        ));
    }

    #[test]
    fn test_chain_delivers_every_block() {
        let bus = EventBus::new(16);
        let count = Arc::new(AtomicUsize::new(0));
        let sink = counter(&count);
        let mut graph = ElementGraph::new(2);
        graph.register(producer(Some(20))).unwrap();
        graph.register(relay(ElementRole::Decoder)).unwrap();
        graph.register(relay(ElementRole::Effect)).unwrap();
        graph.register(sink.clone()).unwrap();
        graph.set_listener(bus.sender());
        graph.link_all().unwrap();
        graph.run().unwrap();

        assert_eq!(sink_status(&bus, sink.id()), Some(ElementStatus::Finished));
        graph.terminate(Duration::from_secs(1)).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 20);
        assert_eq!(graph.state(), GraphState::Idle);
    }

    #[test]
    fn test_stop_reports_stopped() {
        let bus = EventBus::new(16);
        let count = Arc::new(AtomicUsize::new(0));
        let sink = counter(&count);
        let mut graph = ElementGraph::new(2);
        graph.register(producer(None)).unwrap();
        graph.register(sink.clone()).unwrap();
        graph.set_listener(bus.sender());
        graph.link_all().unwrap();
        graph.run().unwrap();

        graph.stop();
        assert_eq!(graph.state(), GraphState::Stopping);
        graph.wait_for_stop(Duration::from_secs(1)).unwrap();
        assert_eq!(sink_status(&bus, sink.id()), Some(ElementStatus::Stopped));
    }

    #[test]
    fn test_pause_and_resume() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ElementGraph::new(2);
        graph.register(producer(None)).unwrap();
        graph.register(counter(&count)).unwrap();
        graph.link_all().unwrap();
        graph.run().unwrap();

        graph.pause();
        assert_eq!(graph.state(), GraphState::Paused);
        graph.resume();
        assert_eq!(graph.state(), GraphState::Running);
        assert_eq!(graph.link_order(), vec!["in", "out"]);

        graph.terminate(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_graph_can_run_again_after_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ElementGraph::new(2);
        graph.register(producer(None)).unwrap();
        graph.register(counter(&count)).unwrap();
        graph.link_all().unwrap();

        for _ in 0..2 {
            graph.run().unwrap();
            graph.terminate(Duration::from_secs(1)).unwrap();
        }
        assert!(graph.is_linked());
    }

    #[test]
    #[should_panic(expected = "cannot register while the pipeline is Running")]
    fn test_register_while_running_panics() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ElementGraph::new(2);
        graph.register(producer(None)).unwrap();
        graph.register(counter(&count)).unwrap();
        graph.link_all().unwrap();
        graph.run().unwrap();
        let _ = graph.register(relay(ElementRole::Effect));
    }

    #[test]
    #[should_panic(expected = "cannot unlink while the pipeline is Paused")]
    fn test_unlink_while_paused_panics() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ElementGraph::new(2);
        graph.register(producer(None)).unwrap();
        graph.register(counter(&count)).unwrap();
        graph.link_all().unwrap();
        graph.run().unwrap();
        graph.pause();
        graph.break_links();
    }

    #[test]
    #[should_panic(expected = "cannot link while the pipeline is Running")]
    fn test_link_while_running_panics() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ElementGraph::new(2);
        graph.register(producer(None)).unwrap();
        graph.register(counter(&count)).unwrap();
        graph.link_all().unwrap();
        graph.run().unwrap();
        let _ = graph.link_all();
    }

    #[test]
    #[should_panic(expected = "cannot unregister while the pipeline is Running")]
    fn test_unregister_while_running_panics() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut graph = ElementGraph::new(2);
        graph.register(producer(None)).unwrap();
        graph.register(counter(&count)).unwrap();
        graph.link_all().unwrap();
        graph.run().unwrap();
        let _ = graph.unregister(ElementRole::Sink);
    }

    #[test]
    #[should_panic(expected = "pause requires a running pipeline")]
    fn test_pause_when_idle_panics() {
        ElementGraph::new(2).pause();
    }
}
