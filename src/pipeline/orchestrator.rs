//! Player that owns the element chain from construction until shutdown.

use crate::config::Config;
use crate::defaults::{EVENT_QUEUE_CAPACITY, LINK_CAPACITY, STOP_TIMEOUT_MS};
use crate::error::{BusError, PlayerError, Result};
use crate::pipeline::element::ElementHandle;
use crate::pipeline::event_bus::EventBus;
use crate::pipeline::factory::{InputElements, VariantFactory};
use crate::pipeline::graph::ElementGraph;
use crate::pipeline::types::{
    CodecKind, ControlMessage, ElementRole, ElementStatus, InputKind, OutputKind, PlaybackState,
    StreamFormat,
};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Construction parameters for [`AudioPlayer`].
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    pub output: OutputKind,
    /// Insert the equalizer between decoder and sink.
    pub use_equalizer: bool,
    pub event_queue_capacity: usize,
    pub link_capacity: usize,
    /// How long `stop()` waits for element tasks.
    pub stop_timeout: Duration,
}

impl PlayerOptions {
    pub fn new(output: OutputKind, use_equalizer: bool) -> Self {
        Self {
            output,
            use_equalizer,
            event_queue_capacity: EVENT_QUEUE_CAPACITY,
            link_capacity: LINK_CAPACITY,
            stop_timeout: Duration::from_millis(STOP_TIMEOUT_MS),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            output: config.player.output,
            use_equalizer: config.player.equalizer,
            event_queue_capacity: config.player.event_queue_capacity,
            link_capacity: config.player.link_capacity,
            stop_timeout: config.player.stop_timeout(),
        }
    }
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self::new(OutputKind::LocalOutput, true)
    }
}

/// Something [`AudioPlayer::poll_event`] reacted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    /// The format reporter announced a new format; the sink now uses it.
    FormatChanged(StreamFormat),
    /// The sink halted by itself. The player is still in its previous state.
    EndOfStream(ElementStatus),
}

enum InputSide {
    None,
    NetworkDecoded {
        source: ElementHandle,
        decoder: Option<ElementHandle>,
        codec: CodecKind,
    },
    WirelessSink {
        source: ElementHandle,
    },
}

impl InputSide {
    fn kind(&self) -> Option<InputKind> {
        match self {
            InputSide::None => None,
            InputSide::NetworkDecoded { .. } => Some(InputKind::NetworkDecoded),
            InputSide::WirelessSink { .. } => Some(InputKind::WirelessSink),
        }
    }
}

enum OutputSide {
    None,
    LocalOutput {
        sink: ElementHandle,
    },
    WirelessSource {
        sink: ElementHandle,
        address: Option<String>,
    },
}

impl OutputSide {
    fn sink(&self) -> Option<&ElementHandle> {
        match self {
            OutputSide::None => None,
            OutputSide::LocalOutput { sink } | OutputSide::WirelessSource { sink, .. } => Some(sink),
        }
    }
}

/// Streaming audio player.
///
/// Owns a fixed chain of source, optional decoder, optional equalizer and
/// sink. The output side is built at construction; the input side is built
/// on the first [`set_source`](Self::set_source) or
/// [`set_wireless_input`](Self::set_wireless_input).
///
/// All methods must be called from one control thread.
pub struct AudioPlayer {
    factory: VariantFactory,
    graph: ElementGraph,
    bus: Option<EventBus>,
    input: InputSide,
    output: OutputSide,
    equalizer: Option<ElementHandle>,
    state: PlaybackState,
    stop_timeout: Duration,
}

impl AudioPlayer {
    /// Builds the output side (and equalizer if requested).
    ///
    /// Fails if any output element cannot be created or the wireless
    /// subsystem cannot be brought up.
    pub fn new(mut factory: VariantFactory, options: PlayerOptions) -> Result<Self> {
        info!(output = %options.output, equalizer = options.use_equalizer, "create audio player");
        debug!("set up event listener");
        let bus = EventBus::new(options.event_queue_capacity);
        let mut graph = ElementGraph::new(options.link_capacity);

        let equalizer = if options.use_equalizer {
            let equalizer = factory.build_equalizer()?;
            graph.register(equalizer.clone())?;
            Some(equalizer)
        } else {
            None
        };

        let built = factory.build_output(options.output)?;
        graph.register(built.sink.clone())?;
        let output = match options.output {
            OutputKind::LocalOutput => OutputSide::LocalOutput { sink: built.sink },
            OutputKind::WirelessSource => OutputSide::WirelessSource {
                sink: built.sink,
                address: built.address,
            },
        };

        Ok(Self {
            factory,
            graph,
            bus: Some(bus),
            input: InputSide::None,
            output,
            equalizer,
            state: PlaybackState::Stopped,
            stop_timeout: options.stop_timeout,
        })
    }

    /// Plays the network stream at `uri`.
    ///
    /// The first call builds the input side for `codec` and links the chain.
    /// Later calls only retarget the source and must use the same codec.
    pub fn set_source(&mut self, uri: &str, codec: CodecKind) -> Result<()> {
        let source = match &self.input {
            InputSide::None => {
                if self.state != PlaybackState::Stopped {
                    return Err(PlayerError::wrong_state("build input side", self.state));
                }
                let elements = self.factory.build_network_input(codec)?;
                let source = elements.source.clone();
                let decoder = elements.decoder.clone();
                self.attach_input(elements)?;
                self.input = InputSide::NetworkDecoded {
                    source: source.clone(),
                    decoder,
                    codec,
                };
                source
            }
            InputSide::NetworkDecoded {
                source,
                codec: active,
                ..
            } => {
                if *active != codec {
                    return Err(PlayerError::invalid_state(
                        "set source",
                        format!("input side is built for {active}, not {codec}"),
                    ));
                }
                source.clone()
            }
            InputSide::WirelessSink { .. } => {
                return Err(PlayerError::invalid_state(
                    "set source",
                    "wireless input is active",
                ));
            }
        };

        info!(uri, "set http stream uri");
        source.with(|el| el.set_uri(uri))
    }

    /// Uses the wireless sink as input, bringing the subsystem up if needed.
    pub fn set_wireless_input(&mut self) -> Result<()> {
        match &self.input {
            InputSide::None => {
                if self.state != PlaybackState::Stopped {
                    return Err(PlayerError::wrong_state("build input side", self.state));
                }
                let elements = self.factory.build_wireless_input()?;
                let source = elements.source.clone();
                self.attach_input(elements)?;
                self.input = InputSide::WirelessSink { source };
                Ok(())
            }
            InputSide::WirelessSink { .. } => {
                debug!("wireless input already active");
                Ok(())
            }
            InputSide::NetworkDecoded { .. } => Err(PlayerError::invalid_state(
                "use wireless input",
                "network input is active",
            )),
        }
    }

    /// Starts playback, or resumes it when paused.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            PlaybackState::Playing => {
                warn!("already playing");
                Ok(())
            }
            PlaybackState::Paused => {
                self.resume();
                Ok(())
            }
            PlaybackState::Stopped => {
                if let Some(bus) = &self.bus {
                    let stale = bus.drain();
                    if stale > 0 {
                        debug!(stale, "discarded control messages from the previous run");
                    }
                    // The chain may have changed since the last run.
                    self.graph.set_listener(bus.sender());
                }
                if !self.graph.is_linked() {
                    self.graph.link_all()?;
                }
                info!("starting pipeline");
                self.graph.run()?;
                self.state = PlaybackState::Playing;
                Ok(())
            }
        }
    }

    /// # Panics
    ///
    /// Panics unless the player is playing.
    pub fn pause(&mut self) {
        assert_eq!(self.state, PlaybackState::Playing, "pause requires playing");
        info!("pause pipeline");
        self.graph.pause();
        self.state = PlaybackState::Paused;
    }

    /// # Panics
    ///
    /// Panics unless the player is paused.
    pub fn resume(&mut self) {
        assert_eq!(self.state, PlaybackState::Paused, "resume requires paused");
        info!("resume pipeline");
        self.graph.resume();
        self.state = PlaybackState::Playing;
    }

    /// Stops every element task and waits for them.
    ///
    /// The chain stays registered and linked, so `start()` plays it again.
    /// The player is stopped afterwards even if some tasks missed the
    /// deadline, in which case [`PlayerError::StopTimeout`] is returned.
    pub fn stop(&mut self) -> Result<()> {
        if self.state == PlaybackState::Stopped {
            debug!("already stopped");
            return Ok(());
        }
        info!("stop pipeline");
        self.graph.stop();
        let result = self.graph.wait_for_stop(self.stop_timeout);
        self.state = PlaybackState::Stopped;
        result
    }

    /// Waits up to `timeout` for a control message and reacts to it.
    ///
    /// Returns the reaction, or `None` when nothing arrived or the message
    /// needed no action.
    pub fn poll_event(&mut self, timeout: Duration) -> Option<PlayerEvent> {
        let bus = self.bus.as_ref()?;
        let msg = match bus.listen(timeout) {
            Ok(msg) => msg,
            Err(BusError::Timeout) => {
                trace!("no control message");
                return None;
            }
            Err(e) => {
                error!("event interface error: {e}");
                return None;
            }
        };

        match msg {
            ControlMessage::FormatInfo { format, origin }
                if Some(origin) == self.graph.format_reporter() =>
            {
                info!(
                    sample_rate = format.sample_rate,
                    bits = format.bit_depth,
                    channels = format.channels,
                    "received music info from format source"
                );
                self.apply_format(format);
                Some(PlayerEvent::FormatChanged(format))
            }
            ControlMessage::StatusReport { status, origin }
                if status.is_halt() && Some(origin) == self.output.sink().map(ElementHandle::id) =>
            {
                warn!(?status, "stop event received");
                Some(PlayerEvent::EndOfStream(status))
            }
            other => {
                trace!(?other, "ignoring control message");
                None
            }
        }
    }

    /// True if a control message was consumed and acted on.
    pub fn poll_events(&mut self, timeout: Duration) -> bool {
        self.poll_event(timeout).is_some()
    }

    /// Unlinks and destroys the source and decoder. No-op without an input side.
    ///
    /// # Panics
    ///
    /// Panics unless the player is stopped.
    pub fn teardown_input_side(&mut self) -> Result<()> {
        assert_eq!(self.state, PlaybackState::Stopped, "input teardown requires stopped");
        if matches!(self.input, InputSide::None) {
            return Ok(());
        }
        self.graph.break_links();
        self.graph.unregister(ElementRole::Source)?;
        if self.graph.contains(ElementRole::Decoder) {
            self.graph.unregister(ElementRole::Decoder)?;
        }
        self.input = InputSide::None;
        info!("input side destroyed");
        Ok(())
    }

    /// Unlinks and destroys the sink and the equalizer. No-op without an output side.
    ///
    /// # Panics
    ///
    /// Panics unless the player is stopped.
    pub fn teardown_output_side(&mut self) -> Result<()> {
        assert_eq!(self.state, PlaybackState::Stopped, "output teardown requires stopped");
        if matches!(self.output, OutputSide::None) {
            return Ok(());
        }
        self.graph.break_links();
        if self.equalizer.take().is_some() {
            self.graph.unregister(ElementRole::Effect)?;
        }
        self.graph.unregister(ElementRole::Sink)?;
        self.output = OutputSide::None;
        info!("output side destroyed");
        Ok(())
    }

    /// Tears everything down, reporting the first failure.
    ///
    /// # Panics
    ///
    /// Panics unless the player is stopped.
    pub fn shutdown(mut self) -> Result<()> {
        self.release()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn input_kind(&self) -> Option<InputKind> {
        self.input.kind()
    }

    pub fn output_kind(&self) -> Option<OutputKind> {
        match self.output {
            OutputSide::None => None,
            OutputSide::LocalOutput { .. } => Some(OutputKind::LocalOutput),
            OutputSide::WirelessSource { .. } => Some(OutputKind::WirelessSource),
        }
    }

    /// Codec of the network input; [`CodecKind::None`] otherwise.
    pub fn codec(&self) -> CodecKind {
        match &self.input {
            InputSide::NetworkDecoded { codec, .. } => *codec,
            _ => CodecKind::None,
        }
    }

    /// Target identifier of the network source.
    pub fn uri(&self) -> Option<String> {
        match &self.input {
            InputSide::NetworkDecoded { source, .. } => source.with(|el| el.uri().map(str::to_string)),
            _ => None,
        }
    }

    pub fn has_equalizer(&self) -> bool {
        self.equalizer.is_some()
    }

    /// Own wireless address when the output is the wireless source.
    pub fn wireless_address(&self) -> Option<&str> {
        match &self.output {
            OutputSide::WirelessSource { address, .. } => address.as_deref(),
            _ => None,
        }
    }

    /// Tags of the registered elements in chain order.
    pub fn link_order(&self) -> Vec<&'static str> {
        self.graph.link_order()
    }

    pub fn is_linked(&self) -> bool {
        self.graph.is_linked()
    }

    /// Format the sink currently plays at.
    pub fn sink_format(&self) -> Option<StreamFormat> {
        self.output.sink().map(|sink| sink.with(|el| el.format()))
    }

    /// Element handle for `role`, for diagnostics.
    pub fn element(&self, role: ElementRole) -> Option<&ElementHandle> {
        self.graph.element(role)
    }

    // Registers and links the input elements, undoing everything on failure.
    fn attach_input(&mut self, elements: InputElements) -> Result<()> {
        let InputElements { source, decoder } = elements;
        self.graph.break_links();

        let result = (|| {
            self.graph.register(source)?;
            if let Some(decoder) = decoder {
                self.graph.register(decoder)?;
            }
            info!("register and link pipeline elements");
            self.graph.link_all()
        })();

        if result.is_err() {
            self.graph.break_links();
            for role in [ElementRole::Source, ElementRole::Decoder] {
                if self.graph.contains(role)
                    && let Err(e) = self.graph.unregister(role)
                {
                    warn!("rollback of {role} failed: {e}");
                }
            }
        }
        result
    }

    fn apply_format(&mut self, format: StreamFormat) {
        let Some(sink) = self.output.sink() else {
            return;
        };
        let reprogram_clock = matches!(self.output, OutputSide::LocalOutput { .. });
        let result = sink.with(|el| {
            el.set_format(format);
            if reprogram_clock {
                el.set_output_clock(format.sample_rate, format.bit_depth, format.channels)
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            error!("failed to apply format to sink: {e}");
        }
    }

    fn release(&mut self) -> Result<()> {
        assert_eq!(self.state, PlaybackState::Stopped, "player must be stopped before shutdown");
        let terminated = self.graph.terminate(self.stop_timeout);
        let input = self.teardown_input_side();
        let output = self.teardown_output_side();
        if let Some(bus) = self.bus.take() {
            bus.shutdown();
        }
        terminated.and(input).and(output)
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        if let Err(e) = self.release() {
            error!("player shutdown failed: {e}");
        }
    }
}
