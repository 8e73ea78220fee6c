//! Builds the element sets for each input and output variant.
//!
//! Concrete elements come from an [`ElementBackend`]; the factory decides
//! which ones a variant needs and owns the one-time wireless bring-up.

use crate::config::WirelessConfig;
use crate::defaults::EQUALIZER_DEFAULT_GAIN_TABLE;
use crate::error::{PlayerError, Result};
use crate::pipeline::element::{Element, ElementHandle, PlaylistControl, StreamEvent};
use crate::pipeline::types::{CodecKind, ElementRole, OutputKind, WirelessRole};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Reaction of a network source to its own stream events.
pub type StreamEventHandler = fn(StreamEvent, &mut dyn PlaylistControl) -> Result<()>;

/// How a network source should be created.
#[derive(Clone, Copy)]
pub struct NetworkSourceConfig {
    /// Parse playlists (m3u, pls) and play their tracks in turn.
    pub playlist_parser: bool,
    pub on_event: StreamEventHandler,
}

impl Default for NetworkSourceConfig {
    fn default() -> Self {
        Self {
            playlist_parser: true,
            on_event: http_stream_event_handler,
        }
    }
}

/// Default stream event reaction: follow the playlist forever.
///
/// A finished track advances to the next one; a finished playlist is fetched
/// again from the same URI.
pub fn http_stream_event_handler(event: StreamEvent, source: &mut dyn PlaylistControl) -> Result<()> {
    debug!(?event, "http stream event");
    match event {
        StreamEvent::FinishTrack => source.next_track(),
        StreamEvent::FinishPlaylist => source.fetch_again(),
        StreamEvent::ResolveAllTracks | StreamEvent::Connected => Ok(()),
    }
}

/// One step of bringing up the wireless subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BringUpStep {
    /// Hand the low-energy controller memory back to the heap.
    ReleaseLowEnergyMemory,
    ControllerInit,
    ControllerEnableClassic,
    HostStackInit,
    HostStackEnable,
    SetDeviceName(String),
    SetDiscoverable,
    /// Start the audio source service and connect to `remote_name`.
    StartSourceService {
        device_name: String,
        remote_name: String,
    },
}

impl BringUpStep {
    pub fn stage(&self) -> &'static str {
        match self {
            BringUpStep::ReleaseLowEnergyMemory => "release low-energy memory",
            BringUpStep::ControllerInit => "controller init",
            BringUpStep::ControllerEnableClassic => "controller enable",
            BringUpStep::HostStackInit => "host stack init",
            BringUpStep::HostStackEnable => "host stack enable",
            BringUpStep::SetDeviceName(_) => "set device name",
            BringUpStep::SetDiscoverable => "set discoverable",
            BringUpStep::StartSourceService { .. } => "start source service",
        }
    }

    /// Steps for bringing the subsystem up in `role`.
    pub fn sequence(role: WirelessRole, config: &WirelessConfig) -> Vec<BringUpStep> {
        match role {
            WirelessRole::Sink => vec![
                BringUpStep::ReleaseLowEnergyMemory,
                BringUpStep::ControllerInit,
                BringUpStep::ControllerEnableClassic,
                BringUpStep::HostStackInit,
                BringUpStep::HostStackEnable,
                BringUpStep::SetDeviceName(config.device_name.clone()),
                BringUpStep::SetDiscoverable,
            ],
            WirelessRole::Source => vec![BringUpStep::StartSourceService {
                device_name: config.source_name.clone(),
                remote_name: config.remote_name.clone(),
            }],
        }
    }
}

/// Platform that provides concrete elements and the wireless subsystem.
pub trait ElementBackend: Send {
    fn create_network_source(&mut self, config: NetworkSourceConfig) -> Result<Box<dyn Element>>;

    /// Creates a decoder for `codec`. Never called with [`CodecKind::None`].
    fn create_decoder(&mut self, codec: CodecKind) -> Result<Box<dyn Element>>;

    fn create_equalizer(&mut self, gains: &[i32]) -> Result<Box<dyn Element>>;

    /// Reader of the audio stream received over the wireless link.
    fn create_wireless_input(&mut self) -> Result<Box<dyn Element>>;

    /// Writer to the local output interface.
    fn create_local_output(&mut self) -> Result<Box<dyn Element>>;

    /// Writer to the wireless source service.
    fn create_wireless_output(&mut self) -> Result<Box<dyn Element>>;

    fn bring_up_step(&mut self, step: &BringUpStep) -> Result<()>;

    /// Starts the companion peripheral task (buttons, volume) for `role`.
    fn start_peripheral(&mut self, role: WirelessRole) -> Result<()>;

    /// Own hardware address once the subsystem is up.
    fn own_address(&self) -> Option<[u8; 6]>;

    /// Free heap in bytes, for diagnostics.
    fn free_heap(&self) -> Option<usize> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubsystemState {
    Down,
    Up(WirelessRole),
    Poisoned,
}

/// Process-wide guard for the wireless subsystem.
///
/// The subsystem can be brought up once per process and only in one role.
/// A failed bring-up leaves it unusable.
pub struct WirelessSubsystem {
    state: Mutex<SubsystemState>,
}

impl WirelessSubsystem {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(SubsystemState::Down),
        }
    }

    /// The guard shared by every player in this process.
    pub fn global() -> &'static WirelessSubsystem {
        static GLOBAL: WirelessSubsystem = WirelessSubsystem::new();
        &GLOBAL
    }

    /// Role the subsystem is up in, if any.
    pub fn role(&self) -> Option<WirelessRole> {
        match *self.lock() {
            SubsystemState::Up(role) => Some(role),
            _ => None,
        }
    }

    pub fn is_poisoned(&self) -> bool {
        *self.lock() == SubsystemState::Poisoned
    }

    /// Runs `bring_up` unless the subsystem is already up in `role`.
    ///
    /// Returns true if `bring_up` ran and succeeded.
    pub(crate) fn ensure_up(
        &self,
        role: WirelessRole,
        bring_up: impl FnOnce() -> Result<()>,
    ) -> Result<bool> {
        let mut state = self.lock();
        match *state {
            SubsystemState::Up(active) if active == role => Ok(false),
            SubsystemState::Up(active) => Err(PlayerError::SubsystemConflict {
                active,
                requested: role,
            }),
            SubsystemState::Poisoned => Err(PlayerError::SubsystemPoisoned),
            SubsystemState::Down => match bring_up() {
                Ok(()) => {
                    *state = SubsystemState::Up(role);
                    Ok(true)
                }
                Err(e) => {
                    *state = SubsystemState::Poisoned;
                    Err(e)
                }
            },
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SubsystemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WirelessSubsystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Elements of an input variant.
pub struct InputElements {
    pub source: ElementHandle,
    pub decoder: Option<ElementHandle>,
}

/// Elements of an output variant.
pub struct OutputElements {
    pub sink: ElementHandle,
    /// Own wireless address as 12 hex characters (wireless output only).
    pub address: Option<String>,
}

/// Creates the elements each variant needs.
pub struct VariantFactory {
    backend: Box<dyn ElementBackend>,
    subsystem: &'static WirelessSubsystem,
    wireless: WirelessConfig,
    equalizer_gains: Vec<i32>,
    network_source: NetworkSourceConfig,
}

impl VariantFactory {
    pub fn new(backend: impl ElementBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            subsystem: WirelessSubsystem::global(),
            wireless: WirelessConfig::default(),
            equalizer_gains: EQUALIZER_DEFAULT_GAIN_TABLE.to_vec(),
            network_source: NetworkSourceConfig::default(),
        }
    }

    /// Uses `subsystem` instead of the process-wide guard.
    pub fn with_subsystem(mut self, subsystem: &'static WirelessSubsystem) -> Self {
        self.subsystem = subsystem;
        self
    }

    pub fn with_wireless_config(mut self, wireless: WirelessConfig) -> Self {
        self.wireless = wireless;
        self
    }

    pub fn with_equalizer_gains(mut self, gains: Vec<i32>) -> Self {
        self.equalizer_gains = gains;
        self
    }

    pub fn with_network_source(mut self, config: NetworkSourceConfig) -> Self {
        self.network_source = config;
        self
    }

    pub fn subsystem(&self) -> &'static WirelessSubsystem {
        self.subsystem
    }

    /// Network source, plus a decoder unless `codec` is [`CodecKind::None`].
    pub fn build_network_input(&mut self, codec: CodecKind) -> Result<InputElements> {
        info!("create http stream reader");
        let source = self.backend.create_network_source(self.network_source)?;
        let source = ElementHandle::new(ElementRole::Source, source);

        let decoder = match codec {
            CodecKind::None => None,
            codec => {
                info!(%codec, "create decoder");
                let decoder = self.backend.create_decoder(codec)?;
                Some(ElementHandle::new(ElementRole::Decoder, decoder))
            }
        };

        Ok(InputElements { source, decoder })
    }

    /// Wireless stream reader. Brings the subsystem up as a sink first.
    pub fn build_wireless_input(&mut self) -> Result<InputElements> {
        self.bring_up(WirelessRole::Sink)?;
        info!("create wireless stream reader");
        let source = self.backend.create_wireless_input()?;
        Ok(InputElements {
            source: ElementHandle::new(ElementRole::Source, source),
            decoder: None,
        })
    }

    pub fn build_output(&mut self, kind: OutputKind) -> Result<OutputElements> {
        match kind {
            OutputKind::LocalOutput => {
                info!("create local output stream");
                let sink = self.backend.create_local_output()?;
                Ok(OutputElements {
                    sink: ElementHandle::new(ElementRole::Sink, sink),
                    address: None,
                })
            }
            OutputKind::WirelessSource => {
                self.bring_up(WirelessRole::Source)?;
                info!("create wireless output stream");
                let sink = self.backend.create_wireless_output()?;
                let address = self.backend.own_address().map(|addr| format_address(&addr));
                match &address {
                    Some(address) => warn!(address = %address, "own wireless address"),
                    None => warn!("own wireless address unknown"),
                }
                Ok(OutputElements {
                    sink: ElementHandle::new(ElementRole::Sink, sink),
                    address,
                })
            }
        }
    }

    pub fn build_equalizer(&mut self) -> Result<ElementHandle> {
        info!(bands = self.equalizer_gains.len(), "create equalizer");
        let equalizer = self.backend.create_equalizer(&self.equalizer_gains)?;
        Ok(ElementHandle::new(ElementRole::Effect, equalizer))
    }

    fn bring_up(&mut self, role: WirelessRole) -> Result<()> {
        let backend = &mut self.backend;
        let steps = BringUpStep::sequence(role, &self.wireless);
        let started = self.subsystem.ensure_up(role, || {
            if let Some(free) = backend.free_heap() {
                info!(free, %role, "free heap before wireless bring-up");
            }
            for step in &steps {
                debug!(stage = step.stage(), "wireless bring-up");
                backend
                    .bring_up_step(step)
                    .map_err(|e| PlayerError::SubsystemInit {
                        stage: step.stage(),
                        message: e.to_string(),
                    })?;
            }
            backend
                .start_peripheral(role)
                .map_err(|e| PlayerError::SubsystemInit {
                    stage: "start peripheral",
                    message: e.to_string(),
                })?;
            if let Some(free) = backend.free_heap() {
                info!(free, %role, "free heap after wireless bring-up");
            }
            Ok(())
        })?;

        if started {
            info!(%role, "wireless subsystem up");
        } else {
            debug!(%role, "wireless subsystem already up");
        }
        Ok(())
    }
}

/// Formats a hardware address as 12 lowercase hex characters.
pub fn format_address(address: &[u8; 6]) -> String {
    address.iter().map(|byte| format!("{byte:02x}")).collect()
}
