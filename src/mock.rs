//! In-process element backend for tests and the simulated player.
//!
//! Every element records what it saw into a shared [`MockProbe`], so callers
//! can check stream formats, output clock changes, playlist navigation and
//! element lifetimes without real hardware.

use crate::error::{ElementError, PlayerError, Result};
use crate::pipeline::element::{
    Delivery, Element, ElementContext, Flow, PlaylistControl, Received, StreamEvent,
};
use crate::pipeline::factory::{
    BringUpStep, ElementBackend, NetworkSourceConfig, StreamEventHandler,
};
use crate::pipeline::types::{AudioBlock, CodecKind, StreamFormat, WirelessRole};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Kind names of the mock elements.
pub mod kinds {
    pub const HTTP: &str = "http";
    pub const MP3: &str = "mp3";
    pub const AAC: &str = "aac";
    pub const EQUALIZER: &str = "equalizer";
    pub const WIRELESS_IN: &str = "bt-in";
    pub const I2S: &str = "i2s";
    pub const WIRELESS_OUT: &str = "bt-out";
}

/// What the mock sources produce.
#[derive(Debug, Clone, PartialEq)]
pub struct MockScript {
    /// Tracks per playlist.
    pub tracks: usize,
    /// Blocks per track; `None` streams forever.
    pub blocks_per_track: Option<usize>,
    /// How often a finished playlist may be fetched again before the source ends.
    pub refetches: usize,
    pub block_size: usize,
    /// Pause between produced blocks.
    pub block_interval: Duration,
    /// Format reported by the source itself.
    pub source_format: StreamFormat,
    /// Format reported by decoders on their first block.
    pub decoded_format: StreamFormat,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            tracks: 1,
            blocks_per_track: None,
            refetches: 0,
            block_size: 512,
            block_interval: Duration::from_millis(1),
            source_format: StreamFormat::new(44100, 16, 2),
            decoded_format: StreamFormat::new(44100, 16, 2),
        }
    }
}

/// Everything the mock backend and its elements observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeState {
    /// Kinds of created elements, in creation order.
    pub created: Vec<&'static str>,
    /// Kinds of destroyed elements, in destruction order.
    pub dropped: Vec<&'static str>,
    pub bring_up_steps: Vec<BringUpStep>,
    pub peripherals: Vec<WirelessRole>,
    /// Playlist parser flag of the last network source.
    pub playlist_parser: Option<bool>,
    pub uri: Option<String>,
    pub equalizer_gains: Option<Vec<i32>>,
    pub sink_format: Option<StreamFormat>,
    pub output_clock: Option<StreamFormat>,
    pub blocks_played: usize,
    pub tracks_advanced: usize,
    pub playlist_fetches: usize,
}

impl ProbeState {
    pub fn live(&self, kind: &str) -> usize {
        let created = self.created.iter().filter(|k| **k == kind).count();
        let dropped = self.dropped.iter().filter(|k| **k == kind).count();
        created - dropped
    }
}

/// Shared, cloneable view of [`ProbeState`].
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl MockProbe {
    pub fn snapshot(&self) -> ProbeState {
        self.lock().clone()
    }

    /// Polls until `done` holds or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, done: impl Fn(&ProbeState) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done(&self.lock()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn record(&self, f: impl FnOnce(&mut ProbeState)) {
        f(&mut self.lock());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Backend whose elements move zero-filled blocks between threads.
pub struct MockBackend {
    probe: MockProbe,
    script: MockScript,
    failing_create: Option<&'static str>,
    failing_stage: Option<&'static str>,
    address: [u8; 6],
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            probe: MockProbe::default(),
            script: MockScript::default(),
            failing_create: None,
            failing_stage: None,
            address: [0x24, 0x0a, 0xc4, 0x12, 0x34, 0x56],
        }
    }

    pub fn with_script(mut self, script: MockScript) -> Self {
        self.script = script;
        self
    }

    /// Makes creating elements of `kind` fail.
    pub fn failing_create(mut self, kind: &'static str) -> Self {
        self.failing_create = Some(kind);
        self
    }

    /// Makes the wireless bring-up step named `stage` fail.
    pub fn failing_bring_up(mut self, stage: &'static str) -> Self {
        self.failing_stage = Some(stage);
        self
    }

    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    fn create(&self, kind: &'static str) -> Result<()> {
        if self.failing_create == Some(kind) {
            return Err(PlayerError::ElementInit {
                kind,
                message: "injected failure".to_string(),
            });
        }
        self.probe.record(|s| s.created.push(kind));
        Ok(())
    }

    fn source(&self, kind: &'static str, handler: Option<StreamEventHandler>) -> MockSource {
        MockSource {
            kind,
            probe: self.probe.clone(),
            script: self.script.clone(),
            handler,
            uri: None,
            track: 0,
            block: 0,
            fetches: 0,
            connected: false,
            format_reported: false,
            exhausted: false,
            pending: None,
            format: self.script.source_format,
        }
    }

    fn filter(&self, kind: &'static str, report: Option<StreamFormat>) -> MockFilter {
        MockFilter {
            kind,
            probe: self.probe.clone(),
            report,
            pending: None,
            format: StreamFormat::default(),
        }
    }

    fn sink(&self, kind: &'static str, has_clock: bool) -> MockSink {
        MockSink {
            kind,
            probe: self.probe.clone(),
            has_clock,
            format: StreamFormat::default(),
        }
    }
}

impl ElementBackend for MockBackend {
    fn create_network_source(&mut self, config: NetworkSourceConfig) -> Result<Box<dyn Element>> {
        self.create(kinds::HTTP)?;
        self.probe
            .record(|s| s.playlist_parser = Some(config.playlist_parser));
        Ok(Box::new(self.source(kinds::HTTP, Some(config.on_event))))
    }

    fn create_decoder(&mut self, codec: CodecKind) -> Result<Box<dyn Element>> {
        let kind = match codec {
            CodecKind::Mp3 => kinds::MP3,
            CodecKind::Aac => kinds::AAC,
            CodecKind::None => {
                return Err(PlayerError::ElementInit {
                    kind: "decoder",
                    message: "raw streams have no decoder".to_string(),
                });
            }
        };
        self.create(kind)?;
        Ok(Box::new(self.filter(kind, Some(self.script.decoded_format))))
    }

    fn create_equalizer(&mut self, gains: &[i32]) -> Result<Box<dyn Element>> {
        self.create(kinds::EQUALIZER)?;
        self.probe
            .record(|s| s.equalizer_gains = Some(gains.to_vec()));
        Ok(Box::new(self.filter(kinds::EQUALIZER, None)))
    }

    fn create_wireless_input(&mut self) -> Result<Box<dyn Element>> {
        self.create(kinds::WIRELESS_IN)?;
        Ok(Box::new(self.source(kinds::WIRELESS_IN, None)))
    }

    fn create_local_output(&mut self) -> Result<Box<dyn Element>> {
        self.create(kinds::I2S)?;
        Ok(Box::new(self.sink(kinds::I2S, true)))
    }

    fn create_wireless_output(&mut self) -> Result<Box<dyn Element>> {
        self.create(kinds::WIRELESS_OUT)?;
        Ok(Box::new(self.sink(kinds::WIRELESS_OUT, false)))
    }

    fn bring_up_step(&mut self, step: &BringUpStep) -> Result<()> {
        if self.failing_stage == Some(step.stage()) {
            return Err(PlayerError::Element {
                element: "wireless",
                message: "injected failure".to_string(),
            });
        }
        self.probe.record(|s| s.bring_up_steps.push(step.clone()));
        Ok(())
    }

    fn start_peripheral(&mut self, role: WirelessRole) -> Result<()> {
        self.probe.record(|s| s.peripherals.push(role));
        Ok(())
    }

    fn own_address(&self) -> Option<[u8; 6]> {
        Some(self.address)
    }

    fn free_heap(&self) -> Option<usize> {
        Some(160 * 1024)
    }
}

fn deliver(ctx: &ElementContext, pending: &mut Option<AudioBlock>, block: AudioBlock) -> Flow {
    match ctx.send(block) {
        Delivery::Sent => Flow::Continue,
        Delivery::Full(block) => {
            *pending = Some(block);
            Flow::Continue
        }
        Delivery::Closed => Flow::Finished,
    }
}

struct MockSource {
    kind: &'static str,
    probe: MockProbe,
    script: MockScript,
    handler: Option<StreamEventHandler>,
    uri: Option<String>,
    track: usize,
    block: usize,
    fetches: usize,
    connected: bool,
    format_reported: bool,
    exhausted: bool,
    pending: Option<AudioBlock>,
    format: StreamFormat,
}

impl MockSource {
    fn raise(&mut self, event: StreamEvent) -> std::result::Result<(), ElementError> {
        let Some(handler) = self.handler else {
            return Ok(());
        };
        handler(event, self).map_err(|e| ElementError::Fatal(e.to_string()))
    }

    fn end_of_track(&mut self) -> std::result::Result<(), ElementError> {
        if self.handler.is_none() {
            self.exhausted = true;
            return Ok(());
        }
        let event = if self.track + 1 < self.script.tracks {
            StreamEvent::FinishTrack
        } else {
            StreamEvent::FinishPlaylist
        };
        self.raise(event)?;
        // Navigation rewinds the block counter; anything else ends the stream.
        if self.block != 0 {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Element for MockSource {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn process(&mut self, ctx: &mut ElementContext) -> std::result::Result<Flow, ElementError> {
        if let Some(block) = self.pending.take() {
            return Ok(deliver(ctx, &mut self.pending, block));
        }
        if self.exhausted {
            return Ok(Flow::Finished);
        }
        if !self.format_reported {
            ctx.report_format(self.format);
            self.format_reported = true;
        }
        if !self.connected {
            self.connected = true;
            self.raise(StreamEvent::Connected)?;
            self.raise(StreamEvent::ResolveAllTracks)?;
        }
        if let Some(limit) = self.script.blocks_per_track
            && self.block >= limit
        {
            self.end_of_track()?;
            return Ok(if self.exhausted {
                Flow::Finished
            } else {
                Flow::Continue
            });
        }

        if !self.script.block_interval.is_zero() {
            thread::sleep(self.script.block_interval);
        }
        self.block += 1;
        let block = vec![0; self.script.block_size];
        Ok(deliver(ctx, &mut self.pending, block))
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn set_format(&mut self, format: StreamFormat) {
        self.format = format;
    }

    fn set_uri(&mut self, uri: &str) -> Result<()> {
        if self.handler.is_none() {
            return Err(PlayerError::Element {
                element: self.kind,
                message: "wireless input has no target identifier".to_string(),
            });
        }
        self.uri = Some(uri.to_string());
        self.probe.record(|s| s.uri = Some(uri.to_string()));
        Ok(())
    }

    fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }
}

impl PlaylistControl for MockSource {
    fn next_track(&mut self) -> Result<()> {
        self.track += 1;
        self.block = 0;
        self.probe.record(|s| s.tracks_advanced += 1);
        Ok(())
    }

    fn fetch_again(&mut self) -> Result<()> {
        if self.fetches < self.script.refetches {
            self.fetches += 1;
            self.track = 0;
            self.block = 0;
            self.probe.record(|s| s.playlist_fetches += 1);
        } else {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Drop for MockSource {
    fn drop(&mut self) {
        self.probe.record(|s| s.dropped.push(self.kind));
    }
}

// Decoder or equalizer: forwards blocks, optionally reporting a format once
struct MockFilter {
    kind: &'static str,
    probe: MockProbe,
    report: Option<StreamFormat>,
    pending: Option<AudioBlock>,
    format: StreamFormat,
}

impl Element for MockFilter {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn process(&mut self, ctx: &mut ElementContext) -> std::result::Result<Flow, ElementError> {
        if let Some(block) = self.pending.take() {
            return Ok(deliver(ctx, &mut self.pending, block));
        }
        match ctx.recv() {
            Received::Block(block) => {
                if let Some(format) = self.report.take() {
                    self.format = format;
                    ctx.report_format(format);
                }
                Ok(deliver(ctx, &mut self.pending, block))
            }
            Received::Empty => Ok(Flow::Continue),
            Received::Closed => Ok(Flow::Finished),
        }
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn set_format(&mut self, format: StreamFormat) {
        self.format = format;
    }
}

impl Drop for MockFilter {
    fn drop(&mut self) {
        self.probe.record(|s| s.dropped.push(self.kind));
    }
}

struct MockSink {
    kind: &'static str,
    probe: MockProbe,
    has_clock: bool,
    format: StreamFormat,
}

impl Element for MockSink {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn process(&mut self, ctx: &mut ElementContext) -> std::result::Result<Flow, ElementError> {
        match ctx.recv() {
            Received::Block(_) => {
                self.probe.record(|s| s.blocks_played += 1);
                Ok(Flow::Continue)
            }
            Received::Empty => Ok(Flow::Continue),
            Received::Closed => Ok(Flow::Finished),
        }
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn set_format(&mut self, format: StreamFormat) {
        self.format = format;
        self.probe.record(|s| s.sink_format = Some(format));
    }

    fn set_output_clock(&mut self, sample_rate: u32, bit_depth: u32, channels: u32) -> Result<()> {
        if !self.has_clock {
            return Err(PlayerError::Element {
                element: self.kind,
                message: "element has no output clock".to_string(),
            });
        }
        let clock = StreamFormat::new(sample_rate, bit_depth, channels);
        self.probe.record(|s| s.output_clock = Some(clock));
        Ok(())
    }
}

impl Drop for MockSink {
    fn drop(&mut self) {
        self.probe.record(|s| s.dropped.push(self.kind));
    }
}
