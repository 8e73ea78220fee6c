//! Player application entry point.
//!
//! Builds a player from configuration and command-line overrides and drives
//! it until the stream ends or the requested duration elapses. Hardware is
//! simulated with [`MockBackend`].

use crate::cli::RunArgs;
use crate::config::Config;
use crate::mock::{MockBackend, MockScript};
use crate::pipeline::factory::VariantFactory;
use crate::pipeline::orchestrator::{AudioPlayer, PlayerEvent, PlayerOptions};
use crate::pipeline::types::{ElementStatus, StreamFormat};
use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Why the run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    /// The sink halted by itself.
    EndOfStream(ElementStatus),
    /// `--duration` elapsed first.
    DurationElapsed,
}

/// What happened during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub end: RunEnd,
    /// Formats applied to the sink, in order.
    pub formats: Vec<StreamFormat>,
    pub blocks_played: usize,
    pub tracks_advanced: usize,
    pub elapsed: Duration,
}

/// Applies command-line overrides on top of the loaded configuration.
pub fn apply_run_args(config: &mut Config, args: &RunArgs) {
    if let Some(url) = &args.url {
        config.stream.url = Some(url.clone());
    }
    if let Some(codec) = args.codec {
        config.stream.codec = codec;
    }
    if let Some(output) = args.output {
        config.player.output = output;
    }
    if args.no_equalizer {
        config.player.equalizer = false;
    }
}

/// Plays the configured input until end of stream or `args.duration`.
pub fn run_player(config: &Config, args: &RunArgs) -> Result<RunSummary> {
    config.validate()?;

    let script = MockScript {
        tracks: args.tracks.max(1),
        blocks_per_track: (args.blocks_per_track > 0).then_some(args.blocks_per_track),
        source_format: StreamFormat::new(48000, 16, 2),
        ..MockScript::default()
    };
    let backend = MockBackend::new().with_script(script);
    let probe = backend.probe();
    let factory = VariantFactory::new(backend)
        .with_wireless_config(config.wireless.clone())
        .with_equalizer_gains(config.equalizer.gains.clone());

    let mut player = AudioPlayer::new(factory, PlayerOptions::from_config(config))
        .context("Failed to create player")?;

    if args.wireless_input {
        player
            .set_wireless_input()
            .context("Failed to set up wireless input")?;
    } else {
        let url = config
            .stream
            .url
            .as_deref()
            .context("No stream URL: pass --url or set stream.url in the config file")?;
        player
            .set_source(url, config.stream.codec)
            .with_context(|| format!("Failed to set source '{url}'"))?;
    }

    info!(order = ?player.link_order(), "pipeline ready");
    player.start().context("Failed to start playback")?;

    let poll_interval = config.player.poll_interval();
    let started = Instant::now();
    let mut formats = Vec::new();
    let end = loop {
        let timeout = match args.duration {
            Some(limit) => {
                let Some(remaining) = limit.checked_sub(started.elapsed()) else {
                    break RunEnd::DurationElapsed;
                };
                remaining.min(poll_interval)
            }
            None => poll_interval,
        };
        match player.poll_event(timeout) {
            Some(PlayerEvent::FormatChanged(format)) => formats.push(format),
            Some(PlayerEvent::EndOfStream(status)) => break RunEnd::EndOfStream(status),
            None => {}
        }
    };
    let elapsed = started.elapsed();

    if let Err(e) = player.stop() {
        warn!("{e}");
    }
    player.shutdown().context("Failed to shut down player")?;

    let state = probe.snapshot();
    Ok(RunSummary {
        end,
        formats,
        blocks_played: state.blocks_played,
        tracks_advanced: state.tracks_advanced,
        elapsed,
    })
}
