//! Command-line interface for netplayer
//!
//! Provides argument parsing using clap derive macros.

use crate::pipeline::types::{CodecKind, OutputKind};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Streaming audio player
#[derive(Parser, Debug)]
#[command(
    name = "netplayer",
    version,
    about = "Streaming audio player pipeline",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Subcommand to execute (default: run)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play the configured stream until it ends
    Run(RunArgs),

    /// Print the effective configuration as TOML
    ShowConfig,
}

/// Options for playing a stream
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Stream URL (overrides stream.url)
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Stream codec: none, mp3 or aac (overrides stream.codec)
    #[arg(long, value_name = "CODEC")]
    pub codec: Option<CodecKind>,

    /// Output: local or wireless (overrides player.output)
    #[arg(long, value_name = "OUTPUT")]
    pub output: Option<OutputKind>,

    /// Receive audio over the wireless link instead of a network stream
    #[arg(long, conflicts_with_all = ["url", "codec"])]
    pub wireless_input: bool,

    /// Skip the equalizer
    #[arg(long)]
    pub no_equalizer: bool,

    /// Stop after this long. Examples: 30s, 5m, 1h30m
    #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Tracks in the simulated playlist
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub tracks: usize,

    /// Blocks per simulated track (0 = endless)
    #[arg(long, value_name = "N", default_value_t = 200)]
    pub blocks_per_track: usize,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`, plus bare numbers
/// (seconds).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::try_parse_from(["netplayer", "--url", "http://radio/live.m3u"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.url.as_deref(), Some("http://radio/live.m3u"));
        assert_eq!(cli.run.tracks, 1);
        assert_eq!(cli.run.blocks_per_track, 200);
        assert!(cli.run.duration.is_none());
    }

    #[test]
    fn test_run_subcommand_with_options() {
        let cli = Cli::try_parse_from([
            "netplayer",
            "run",
            "--codec",
            "aac",
            "--output",
            "wireless",
            "--no-equalizer",
            "--duration",
            "1m30s",
            "--tracks",
            "3",
        ])
        .unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.codec, Some(CodecKind::Aac));
        assert_eq!(args.output, Some(OutputKind::WirelessSource));
        assert!(args.no_equalizer);
        assert_eq!(args.duration, Some(Duration::from_secs(90)));
        assert_eq!(args.tracks, 3);
    }

    #[test]
    fn test_show_config_subcommand() {
        let cli = Cli::try_parse_from(["netplayer", "show-config", "--config", "/tmp/x.toml"])
            .unwrap();
        assert!(matches!(cli.command, Some(Commands::ShowConfig)));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
    }

    #[test]
    fn test_wireless_input_conflicts_with_url() {
        let result = Cli::try_parse_from([
            "netplayer",
            "--wireless-input",
            "--url",
            "http://radio/live",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_codec_is_rejected() {
        assert!(Cli::try_parse_from(["netplayer", "--codec", "flac"]).is_err());
    }

    #[test]
    fn test_verbose_counts() {
        let cli = Cli::try_parse_from(["netplayer", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45"), Ok(Duration::from_secs(45)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration(" 500ms "), Ok(Duration::from_millis(500)));
        assert!(parse_duration("soon").is_err());
    }
}
