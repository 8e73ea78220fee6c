use anyhow::{Context, Result};
use clap::Parser;
use netplayer::app::{RunEnd, apply_run_args, run_player};
use netplayer::cli::{Cli, Commands, RunArgs};
use netplayer::config::Config;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        None => run(config, &cli.run),
        Some(Commands::Run(args)) => run(config, &args),
        Some(Commands::ShowConfig) => {
            let text = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            print!("{text}");
            Ok(())
        }
    }
}

/// Install the tracing subscriber. `RUST_LOG` wins over the verbosity flags.
fn init_logging(quiet: bool, verbose: u8) {
    let default_level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("netplayer={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        // Try default path, fall back to defaults
        let default_path = Config::default_path()?;
        Config::load_or_default(&default_path)
            .with_context(|| format!("Failed to load {}", default_path.display()))?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

fn run(mut config: Config, args: &RunArgs) -> Result<()> {
    apply_run_args(&mut config, args);
    let summary = run_player(&config, args)?;

    let reason = match summary.end {
        RunEnd::EndOfStream(status) => format!("end of stream ({status:?})"),
        RunEnd::DurationElapsed => "duration elapsed".to_string(),
    };
    println!("Stopped after {:.1}s: {reason}", summary.elapsed.as_secs_f64());
    println!("  blocks played:   {}", summary.blocks_played);
    println!("  tracks advanced: {}", summary.tracks_advanced);
    for format in &summary.formats {
        println!("  format:          {format}");
    }
    Ok(())
}
