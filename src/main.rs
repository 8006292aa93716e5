//! Command-line driver for the playback engine

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use purist::audio::output::list_output_devices;
use purist::diagnostics::run_null_test;
use purist::profiles::{JsonProfileStore, ProfileStore};
use purist::{AudioEngine, EngineConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "purist", about = "Gapless, bit-perfect audio playback engine")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play one or more files in order, gaplessly
    Play {
        /// Audio files, played in the given order
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output device name (default: system default)
        #[arg(long)]
        device: Option<String>,

        /// Master volume in [0, 1]
        #[arg(long)]
        volume: Option<f32>,
    },

    /// List output devices
    Devices,

    /// Decode a file twice and verify both decodes are identical
    NullTest { file: PathBuf },

    /// Show persisted device profiles
    Profiles,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("purist=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Command::Play {
            files,
            device,
            volume,
        } => {
            if let Some(name) = device {
                config.preferred_device = Some(name);
            }
            play(config, files, volume)
        }
        Command::Devices => devices(),
        Command::NullTest { file } => null_test(&file),
        Command::Profiles => profiles(&config),
    }
}

fn play(config: EngineConfig, files: Vec<PathBuf>, volume: Option<f32>) -> Result<()> {
    let engine = AudioEngine::new(config).context("starting playback engine")?;

    if let Some(v) = volume {
        engine.set_volume(v)?;
    }

    let mut queue = files.iter();
    let first = queue.next().context("no files given")?;
    engine
        .play(first)
        .with_context(|| format!("playing {}", first.display()))?;

    if let Some(next) = queue.next() {
        engine.queue_next(next)?;
    }

    // Give the engine a moment to open the stream, then report the path
    std::thread::sleep(Duration::from_millis(300));
    let diag = engine.diagnostics();
    info!(
        "Output: {} Hz / {} ch ({}), bit-perfect: {}",
        diag.output_sample_rate,
        diag.output_channels,
        if diag.exclusive { "exclusive" } else { "shared" },
        diag.is_bit_perfect
    );

    // Feed the queue each time the engine moves to the next track
    let mut last_file = engine.state().current_file;
    loop {
        std::thread::sleep(Duration::from_millis(200));
        let state = engine.state();

        if !state.is_playing {
            break;
        }
        if state.current_file != last_file {
            last_file = state.current_file.clone();
            if let Some(next) = queue.next() {
                engine.queue_next(next)?;
            }
        }
    }

    let diag = engine.diagnostics();
    if diag.dropout_count > 0 {
        info!("Playback ended with {} dropout(s)", diag.dropout_count);
    } else {
        info!("Playback ended cleanly");
    }

    engine.shutdown();
    Ok(())
}

fn devices() -> Result<()> {
    let devices = list_output_devices().context("enumerating output devices")?;
    if devices.is_empty() {
        println!("No output devices found");
        return Ok(());
    }
    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{}{}", device.name, marker);
    }
    Ok(())
}

fn null_test(file: &PathBuf) -> Result<()> {
    let result =
        run_null_test(file).with_context(|| format!("null test on {}", file.display()))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.passed {
        println!("PASS: {}", result.summary);
        Ok(())
    } else {
        anyhow::bail!("FAIL: {}", result.summary)
    }
}

fn profiles(config: &EngineConfig) -> Result<()> {
    let dir = config
        .profile_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let store = JsonProfileStore::new(&dir);

    let profiles = store.all().context("reading device profiles")?;
    if profiles.is_empty() {
        println!("No device profiles saved");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&profiles)?);
    Ok(())
}
