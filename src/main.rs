use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lineguard::actuator::{Actuator, SimulatedActuator};
use lineguard::coordinator::Coordinator;
use lineguard::settings::{Settings, SettingsCore};
use lineguard::source::{FileReplay, FrameSource, LiveCamera, SourceConfig};

/// Minimal CLI entry point. Config-file persistence, installers and an
/// interactive UI are out of scope (`spec.md` section 1); this only picks a
/// frame source and a settings file, and wires the pipeline together.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Path to a video file to replay instead of a live camera.
    #[arg(long)]
    replay_file: Option<String>,

    /// Live camera device index, used when `--replay-file` is not given.
    #[arg(long, default_value_t = 0)]
    camera_index: i32,

    /// TOML settings file seeding `SettingsCore`; defaults are used if absent.
    #[arg(long)]
    settings_file: Option<PathBuf>,

    /// Directory recorded video files and daily CSV reports are written to.
    #[arg(long, default_value = "./output")]
    output_dir: PathBuf,

    /// How long to run before an orderly shutdown, in seconds.
    #[arg(long, default_value_t = 30)]
    run_seconds: u64,

    /// Part label recorded in the daily CSV report (section 6).
    #[arg(long, default_value = "unspecified")]
    part_type: String,

    /// Counting method label recorded in the daily CSV report (section 6).
    #[arg(long, default_value = "gate-count")]
    method: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = CliArgs::parse();
    info!(?args, "starting lineguard");

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating output directory {}", args.output_dir.display()))?;

    let settings = match &args.settings_file {
        Some(path) => Settings::load_from_file(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let settings_core = SettingsCore::new(settings);

    let mut coordinator = Coordinator::new(
        settings_core.clone(),
        args.output_dir.clone(),
        args.part_type.clone(),
        args.method.clone(),
    );

    let mut source: Box<dyn FrameSource> = match &args.replay_file {
        Some(path) => Box::new(FileReplay::new(path.clone())),
        None => Box::new(LiveCamera::new(args.camera_index)),
    };
    let source_config = SourceConfig {
        width: 640,
        height: 480,
        target_fps: settings_core.detection().target_fps,
        loop_playback: false,
        ..SourceConfig::default()
    };
    source
        .open(&source_config)
        .context("opening frame source")?;

    let actuators: Vec<Box<dyn Actuator>> = vec![
        Box::new(SimulatedActuator::new("left")),
        Box::new(SimulatedActuator::new("right")),
    ];

    coordinator.start(source, actuators).context("starting pipeline")?;

    std::thread::sleep(Duration::from_secs(args.run_seconds));

    let recorder_stats = coordinator.stop();
    if let Some(stats) = recorder_stats {
        info!(
            frames_written = stats.frames_written,
            duration_secs = stats.duration_secs,
            realized_fps = stats.realized_fps,
            codec = %stats.codec,
            path = %stats.output_path.display(),
            "recording finished"
        );
    }

    Ok(())
}
