//! frame-text-detector - per-frame text detection
//!
//! Runs OCR on every frame of an image sequence and prints one JSON object
//! per detected text region, tagged with its frame number.

mod capture;
mod config;
mod storage;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::capture::{ImageSequence, SequenceConfig};
use crate::config::AppConfig;
use crate::vision::{ModelManager, OcrLanguage, TextDetector};

/// frame-text-detector - OCR text regions from video frames
#[derive(Parser, Debug)]
#[command(name = "frame-text-detector")]
#[command(about = "Detect text in image frames and emit tagged bounding boxes as JSON lines")]
struct Args {
    /// Frame images, or directories of frame images (sorted by name)
    #[arg(required_unless_present = "download_models")]
    inputs: Vec<PathBuf>,

    /// Configuration file (defaults to config.toml in the config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the OCR models
    #[arg(long)]
    models_dir: Option<PathBuf>,

    /// Write JSON lines here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Frame number assigned to the first input image
    #[arg(long, default_value = "0")]
    start_frame: u64,

    /// Download the OCR models and exit
    #[arg(long)]
    download_models: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays valid JSON lines
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = resolve_config(args.config.as_deref())?;
    if let Some(dir) = args.models_dir {
        config.vision.models_dir = Some(dir);
    }

    if args.download_models {
        return download_models(&config);
    }

    let detector = TextDetector::setup(&config)?;
    let sequence = ImageSequence::from_inputs(
        &args.inputs,
        SequenceConfig {
            start_frame: args.start_frame,
        },
    )?;
    if sequence.is_empty() {
        warn!("No frame images found in {:?}", args.inputs);
    }
    info!("Running text detection on {} frames", sequence.len());

    let mut writer: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut frames = 0usize;
    let mut regions = 0usize;
    for frame in sequence {
        let frame = frame?;
        let objects = detector.predict(&frame)?;
        regions += objects.len();
        frames += 1;

        for object in &objects {
            serde_json::to_writer(&mut writer, object)?;
            writeln!(writer)?;
        }
    }
    writer.flush()?;

    info!("Processed {} frames, {} text regions", frames, regions);
    Ok(())
}

/// Load configuration from an explicit path or the config directory.
///
/// The config directory file is created with defaults on first run; an
/// unreadable one is ignored in favor of the defaults.
fn resolve_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load configuration {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        match config::load_or_create_config(&config_path) {
            Ok(config) => {
                info!("Using configuration {:?}", config_path);
                return Ok(config);
            }
            Err(e) => warn!("Ignoring configuration {:?}: {}", config_path, e),
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

/// Fetch every model the configured language needs
fn download_models(config: &AppConfig) -> Result<()> {
    let language = OcrLanguage::from_codes(&config.vision.languages)?;
    let manager = ModelManager::for_settings(&config.vision)?;

    if manager.are_models_ready(language) {
        info!("All '{}' models already present", language);
    } else {
        manager.ensure_all_models(language)?;
    }

    for (model_type, available, size) in manager.get_model_status(language) {
        info!(
            "{}: {} ({} bytes)",
            model_type.display_name(),
            if available { "ready" } else { "missing" },
            size.unwrap_or(0)
        );
    }
    info!("Models stored in {:?}", manager.models_dir());
    Ok(())
}
