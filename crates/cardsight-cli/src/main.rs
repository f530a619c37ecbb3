use anyhow::{bail, Context, Result};
use cardsight_core::{palette, DetectionHandler, InferenceResult, LabelTable, PixelBuffer};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod annotate;
mod config;
mod worker;

use config::Config;
use worker::{spawn_detector, WorkerError};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Parser)]
#[command(name = "cardsight", about = "On-device card and document detection")]
struct Cli {
    /// TOML file overriding CARDSIGHT_* environment settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run detection on one or more image files
    Detect {
        /// Images to process
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
        /// Write annotated copies into this directory
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Replay a directory of frames as a camera stream, dropping frames while busy
    Stream {
        /// Directory of image frames, processed in file-name order
        dir: PathBuf,
        /// Frames per second to feed
        #[arg(long, default_value_t = 30)]
        fps: u32,
    },
    /// List the label table with display colors
    Labels,
    /// Show model and configuration details
    Info,
}

#[derive(Serialize)]
struct ImageReport<'a> {
    path: String,
    result: Option<&'a InferenceResult>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Detect {
            images,
            json,
            annotate,
        } => run_detect(&config, &images, json, annotate.as_deref()),
        Commands::Stream { dir, fps } => run_stream(&config, &dir, fps).await,
        Commands::Labels => run_labels(&config),
        Commands::Info => run_info(&config),
    }
}

fn load_handler(config: &Config) -> Result<DetectionHandler> {
    DetectionHandler::load(&config.handler_options()).with_context(|| {
        format!(
            "cannot start detector (model {}, labels {})",
            config.model_path().display(),
            config.labels_path().display()
        )
    })
}

fn run_detect(config: &Config, images: &[PathBuf], json: bool, annotate: Option<&Path>) -> Result<()> {
    let mut handler = load_handler(config)?;

    if let Some(dir) = annotate {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create annotation directory {}", dir.display()))?;
    }

    for path in images {
        let mut rgba = image::open(path)
            .with_context(|| format!("cannot decode image {}", path.display()))?
            .into_rgba8();
        let frame = PixelBuffer::from_rgba_image(rgba.clone());
        let result = handler.run_model(&frame);

        if json {
            let report = ImageReport {
                path: path.display().to_string(),
                result: result.as_ref(),
            };
            println!("{}", serde_json::to_string(&report)?);
        } else {
            print_result(path, result.as_ref());
        }

        if let (Some(dir), Some(result)) = (annotate, result.as_ref()) {
            annotate::draw_detections(&mut rgba, &result.detections);
            let out = annotated_path(dir, path);
            rgba.save(&out)
                .with_context(|| format!("cannot write {}", out.display()))?;
            tracing::info!(path = %out.display(), "wrote annotated image");
        }
    }

    Ok(())
}

async fn run_stream(config: &Config, dir: &Path, fps: u32) -> Result<()> {
    if fps == 0 {
        bail!("--fps must be positive");
    }
    let frames = list_frames(dir)?;
    if frames.is_empty() {
        bail!("no image frames found in {}", dir.display());
    }

    let handle = spawn_detector(load_handler(config)?)?;
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / fps as f64));
    let mut pending = Vec::new();

    for path in &frames {
        ticker.tick().await;
        let frame = match image::open(path) {
            Ok(img) => PixelBuffer::from_dynamic_image(img),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping undecodable frame");
                continue;
            }
        };

        match handle.try_detect(frame) {
            Ok(detection) => {
                let path = path.clone();
                pending.push(tokio::spawn(async move {
                    match detection.wait().await {
                        Ok(result) => print_result(&path, Some(&result)),
                        Err(e) => tracing::warn!(path = %path.display(), error = %e, "no result"),
                    }
                }));
            }
            Err(WorkerError::Busy) => {}
            Err(e) => return Err(e.into()),
        }
    }

    for task in pending {
        task.await?;
    }

    println!(
        "frames: {} fed, {} processed, {} rejected, {} dropped",
        frames.len(),
        handle.processed_frames(),
        handle.failed_frames(),
        handle.dropped_frames()
    );
    Ok(())
}

fn run_labels(config: &Config) -> Result<()> {
    let path = config.labels_path();
    let labels = LabelTable::load(&path)
        .with_context(|| format!("cannot load labels from {}", path.display()))?;

    // Slot 0 is the reserved background entry; model class = slot - 1.
    for (slot, name) in labels.iter().enumerate() {
        let class = slot as i64 - 1;
        let color = palette::color_for_class(slot);
        println!("{class:>4}  {}  {name}", color.to_hex());
    }
    Ok(())
}

fn run_info(config: &Config) -> Result<()> {
    let handler = load_handler(config)?;
    let spec = handler.input_spec();

    println!("model:      {}", config.model_path().display());
    println!("labels:     {} ({} entries)", config.labels_path().display(), handler.labels().len());
    println!(
        "input:      {}x{} {}",
        spec.width,
        spec.height,
        if spec.quantized { "u8" } else { "f32" }
    );
    println!("resize:     {:?}", config.resize_mode);
    println!("threshold:  {}", handler.threshold());
    println!("threads:    {}", config.threads);
    Ok(())
}

fn print_result(path: &Path, result: Option<&InferenceResult>) {
    let Some(result) = result else {
        println!("{}: no result (frame unusable)", path.display());
        return;
    };

    println!(
        "{}: {} detection(s) in {:.1} ms",
        path.display(),
        result.detections.len(),
        result.elapsed_millis
    );
    for det in &result.detections {
        let b = det.bounding_box;
        println!(
            "  {:<20} {:.3}  x={:.0} y={:.0} w={:.0} h={:.0}  {}",
            det.class_name,
            det.confidence,
            b.x,
            b.y,
            b.width,
            b.height,
            det.display_color.to_hex()
        );
    }
}

/// Image files in `dir`, sorted by file name.
fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("cannot read frame directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_image(p))
        .collect();
    frames.sort();
    Ok(frames)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn annotated_path(dir: &Path, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "frame".to_string());
    dir.join(format!("{stem}.annotated.png"))
}
