use std::path::PathBuf;

use anyhow::Context;
use blip_captioner::model::blip::DEFAULT_MAX_NEW_TOKENS;
use blip_captioner::model::{BlipCaptioner, LoadOptions, ModelKind};
use blip_captioner::{caption_directory, device_label, select_device};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Caption every image under a directory with BLIP, writing a sibling .txt
/// next to each image that does not have one yet.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to scan recursively
    #[arg(env = "CAPTION_ROOT")]
    root: PathBuf,

    /// BLIP checkpoint to caption with
    #[arg(short, long, value_enum, default_value_t = ModelKind::Base)]
    model: ModelKind,

    /// Use quantized (q4k gguf) weights
    #[arg(short, long)]
    quantized: bool,

    /// Local weights file (.safetensors or .gguf) instead of the hub checkpoint
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Local tokenizer.json instead of the hub one
    #[arg(long)]
    tokenizer: Option<PathBuf>,

    /// Device (auto, cpu, cuda, metal, 0, 1, ...)
    #[arg(short, long, env = "CAPTION_DEVICE")]
    device: Option<String>,

    /// Maximum number of tokens generated per caption
    #[arg(long, default_value_t = DEFAULT_MAX_NEW_TOKENS)]
    max_new_tokens: usize,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .without_time()
        .with_target(false)
        .init();

    let args = Args::parse();

    let device = select_device(args.device.as_deref())?;

    tracing::info!("Loading BLIP model...");
    let options = LoadOptions {
        kind: args.model,
        quantized: args.quantized,
        weights: args.weights,
        tokenizer: args.tokenizer,
        max_new_tokens: args.max_new_tokens,
    };
    let captioner = BlipCaptioner::load(&options, &device)
        .with_context(|| format!("failed to load {}", options.kind.repo_id()))?;
    tracing::info!("Using device: {}", device_label(captioner.device()));

    let summary = caption_directory(&args.root, captioner, !args.no_progress)
        .with_context(|| format!("failed to scan {}", args.root.display()))?;

    if !summary.nothing_to_do() {
        tracing::info!(
            "Captioned {} of {} images ({} failed)",
            summary.captioned,
            summary.candidates,
            summary.failures.len()
        );
        for failure in &summary.failures {
            tracing::warn!("  {}: {}", failure.image_path.display(), failure.error);
        }
    }

    Ok(())
}
