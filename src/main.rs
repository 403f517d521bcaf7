use anyhow::{Context, Result};
use clap::Parser;
use ct_explain::{
    config::Config,
    image::ImageSource,
    models::{DifferentiableClassifier, GapNet},
    DiagnosticPipeline,
};
use ndarray::Array3;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ct-explain")]
#[command(about = "Brain CT hemorrhage prediction with Grad-CAM explanations")]
struct Args {
    /// Image file (PNG/JPEG/... or DICOM)
    image: PathBuf,

    /// Force the DICOM decoder regardless of file extension
    #[arg(long)]
    dicom: bool,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// GapNet weights (JSON)
    #[arg(long)]
    weights: Option<PathBuf>,

    /// ONNX classifier model
    #[cfg(feature = "onnx")]
    #[arg(long)]
    model: Option<PathBuf>,

    /// Seed for augmentation sampling and the default GapNet initialization
    #[arg(long)]
    seed: Option<u64>,

    /// Number of test-time augmentation predictions
    #[arg(long)]
    tta_count: Option<usize>,

    /// Disable test-time augmentation
    #[arg(long)]
    no_tta: bool,

    /// Explain benign predictions as well
    #[arg(long)]
    explain_benign: bool,

    /// Target layer for Grad-CAM
    #[arg(long)]
    layer: Option<String>,

    /// Write the heatmap overlay as PNG
    #[arg(long)]
    overlay_out: Option<PathBuf>,

    /// Write the colorized heatmap as PNG
    #[arg(long)]
    heatmap_out: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&args)?;
    let classifier = load_classifier(&args, &config)?;
    tracing::info!("Classifier: {}", classifier.name());

    let source = if args.dicom {
        let data = std::fs::read(&args.image)
            .with_context(|| format!("failed to read {}", args.image.display()))?;
        ImageSource::dicom_bytes(data)
    } else {
        ImageSource::path(args.image.clone())
    };

    let pipeline = DiagnosticPipeline::new(config)?;
    let report = pipeline.run(classifier.as_ref(), &source)?;

    println!("{}", serde_json::to_string_pretty(&report.summary())?);

    if let Some(record) = report.explanation_record() {
        if let Some(path) = &args.overlay_out {
            save_rgb(record.overlay(), path)?;
        }
        if let Some(path) = &args.heatmap_out {
            save_rgb(record.color_heatmap(), path)?;
        }
    } else if args.overlay_out.is_some() || args.heatmap_out.is_some() {
        tracing::warn!("No explanation produced, skipping image output");
    }

    Ok(())
}

fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };

    if let Some(seed) = args.seed {
        config.tta.seed = Some(seed);
    }
    if let Some(count) = args.tta_count {
        config.tta.count = count;
    }
    if args.no_tta {
        config.tta.enabled = false;
    }
    if args.explain_benign {
        config.attribution.explain_benign = true;
    }
    if let Some(layer) = &args.layer {
        config.attribution.target_layer = Some(layer.clone());
    }
    #[cfg(feature = "onnx")]
    if let Some(model) = &args.model {
        config.onnx.model_path = Some(model.clone());
    }

    config.validate()?;
    Ok(config)
}

fn load_classifier(args: &Args, config: &Config) -> Result<Box<dyn DifferentiableClassifier>> {
    #[cfg(feature = "onnx")]
    if config.onnx.model_path.is_some() {
        let classifier = ct_explain::models::OnnxClassifier::new(config)?;
        return Ok(Box::new(classifier));
    }

    if let Some(path) = &args.weights {
        return Ok(Box::new(GapNet::from_json_file(path)?));
    }

    let seed = args.seed.unwrap_or(0);
    tracing::warn!(
        "No model given, using an untrained GapNet (seed {}); predictions are for demonstration only",
        seed
    );
    Ok(Box::new(GapNet::seeded(seed, config.preprocess.target_size, 16, 8)?))
}

fn save_rgb(pixels: &Array3<u8>, path: &Path) -> Result<()> {
    let (height, width, _) = pixels.dim();
    let data: Vec<u8> = pixels.iter().cloned().collect();
    let buffer = image::RgbImage::from_raw(width as u32, height as u32, data)
        .context("overlay buffer does not match its dimensions")?;
    buffer
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("Saved {}", path.display());
    Ok(())
}
