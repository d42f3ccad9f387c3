use clap::{Parser, Subcommand};
use image::ImageReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use platescan::core::db::{DetectionDb, DetectionRepository};
use platescan::detection::rten_backend::model_dir_name;
use platescan::detection::selector::ModelSelector;
use platescan::{DetectionPipeline, DetectionRequest, ImageInput, PipelineConfig};

#[derive(Parser)]
#[command(name = "platescan")]
#[command(about = "Detect, crop and read license plates in images")]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Shorthand for --log-level debug
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one detection
    Detect {
        /// Fetch the image from this http(s) URL
        #[arg(long)]
        url: Option<String>,

        /// Read the image from a file
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,

        /// Treat this file as a captured webcam frame
        #[arg(long, value_name = "FILE")]
        webcam: Option<PathBuf>,

        /// Model identifier, defaults to the current selection
        #[arg(short, long)]
        model: Option<String>,

        /// Score threshold
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Read the plate text
        #[arg(long)]
        ocr: bool,

        /// Write the visualization here as well
        #[arg(long, value_name = "FILE")]
        save_visualization: Option<PathBuf>,

        /// Write the crop here as well
        #[arg(long, value_name = "FILE")]
        save_crop: Option<PathBuf>,
    },

    /// List known models and whether they are installed
    Models,

    /// Show recorded detections, most recent first
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
}

fn load_image(path: &Path) -> anyhow::Result<image::DynamicImage> {
    ImageReader::open(path)?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image {:?}: {}", path, e))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(true)
        .init();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Command::Detect {
            url,
            image,
            webcam,
            model,
            threshold,
            ocr,
            save_visualization,
            save_crop,
        } => {
            if ocr {
                config.enable_ocr = true;
            }

            let input = ImageInput {
                url,
                image: image.as_deref().map(load_image).transpose()?,
                webcam: webcam.as_deref().map(load_image).transpose()?,
            };
            let mut request = DetectionRequest::new(input).with_model(model.unwrap_or_default());
            if let Some(threshold) = threshold {
                request = request.with_threshold(threshold);
            }

            let pipeline = DetectionPipeline::from_config(&config).await?;
            if !request.model_id.is_empty() && !pipeline.selector().is_known(&request.model_id) {
                tracing::warn!(model = %request.model_id, "model is not in the known-model registry");
            }
            let output = pipeline.run(request).await?;

            println!("\n=== License Plate Detection ===");
            println!("Model:   {}", output.model_id);
            println!("Outcome: {}", output.outcome);
            for det in &output.drawn {
                println!(
                    "  {} at ({:.0}, {:.0})-({:.0}, {:.0})",
                    det.caption(),
                    det.bbox.xmin,
                    det.bbox.ymin,
                    det.bbox.xmax,
                    det.bbox.ymax
                );
            }
            if !output.record.license_plate_data.is_empty() {
                println!("Plate:   {}", output.record.license_plate_data);
            }
            println!("Saved:   {}", config.output_dir.join("original").join(&output.record.original_image_name).display());
            println!("Crop:    {}", config.output_dir.join("crop").join(&output.record.crop_image_name).display());
            println!("Time:    {:.3}s", output.record.wall_time);

            if let Some(path) = save_visualization {
                output.visualization.save(&path)?;
            }
            if let Some(path) = save_crop {
                output.crop.save(&path)?;
            }

            pipeline.gateway().close().await?;
        }
        Command::Models => {
            let selector = ModelSelector::from_config(&config);
            for model in selector.known_models() {
                let installed = config.models_dir.join(model_dir_name(model)).is_dir();
                let marker = if model == selector.default_model() { "*" } else { " " };
                println!(
                    "{} {} {}",
                    marker,
                    model,
                    if installed { "(installed)" } else { "(missing)" }
                );
            }
        }
        Command::History { limit } => {
            let db = DetectionDb::new(&config.database_path).await?;
            let detections = db.get_detections(limit).await?;
            if detections.is_empty() {
                println!("No detections recorded.");
            }
            for d in &detections {
                let plate = if d.license_plate_data.is_empty() { "-" } else { d.license_plate_data.as_str() };
                println!(
                    "#{} {} {:.3}s {} {} {}",
                    d.id, d.created_at, d.wall_time, plate, d.original_image_name, d.crop_image_name
                );
            }
            db.close().await?;
        }
    }

    Ok(())
}
