use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use faceid_core::{EmbeddingModel, FaceGallery, FaceRegion, OnnxEmbeddingModel, OwnedPixelBuffer};
use faceid_engine::{spawn_engine, Config, EngineHandle, Frame, SharedGallery};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "faceid", about = "Face embedding and gallery identification CLI")]
struct Cli {
    /// FaceNet ONNX model (overrides FACEID_MODEL_PATH)
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    /// Gallery JSON file (overrides FACEID_GALLERY_PATH)
    #[arg(long, global = true)]
    gallery: Option<PathBuf>,

    /// Match threshold (overrides FACEID_MATCH_THRESHOLD)
    #[arg(long, global = true)]
    threshold: Option<f32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the normalized embedding of each image as JSON
    Embed {
        images: Vec<PathBuf>,
        /// Face rectangle to crop first, as x,y,width,height
        #[arg(long, value_parser = parse_region)]
        region: Option<FaceRegion>,
    },
    /// Enroll a face image into the gallery
    Enroll {
        /// Label for this face (e.g., "alice")
        #[arg(short, long)]
        label: String,
        image: PathBuf,
        #[arg(long, value_parser = parse_region)]
        region: Option<FaceRegion>,
    },
    /// Identify each image against the gallery
    Identify {
        images: Vec<PathBuf>,
        #[arg(long, value_parser = parse_region)]
        region: Option<FaceRegion>,
    },
    /// List enrolled labels
    List,
    /// Remove an enrolled label
    Remove { label: String },
    /// Show model and gallery details
    Inspect,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(model) = cli.model {
        config.model_path = model;
    }
    if let Some(gallery) = cli.gallery {
        config.gallery_path = gallery;
    }
    if let Some(threshold) = cli.threshold {
        config.match_threshold = threshold;
    }
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Embed { images, region } => {
            let engine = spawn_engine(&config, SharedGallery::default())?;
            for (sequence, path) in images.iter().enumerate() {
                let frame = load_frame(sequence as u64, path, region)?;
                let out = engine
                    .extract(frame)
                    .await
                    .with_context(|| format!("embedding {}", path.display()))?;
                println!("{}", serde_json::to_string(&out)?);
            }
        }
        Commands::Enroll {
            label,
            image,
            region,
        } => {
            let gallery = SharedGallery::new(load_gallery(&config.gallery_path)?);
            let engine = spawn_engine(&config, gallery)?;
            let frame = load_frame(0, &image, region)?;
            let result = engine
                .enroll(label.as_str(), frame)
                .await
                .with_context(|| format!("enrolling {}", image.display()))?;

            save_gallery(&config.gallery_path, &engine.gallery().snapshot()?)?;
            let verb = if result.replaced { "Replaced" } else { "Enrolled" };
            println!(
                "{verb} '{label}' ({:.1} ms) in {}",
                result.latency_ms,
                config.gallery_path.display()
            );
        }
        Commands::Identify { images, region } => {
            let gallery = load_gallery(&config.gallery_path)?;
            if gallery.is_empty() {
                tracing::warn!(
                    path = %config.gallery_path.display(),
                    "gallery is empty; every image will be no_match"
                );
            }
            let engine = spawn_engine(&config, SharedGallery::new(gallery))?;
            identify_all(engine, &images, region).await?;
        }
        Commands::List => {
            let gallery = load_gallery(&config.gallery_path)?;
            if gallery.is_empty() {
                println!("No faces enrolled");
            }
            for (label, embedding) in gallery.iter() {
                let version = embedding.model_version.as_deref().unwrap_or("unknown");
                println!("{label}\t{}-dim\t{version}", embedding.dim());
            }
        }
        Commands::Remove { label } => {
            let mut gallery = load_gallery(&config.gallery_path)?;
            if gallery.remove(&label).is_none() {
                bail!("no face enrolled as '{label}'");
            }
            save_gallery(&config.gallery_path, &gallery)?;
            println!("Removed '{label}'");
        }
        Commands::Inspect => {
            let model_path = config.model_path.to_string_lossy();
            let model = OnnxEmbeddingModel::load(&model_path, config.intra_threads)?;
            let size = model.input_size();
            println!("model:      {model_path}");
            println!("version:    {}", model.model_version().unwrap_or("unknown"));
            println!("input:      [1, {}, {}, 3] {:?}", size.height, size.width, model.input_type());
            println!("threshold:  {}", config.match_threshold);

            let gallery = load_gallery(&config.gallery_path)?;
            println!("gallery:    {}", config.gallery_path.display());
            println!("enrolled:   {}", gallery.len());
            if let Some(dim) = gallery.dimension() {
                println!("dimension:  {dim}");
            }
        }
    }

    Ok(())
}

/// Submit every image at once and print match events as the engine emits them.
async fn identify_all(
    engine: EngineHandle,
    images: &[PathBuf],
    region: Option<FaceRegion>,
) -> Result<()> {
    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "failed to encode match event"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "match event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut tasks = Vec::with_capacity(images.len());
    for (sequence, path) in images.iter().enumerate() {
        let frame = load_frame(sequence as u64, path, region)?;
        let engine = engine.clone();
        let path = path.clone();
        tasks.push(tokio::spawn(async move {
            (path, engine.identify(frame).await)
        }));
    }
    // The worker exits, closing the event stream, once every handle is gone.
    drop(engine);

    let mut failed = 0usize;
    for task in tasks {
        let (path, result) = task.await?;
        if let Err(e) = result {
            eprintln!("{}: {e}", path.display());
            failed += 1;
        }
    }
    printer.await?;

    if failed > 0 {
        bail!("{failed} of {} images could not be identified", images.len());
    }
    Ok(())
}

fn load_frame(sequence: u64, path: &Path, region: Option<FaceRegion>) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_rgba8();
    let frame = Frame::new(sequence, OwnedPixelBuffer::from(image));
    Ok(match region {
        Some(region) => frame.with_region(region),
        None => frame,
    })
}

/// A missing file is an empty gallery.
fn load_gallery(path: &Path) -> Result<FaceGallery> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "no gallery file; starting empty");
        return Ok(FaceGallery::new());
    }
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read gallery {}", path.display()))?;
    let gallery: FaceGallery = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse gallery {}", path.display()))?;
    tracing::info!(path = %path.display(), entries = gallery.len(), "gallery loaded");
    Ok(gallery)
}

fn save_gallery(path: &Path, gallery: &FaceGallery) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let data = serde_json::to_string_pretty(gallery)?;
    std::fs::write(path, data)
        .with_context(|| format!("failed to write gallery {}", path.display()))?;
    tracing::info!(path = %path.display(), entries = gallery.len(), "gallery saved");
    Ok(())
}

fn parse_region(s: &str) -> Result<FaceRegion, String> {
    let parts: Vec<f32> = s
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid region '{s}': {e}"))?;
    let [x, y, width, height] = parts[..] else {
        return Err(format!("region must be x,y,width,height, got '{s}'"));
    };
    Ok(FaceRegion { x, y, width, height })
}
