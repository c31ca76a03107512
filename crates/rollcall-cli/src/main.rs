use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{FaceEngine, IdentityKey, RgbImage};
use rollcall_store::{EncodingStore, FileEncodingStore, SqliteEncodingStore};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::{Config, StoreBackend};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-matching attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the most confident face in an image for an identity
    Enroll {
        /// Identity key (e.g., student number)
        id: String,
        image: PathBuf,
    },
    /// Check whether an image shows the enrolled identity
    Verify {
        id: String,
        image: PathBuf,
        /// Override the verification threshold
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Roll-call: match every face in an image against enrolled identities
    Identify {
        image: PathBuf,
        /// Override the identification threshold
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Restrict candidates to these identities (default: everyone enrolled)
        #[arg(long = "id")]
        ids: Vec<String>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove { id: String },
    /// Show the active detection strategy
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let store = open_store(&config)?;

    match cli.command {
        Commands::Enroll { id, image } => {
            let engine = FaceEngine::new(config.engine.clone());
            let img = load_image(&image)?;
            let identity = IdentityKey::from(id);

            let Some(face) = engine.enroll(&img) else {
                anyhow::bail!("no face detected in {}", image.display());
            };
            store.save(&identity, &face.embedding)?;
            tracing::info!(%identity, confidence = face.confidence, "enrolled");

            print_json(&serde_json::json!({
                "identity": identity,
                "bbox": face.bbox,
                "confidence": face.confidence,
                "dimension": face.embedding.len(),
                "model_version": face.embedding.model_version,
            }))?;
        }
        Commands::Verify { id, image, threshold } => {
            let engine = FaceEngine::new(config.engine.clone());
            let identity = IdentityKey::from(id);
            let stored = store
                .load(&identity)?
                .with_context(|| format!("{identity} is not enrolled"))?;
            let img = load_image(&image)?;
            let threshold = threshold.unwrap_or(engine.config().verify_threshold);

            // Best-scoring face in the frame decides.
            let best = engine
                .detect(&img)
                .into_iter()
                .map(|d| (engine.verify(&d.embedding, &stored, threshold), d))
                .reduce(|a, b| if b.0.score > a.0.score { b } else { a });

            let report = match best {
                Some((verification, face)) => serde_json::json!({
                    "identity": identity,
                    "is_match": verification.is_match,
                    "score": verification.score,
                    "threshold": threshold,
                    "bbox": face.bbox,
                }),
                None => serde_json::json!({
                    "identity": identity,
                    "is_match": false,
                    "score": 0.0,
                    "threshold": threshold,
                    "bbox": null,
                }),
            };
            tracing::info!(%identity, "verify complete");
            print_json(&report)?;
        }
        Commands::Identify { image, threshold, ids } => {
            let engine = FaceEngine::new(config.engine.clone());
            let candidates = if ids.is_empty() {
                store.load_all()?
            } else {
                let ids: Vec<IdentityKey> = ids.into_iter().map(IdentityKey::from).collect();
                store.load_many(&ids)?
            };
            if candidates.is_empty() {
                tracing::warn!("no enrolled identities to match against");
            }

            let img = load_image(&image)?;
            let threshold = threshold.unwrap_or(engine.config().identify_threshold);
            let matches = engine.identify(&img, &candidates, threshold);
            tracing::info!(
                candidates = candidates.len(),
                matched = matches.len(),
                "roll-call complete"
            );
            print_json(&matches)?;
        }
        Commands::List => {
            print_json(&store.identities()?)?;
        }
        Commands::Remove { id } => {
            let identity = IdentityKey::from(id);
            let removed = store.remove(&identity)?;
            print_json(&serde_json::json!({ "identity": identity, "removed": removed }))?;
        }
        Commands::Info => {
            let engine = FaceEngine::new(config.engine.clone());
            print_json(&engine.engine_info())?;
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<Box<dyn EncodingStore>> {
    let store: Box<dyn EncodingStore> = match config.store {
        StoreBackend::File => Box::new(
            FileEncodingStore::open(&config.encodings_dir)
                .with_context(|| format!("opening {}", config.encodings_dir.display()))?,
        ),
        StoreBackend::Sqlite => Box::new(
            SqliteEncodingStore::open(&config.db_path)
                .with_context(|| format!("opening {}", config.db_path.display()))?,
        ),
    };
    Ok(store)
}

fn load_image(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgb8())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
