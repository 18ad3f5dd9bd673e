use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[zbus::proxy(
    interface = "org.freedesktop.Facegate1",
    default_service = "org.freedesktop.Facegate1",
    default_path = "/org/freedesktop/Facegate1"
)]
trait Facegate {
    async fn detect(&self, image: &[u8]) -> zbus::Result<String>;
    async fn extract_embedding(&self, image: &[u8]) -> zbus::Result<String>;
    async fn compare(&self, embedding1: &[f64], embedding2: &[f64]) -> zbus::Result<String>;
    async fn verify(&self, image: &[u8], stored_embedding: &str) -> zbus::Result<String>;
    async fn liveness(&self, image: &[u8]) -> zbus::Result<String>;
    async fn register(&self, image: &[u8], skip_liveness: bool) -> zbus::Result<String>;
    async fn check_uniqueness(
        &self,
        embedding: &[f64],
        gallery: &str,
        threshold: f64,
    ) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate face biometrics CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the face in an image
    Detect { image: PathBuf },
    /// Extract a face embedding from an image
    Extract { image: PathBuf },
    /// Compare two embedding files
    Compare { first: PathBuf, second: PathBuf },
    /// Verify a face, optionally against a stored embedding file
    Verify {
        image: PathBuf,
        #[arg(short, long)]
        stored: Option<PathBuf>,
    },
    /// Run the liveness heuristic on an image
    Liveness { image: PathBuf },
    /// Register a face (detection, liveness and embedding gates)
    Register {
        image: PathBuf,
        #[arg(long)]
        skip_liveness: bool,
    },
    /// Check an embedding against a gallery file of {id, embedding} entries
    Uniqueness {
        embedding: PathBuf,
        gallery: PathBuf,
        /// Duplicate threshold; 0 uses the daemon default
        #[arg(short, long, default_value_t = 0.0)]
        threshold: f64,
    },
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let builder = if cli.session {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    // Inference on large images can take a few seconds.
    let conn = builder
        .method_timeout(Duration::from_secs(30))
        .build()
        .await
        .context("failed to connect to D-Bus")?;
    let proxy = FacegateProxy::new(&conn).await?;
    tracing::debug!(session = cli.session, "connected to facegated");

    let response = match cli.command {
        Commands::Detect { image } => proxy.detect(&read_image(&image)?).await?,
        Commands::Extract { image } => proxy.extract_embedding(&read_image(&image)?).await?,
        Commands::Compare { first, second } => {
            proxy.compare(&read_embedding(&first)?, &read_embedding(&second)?).await?
        }
        Commands::Verify { image, stored } => {
            let stored = match stored {
                Some(path) => serde_json::to_string(&read_embedding(&path)?)?,
                None => String::new(),
            };
            proxy.verify(&read_image(&image)?, &stored).await?
        }
        Commands::Liveness { image } => proxy.liveness(&read_image(&image)?).await?,
        Commands::Register { image, skip_liveness } => {
            proxy.register(&read_image(&image)?, skip_liveness).await?
        }
        Commands::Uniqueness {
            embedding,
            gallery,
            threshold,
        } => {
            let gallery = std::fs::read_to_string(&gallery)
                .with_context(|| format!("failed to read {}", gallery.display()))?;
            proxy
                .check_uniqueness(&read_embedding(&embedding)?, &gallery, threshold)
                .await?
        }
        Commands::Status => proxy.status().await?,
    };

    println!("{}", pretty(&response));
    Ok(())
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_embedding(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    embedding_from_json(value).with_context(|| format!("no embedding in {}", path.display()))
}

/// Accepts a bare `[..]` array or any response object carrying an `embedding` field.
fn embedding_from_json(value: Value) -> Result<Vec<f64>> {
    let array = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("embedding") {
            Some(Value::Array(items)) => items,
            _ => bail!("object has no \"embedding\" array"),
        },
        _ => bail!("expected a JSON array or object"),
    };
    array
        .iter()
        .map(|v| v.as_f64().context("embedding contains a non-numeric value"))
        .collect()
}

/// Re-indent the daemon's JSON; fall back to the raw text.
fn pretty(raw: &str) -> String {
    serde_json::from_str::<Value>(raw)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| raw.to_string())
}
