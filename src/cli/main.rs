//! Lesion analysis CLI
//!
//! Command-line frontend over the analysis pipeline: analyze an image,
//! list or delete archived analyses, and fetch remote weights. These
//! mirror the service routes the library is embedded behind, minus the
//! HTTP glue.

use crate::{
    archive::AnalysisArchive,
    config::AnalysisConfig,
    download::WeightDownloader,
    models::{ModelArtifactLoader, WeightSource},
    processor::AnalysisProcessor,
    tracing_config::TracingConfig,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lesion analysis tool
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "lesionscan")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze an image and archive the resulting artifacts
    Analyze {
        /// Image file to analyze
        image: PathBuf,

        /// Classifier weights: a file path, a directory of split parts, or an URL
        #[arg(long)]
        classifier: String,

        /// Segmentor weights: a file path, a directory of split parts, or an URL
        #[arg(long)]
        segmentor: String,

        /// Archive root directory
        #[arg(long, default_value = crate::config::DEFAULT_ARCHIVE_ROOT)]
        archive_dir: PathBuf,

        /// Expected sha-256 of the classifier weights
        #[arg(long)]
        classifier_sha256: Option<String>,

        /// Expected sha-256 of the segmentor weights
        #[arg(long)]
        segmentor_sha256: Option<String>,
    },

    /// List archived analyses, most recent first
    History {
        /// Maximum number of records to show
        #[arg(long, default_value_t = crate::config::DEFAULT_HISTORY_LIMIT)]
        limit: usize,

        /// Archive root directory
        #[arg(long, default_value = crate::config::DEFAULT_ARCHIVE_ROOT)]
        archive_dir: PathBuf,
    },

    /// Delete one archived analysis and all of its artifacts
    Delete {
        /// Analysis id (bare timestamp or analysis_-prefixed directory name)
        id: String,

        /// Archive root directory
        #[arg(long, default_value = crate::config::DEFAULT_ARCHIVE_ROOT)]
        archive_dir: PathBuf,
    },

    /// Fetch remote weights into the local cache
    Download {
        /// Weight file URL
        url: String,

        /// Re-download even if already cached
        #[arg(long)]
        overwrite: bool,
    },
}

/// CLI entry point
///
/// # Errors
/// Returns an error for invalid arguments, weight loading failures, or
/// pipeline failures; the binary reports it and exits non-zero.
pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    TracingConfig::new()
        .with_verbosity(cli.verbose)
        .init()
        .context("Failed to initialize tracing")?;

    match cli.command {
        Command::Analyze {
            image,
            classifier,
            segmentor,
            archive_dir,
            classifier_sha256,
            segmentor_sha256,
        } => {
            analyze(
                &image,
                &classifier,
                &segmentor,
                archive_dir,
                classifier_sha256,
                segmentor_sha256,
            )
            .await
        },
        Command::History { limit, archive_dir } => history(&archive_dir, limit),
        Command::Delete { id, archive_dir } => delete(&archive_dir, &id),
        Command::Download { url, overwrite } => download(&url, overwrite).await,
    }
}

/// Interpret a weight argument: URLs become remote sources, directories
/// become split-part sources, anything else is a local file.
fn parse_weight_source(argument: &str) -> WeightSource {
    if argument.starts_with("http://") || argument.starts_with("https://") {
        return WeightSource::RemoteObjectStore(argument.to_string());
    }

    let path = PathBuf::from(argument);
    if path.is_dir() {
        WeightSource::ChunkedParts {
            dir: path,
            prefix: "part".to_string(),
        }
    } else {
        WeightSource::LocalFile(path)
    }
}

/// Fetch a remote source into the cache if it is not there yet
async fn ensure_cached(source: &WeightSource) -> Result<()> {
    if let WeightSource::RemoteObjectStore(url) = source {
        let downloader = WeightDownloader::new().context("Failed to open weight cache")?;
        if !downloader.is_cached(url) {
            downloader
                .fetch(url, false)
                .await
                .with_context(|| format!("Failed to fetch weights from {url}"))?;
        }
    }
    Ok(())
}

async fn analyze(
    image: &std::path::Path,
    classifier: &str,
    segmentor: &str,
    archive_dir: PathBuf,
    classifier_sha256: Option<String>,
    segmentor_sha256: Option<String>,
) -> Result<()> {
    let classifier_source = parse_weight_source(classifier);
    let segmentor_source = parse_weight_source(segmentor);
    ensure_cached(&classifier_source).await?;
    ensure_cached(&segmentor_source).await?;

    let mut loader = ModelArtifactLoader::new(classifier_source, segmentor_source);
    if let Some(sha) = classifier_sha256 {
        loader = loader.with_classifier_checksum(sha);
    }
    if let Some(sha) = segmentor_sha256 {
        loader = loader.with_segmentor_checksum(sha);
    }

    let predictors = load_predictors(&loader)?;

    let config = AnalysisConfig::builder().archive_root(archive_dir).build()?;
    let processor = AnalysisProcessor::new(predictors, config)?;

    let report = processor
        .analyze_file(image)
        .with_context(|| format!("Failed to analyze '{}'", image.display()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(feature = "tract")]
fn load_predictors(loader: &ModelArtifactLoader) -> Result<crate::inference::PredictorSet> {
    let factory = crate::backends::TractPredictorFactory::new();
    Ok(loader.load_all(&factory)?)
}

#[cfg(not(feature = "tract"))]
fn load_predictors(_loader: &ModelArtifactLoader) -> Result<crate::inference::PredictorSet> {
    bail!("No inference backend compiled in. Rebuild with --features tract.")
}

fn history(archive_dir: &std::path::Path, limit: usize) -> Result<()> {
    let archive = AnalysisArchive::new(archive_dir)?;
    let records = archive.list(limit)?;

    if records.is_empty() {
        println!("No archived analyses under {}", archive_dir.display());
        return Ok(());
    }

    for record in records {
        println!("{}  {}  {}", record.date, record.id, record.original);
    }
    Ok(())
}

fn delete(archive_dir: &std::path::Path, id: &str) -> Result<()> {
    let archive = AnalysisArchive::new(archive_dir)?;
    match archive.delete(id) {
        Ok(()) => {
            println!("Deleted analysis {id}");
            Ok(())
        },
        Err(crate::error::AnalysisError::NotFound(_)) => {
            bail!("Analysis '{id}' not found")
        },
        Err(e) => Err(e.into()),
    }
}

async fn download(url: &str, overwrite: bool) -> Result<()> {
    let downloader = WeightDownloader::new().context("Failed to open weight cache")?;
    let path = downloader.fetch(url, overwrite).await?;
    println!("Cached weights at {}", path.display());
    Ok(())
}
