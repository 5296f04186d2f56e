//! # Lesionscan
//!
//! A medical-image analysis library built around a conditional two-stage
//! inference pipeline: a lightweight classifier decides whether an upload
//! exhibits the target pathology, and only positive calls pay for the
//! heavier segmentation stage. Positive analyses produce a cleaned binary
//! localization mask and a red translucent overlay; every analysis is
//! archived on disk under a timestamp-derived id that can later be listed
//! or deleted.
//!
//! ## Features
//!
//! - **Conditional pipeline**: segmentation never runs when the classifier
//!   rules the condition out
//! - **Opaque predictors**: classifier and segmentor sit behind one
//!   [`Predictor`] trait; the pure-Rust Tract backend is the production
//!   implementation, mocks ship for tests
//! - **Weight strategies**: local files, split part archives, or a remote
//!   object store resolved through a local cache
//! - **Artifact archive**: one directory per analysis with chronological
//!   listing and wholesale deletion
//! - **CLI**: optional command-line frontend (enable with the `cli`
//!   feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lesionscan::{
//!     AnalysisConfig, AnalysisProcessor, ModelArtifactLoader, TractPredictorFactory,
//!     WeightSource,
//! };
//! use std::path::PathBuf;
//!
//! # fn example() -> lesionscan::Result<()> {
//! // Load both predictors once at startup
//! let loader = ModelArtifactLoader::new(
//!     WeightSource::LocalFile(PathBuf::from("classifier.onnx")),
//!     WeightSource::LocalFile(PathBuf::from("segmentor.onnx")),
//! );
//! let predictors = loader.load_all(&TractPredictorFactory::new())?;
//!
//! // One processor serves any number of requests
//! let config = AnalysisConfig::builder().archive_root("uploads").build()?;
//! let processor = AnalysisProcessor::new(predictors, config)?;
//!
//! let report = processor.analyze_file("scan.jpg")?;
//! if report.has_pathology {
//!     println!(
//!         "pathology present ({:.0}% confidence), mask at {:?}",
//!         report.confidence * 100.0,
//!         report.artifact_paths.mask
//!     );
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Library vs CLI Usage
//!
//! All core functionality is available as a library; the `cli` feature
//! adds the `lesionscan` binary with `analyze`, `history`, `delete`, and
//! `download` subcommands.

pub mod archive;
pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod overlay;
pub mod postprocessing;
pub mod preprocessing;
pub mod processor;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

// Public API exports
pub use archive::{AnalysisArchive, AnalysisFolder, AnalysisRecord};
pub use backends::{MockClassifier, MockPredictorFactory, MockSegmentor};
#[cfg(feature = "tract")]
pub use backends::{TractPredictor, TractPredictorFactory};
pub use config::{AnalysisConfig, AnalysisConfigBuilder};
pub use download::WeightDownloader;
pub use error::{AnalysisError, Result};
pub use inference::{
    ExclusivePredictor, Predictor, PredictorHandle, PredictorSet, SerializedPredictor,
};
pub use models::{ModelArtifactLoader, PredictorFactory, WeightSource};
pub use overlay::OverlayCompositor;
pub use postprocessing::MaskPostprocessor;
pub use preprocessing::ImageNormalizer;
pub use processor::AnalysisProcessor;
pub use types::{AnalysisReport, AnalysisStage, ArtifactPaths, Classification};

#[cfg(feature = "cli")]
pub use tracing_config::TracingConfig;
