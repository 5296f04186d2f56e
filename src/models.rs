//! Weight sources and predictor loading
//!
//! A [`WeightSource`] names where a model's weights come from; the
//! [`ModelArtifactLoader`] resolves both sources once at startup, verifies
//! integrity, and hands the bytes to a [`PredictorFactory`] that builds the
//! process-wide predictor handles. Loading is explicit and returns
//! `Result` exactly once: there is no lazy mid-request retry.

use crate::download;
use crate::error::{AnalysisError, Result};
use crate::inference::{PredictorHandle, PredictorSet};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

/// Where a model's weights come from. The strategy is selected by
/// configuration; the pipeline never learns which one produced its
/// predictors.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WeightSource {
    /// A single weight file on the local filesystem
    LocalFile(PathBuf),
    /// Split weight archive: every file in `dir` whose name starts with
    /// `prefix`, reassembled in name order
    ChunkedParts {
        /// Directory holding the part files
        dir: PathBuf,
        /// Common file-name prefix of the parts
        prefix: String,
    },
    /// Weights fetched from a remote object store into the local cache by
    /// [`crate::download::WeightDownloader`]. Resolution is cache-only.
    RemoteObjectStore(String),
}

impl WeightSource {
    /// Display name for tracing and error messages
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            WeightSource::LocalFile(path) => format!(
                "file:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            WeightSource::ChunkedParts { dir, prefix } => {
                format!("chunked:{}/{prefix}*", dir.display())
            },
            WeightSource::RemoteObjectStore(url) => format!("remote:{url}"),
        }
    }

    /// Resolve the source into weight bytes.
    ///
    /// # Errors
    /// - `Model` when the file, parts, or cached download are missing or
    ///   unreadable
    pub fn resolve(&self) -> Result<Vec<u8>> {
        match self {
            WeightSource::LocalFile(path) => fs::read(path).map_err(|e| {
                AnalysisError::model(format!(
                    "Failed to read weight file '{}': {e}",
                    path.display()
                ))
            }),
            WeightSource::ChunkedParts { dir, prefix } => reassemble_chunks(dir, prefix),
            WeightSource::RemoteObjectStore(url) => {
                let cached = download::cached_weight_path(url)?;
                if !cached.is_file() {
                    return Err(AnalysisError::model(format!(
                        "Weights for '{url}' are not cached locally. \
                         Fetch them first with WeightDownloader::fetch."
                    )));
                }
                fs::read(&cached).map_err(|e| {
                    AnalysisError::model(format!(
                        "Failed to read cached weights '{}': {e}",
                        cached.display()
                    ))
                })
            },
        }
    }
}

/// Reassemble split weight parts through a temporary file, in part-name
/// order, and return the joined bytes.
fn reassemble_chunks(dir: &std::path::Path, prefix: &str) -> Result<Vec<u8>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        AnalysisError::model(format!(
            "Failed to read weight parts directory '{}': {e}",
            dir.display()
        ))
    })?;

    let mut parts: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
        })
        .collect();
    parts.sort();

    if parts.is_empty() {
        return Err(AnalysisError::model(format!(
            "No weight parts matching '{prefix}*' in '{}'",
            dir.display()
        )));
    }

    log::debug!("Reassembling {} weight parts from {}", parts.len(), dir.display());

    let mut staging = tempfile::tempfile()
        .map_err(|e| AnalysisError::model(format!("Failed to create reassembly file: {e}")))?;
    for part in &parts {
        let mut reader = fs::File::open(part)
            .map_err(|e| AnalysisError::file_io_error("open weight part", part, &e))?;
        std::io::copy(&mut reader, &mut staging)
            .map_err(|e| AnalysisError::file_io_error("append weight part", part, &e))?;
    }

    staging
        .seek(SeekFrom::Start(0))
        .map_err(AnalysisError::Io)?;
    let mut bytes = Vec::new();
    staging.read_to_end(&mut bytes).map_err(AnalysisError::Io)?;
    Ok(bytes)
}

/// Hex-encoded sha-256 digest of a byte buffer
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Factory turning resolved weight bytes into predictor handles.
///
/// The production implementation is
/// [`crate::backends::TractPredictorFactory`]; tests use the mock factory.
pub trait PredictorFactory: Send + Sync {
    /// Build the two-class classifier from its weights
    ///
    /// # Errors
    /// - Weight parsing or model construction failures
    fn build_classifier(&self, weights: &[u8]) -> Result<PredictorHandle>;

    /// Build the per-pixel segmentor from its weights
    ///
    /// # Errors
    /// - Weight parsing or model construction failures
    fn build_segmentor(&self, weights: &[u8]) -> Result<PredictorHandle>;
}

/// Loads both predictors exactly once and caches the handles.
#[derive(Debug)]
pub struct ModelArtifactLoader {
    classifier_source: WeightSource,
    segmentor_source: WeightSource,
    classifier_sha256: Option<String>,
    segmentor_sha256: Option<String>,
    classifier: OnceLock<PredictorHandle>,
    segmentor: OnceLock<PredictorHandle>,
}

impl ModelArtifactLoader {
    /// Create a loader over the two configured weight sources
    #[must_use]
    pub fn new(classifier_source: WeightSource, segmentor_source: WeightSource) -> Self {
        Self {
            classifier_source,
            segmentor_source,
            classifier_sha256: None,
            segmentor_sha256: None,
            classifier: OnceLock::new(),
            segmentor: OnceLock::new(),
        }
    }

    /// Require the classifier weights to match a sha-256 digest
    #[must_use]
    pub fn with_classifier_checksum<S: Into<String>>(mut self, sha256: S) -> Self {
        self.classifier_sha256 = Some(sha256.into());
        self
    }

    /// Require the segmentor weights to match a sha-256 digest
    #[must_use]
    pub fn with_segmentor_checksum<S: Into<String>>(mut self, sha256: S) -> Self {
        self.segmentor_sha256 = Some(sha256.into());
        self
    }

    /// Load the classifier. Idempotent: the handle is cached after the
    /// first success and later calls return it without touching the source.
    ///
    /// # Errors
    /// - Source resolution, checksum, or predictor construction failures
    pub fn load_classifier(&self, factory: &dyn PredictorFactory) -> Result<PredictorHandle> {
        Self::load_cached(
            &self.classifier,
            &self.classifier_source,
            self.classifier_sha256.as_deref(),
            "classifier",
            |bytes| factory.build_classifier(bytes),
        )
    }

    /// Load the segmentor. Idempotent, like [`Self::load_classifier`].
    ///
    /// # Errors
    /// - Source resolution, checksum, or predictor construction failures
    pub fn load_segmentor(&self, factory: &dyn PredictorFactory) -> Result<PredictorHandle> {
        Self::load_cached(
            &self.segmentor,
            &self.segmentor_source,
            self.segmentor_sha256.as_deref(),
            "segmentor",
            |bytes| factory.build_segmentor(bytes),
        )
    }

    /// Load both predictors into an injectable [`PredictorSet`]
    ///
    /// # Errors
    /// - Any failure loading either predictor
    pub fn load_all(&self, factory: &dyn PredictorFactory) -> Result<PredictorSet> {
        let classifier = self.load_classifier(factory)?;
        let segmentor = self.load_segmentor(factory)?;
        Ok(PredictorSet::new(classifier, segmentor))
    }

    fn load_cached(
        cell: &OnceLock<PredictorHandle>,
        source: &WeightSource,
        expected_sha256: Option<&str>,
        role: &str,
        build: impl FnOnce(&[u8]) -> Result<PredictorHandle>,
    ) -> Result<PredictorHandle> {
        if let Some(handle) = cell.get() {
            return Ok(Arc::clone(handle));
        }

        log::info!("Loading {role} weights from {}", source.display_name());
        let bytes = source.resolve()?;

        if let Some(expected) = expected_sha256 {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(AnalysisError::model(format!(
                    "{role} weights from {} failed integrity check: \
                     expected sha256 {expected}, got {actual}",
                    source.display_name()
                )));
            }
        }

        let handle = build(&bytes)?;
        log::info!("Loaded {role} ({} weight bytes)", bytes.len());
        Ok(Arc::clone(cell.get_or_init(|| handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Predictor;
    use ndarray::{Array4, ArrayD, IxDyn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct StubPredictor;

    impl Predictor for StubPredictor {
        fn predict(&self, _input: &Array4<f32>) -> Result<ArrayD<f32>> {
            Ok(ArrayD::zeros(IxDyn(&[1, 2])))
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    struct CountingFactory {
        builds: AtomicUsize,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                builds: AtomicUsize::new(0),
            }
        }
    }

    impl PredictorFactory for CountingFactory {
        fn build_classifier(&self, _weights: &[u8]) -> Result<PredictorHandle> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubPredictor))
        }

        fn build_segmentor(&self, _weights: &[u8]) -> Result<PredictorHandle> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubPredictor))
        }
    }

    fn write_weights(dir: &std::path::Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_local_file_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_weights(dir.path(), "classifier.onnx", b"weights!");

        let bytes = WeightSource::LocalFile(path).resolve().unwrap();
        assert_eq!(bytes, b"weights!");
    }

    #[test]
    fn test_missing_local_file_is_model_error() {
        let err = WeightSource::LocalFile(PathBuf::from("/no/such/weights.onnx"))
            .resolve()
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Model(_)));
    }

    #[test]
    fn test_chunked_reassembly_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        write_weights(dir.path(), "seg.part2", b"DEF");
        write_weights(dir.path(), "seg.part0", b"ABC" as &[u8]);
        write_weights(dir.path(), "seg.part1", b"123");
        write_weights(dir.path(), "unrelated.bin", b"xxx");

        let source = WeightSource::ChunkedParts {
            dir: dir.path().to_path_buf(),
            prefix: "seg.part".to_string(),
        };
        assert_eq!(source.resolve().unwrap(), b"ABC123DEF");
    }

    #[test]
    fn test_chunked_without_parts_is_model_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = WeightSource::ChunkedParts {
            dir: dir.path().to_path_buf(),
            prefix: "seg.part".to_string(),
        };
        assert!(matches!(
            source.resolve().unwrap_err(),
            AnalysisError::Model(_)
        ));
    }

    #[test]
    fn test_uncached_remote_is_model_error() {
        let source =
            WeightSource::RemoteObjectStore("https://example.org/never-fetched.onnx".to_string());
        assert!(source.resolve().is_err());
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_weights(dir.path(), "classifier.onnx", b"weights!");

        let loader = ModelArtifactLoader::new(
            WeightSource::LocalFile(path.clone()),
            WeightSource::LocalFile(path),
        )
        .with_classifier_checksum("0".repeat(64));

        let factory = CountingFactory::new();
        let err = loader.load_classifier(&factory).unwrap_err();
        assert!(matches!(err, AnalysisError::Model(_)));
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_checksum_match_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_weights(dir.path(), "classifier.onnx", b"weights!");

        let loader = ModelArtifactLoader::new(
            WeightSource::LocalFile(path.clone()),
            WeightSource::LocalFile(path),
        )
        .with_classifier_checksum(sha256_hex(b"weights!"));

        let factory = CountingFactory::new();
        assert!(loader.load_classifier(&factory).is_ok());
    }

    #[test]
    fn test_loading_is_idempotent_and_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_weights(dir.path(), "weights.onnx", b"w");

        let loader = ModelArtifactLoader::new(
            WeightSource::LocalFile(path.clone()),
            WeightSource::LocalFile(path),
        );
        let factory = CountingFactory::new();

        loader.load_classifier(&factory).unwrap();
        loader.load_classifier(&factory).unwrap();
        loader.load_all(&factory).unwrap();

        // One build per role, ever
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }
}
