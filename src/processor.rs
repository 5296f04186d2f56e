//! Analysis processor: the conditional two-stage inference pipeline
//!
//! Owns the per-request flow from raw upload bytes to an archived
//! [`AnalysisReport`]. Each request moves through a strictly linear state
//! machine: `Start -> Normalized -> Classified`, then either straight to
//! `Done` on a negative call or through `Segmenting` to `Done` on a
//! positive one. Segmentation is the expensive stage and never runs when
//! the classifier rules the condition out.
//!
//! The processor is shared-state free apart from the injected immutable
//! predictor handles and the archive directory tree; `&self` methods let
//! any number of worker threads run requests concurrently.

use crate::{
    archive::{AnalysisArchive, AnalysisRecord},
    config::AnalysisConfig,
    error::{AnalysisError, Result},
    inference::PredictorSet,
    overlay::OverlayCompositor,
    postprocessing::MaskPostprocessor,
    preprocessing::{decode_bytes, ImageNormalizer},
    types::{AnalysisReport, AnalysisStage, ArtifactPaths, Classification},
};
use image::{imageops, DynamicImage, GrayImage};
use ndarray::{Array4, ArrayD};
use std::path::Path;
use tracing::{debug as trace_debug, info as trace_info, instrument, span, Level};

/// Orchestrates normalization, classification, conditional segmentation,
/// and artifact archiving for one request at a time per caller thread.
pub struct AnalysisProcessor {
    predictors: PredictorSet,
    config: AnalysisConfig,
    archive: AnalysisArchive,
}

impl AnalysisProcessor {
    /// Create a processor over an injected predictor set. The archive root
    /// is opened (and created if missing) up front; a processor that
    /// cannot archive refuses to exist rather than failing per request.
    ///
    /// # Errors
    /// - Failed to create the archive root directory
    pub fn new(predictors: PredictorSet, config: AnalysisConfig) -> Result<Self> {
        let archive = AnalysisArchive::new(config.archive_root.clone())?;
        Ok(Self {
            predictors,
            config,
            archive,
        })
    }

    /// The active configuration
    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// The archive this processor writes into
    #[must_use]
    pub fn archive(&self) -> &AnalysisArchive {
        &self.archive
    }

    /// Analyze an uploaded image file.
    ///
    /// # Errors
    /// - File I/O errors reading the path
    /// - Everything [`Self::analyze_bytes`] can return
    pub fn analyze_file<P: AsRef<Path>>(&self, path: P) -> Result<AnalysisReport> {
        let path_ref = path.as_ref();
        let bytes = std::fs::read(path_ref)
            .map_err(|e| AnalysisError::file_io_error("read upload", path_ref, &e))?;
        self.analyze_bytes(&bytes)
    }

    /// Analyze raw upload bytes.
    ///
    /// # Errors
    /// - `BadInput` for empty or undecodable uploads (the archive keeps at
    ///   most the already-created directory and original file)
    /// - `Inference` when a predictor invocation fails; never retried here,
    ///   retry policy belongs to the caller
    #[instrument(skip(self, bytes), fields(upload_bytes = bytes.len()))]
    pub fn analyze_bytes(&self, bytes: &[u8]) -> Result<AnalysisReport> {
        match self.run_pipeline(bytes) {
            // Both decode attempts rejecting the bytes means the upload was bad
            Err(AnalysisError::Decode(msg)) => Err(AnalysisError::bad_input(msg)),
            other => other,
        }
    }

    fn run_pipeline(&self, bytes: &[u8]) -> Result<AnalysisReport> {
        let mut stage = AnalysisStage::Start;

        // The record is identified before any inference runs: a concurrent
        // lister sees either nothing or a fully-named directory.
        let folder = self.archive.create()?;
        trace_info!(analysis_id = %folder.id(), "analysis admitted");

        if bytes.is_empty() {
            return Err(AnalysisError::bad_input("Empty upload"));
        }
        let original_rel = self.archive.save_original(&folder, bytes)?;

        let (original, tensor) = {
            let _span = span!(Level::DEBUG, "normalization").entered();
            let original = decode_bytes(bytes)?;
            let tensor = ImageNormalizer::normalize_image(&original);
            (original, tensor)
        };
        Self::advance(&mut stage, AnalysisStage::Normalized);

        let classification = {
            let _span = span!(
                Level::INFO,
                "classification",
                predictor = %self.predictors.classifier().name()
            )
            .entered();
            self.classify(&tensor)?
        };
        Self::advance(&mut stage, AnalysisStage::Classified);
        trace_info!(
            analysis_id = %folder.id(),
            has_pathology = classification.has_pathology,
            confidence = classification.confidence,
            "classification decided"
        );

        if !classification.has_pathology {
            Self::advance(&mut stage, AnalysisStage::Done);
            return Ok(AnalysisReport {
                analysis_id: folder.id().to_string(),
                has_pathology: false,
                confidence: classification.confidence,
                artifact_paths: ArtifactPaths {
                    original: original_rel,
                    mask: None,
                    overlay: None,
                },
            });
        }

        Self::advance(&mut stage, AnalysisStage::Segmenting);
        let mask = {
            let _span = span!(
                Level::INFO,
                "segmentation",
                predictor = %self.predictors.segmentor().name()
            )
            .entered();
            // Same normalized tensor as the classifier; never re-normalized
            self.segment(&tensor, &original)?
        };

        let cleaned = {
            let _span = span!(Level::DEBUG, "mask_cleanup").entered();
            MaskPostprocessor::clean(&mask)
        };

        let overlay = {
            let _span = span!(Level::DEBUG, "overlay_compositing").entered();
            OverlayCompositor::compose(
                &original,
                &cleaned,
                self.config.overlay_tint,
                self.config.overlay_tint_weight,
            )?
        };

        // Artifacts land in production order, so a partially-written record
        // is always original-only, never original+overlay-without-mask.
        let mask_rel = self.archive.save_mask(&folder, &cleaned)?;
        let overlay_rel = self.archive.save_overlay(&folder, &overlay)?;

        Self::advance(&mut stage, AnalysisStage::Done);
        Ok(AnalysisReport {
            analysis_id: folder.id().to_string(),
            has_pathology: true,
            confidence: classification.confidence,
            artifact_paths: ArtifactPaths {
                original: original_rel,
                mask: Some(mask_rel),
                overlay: Some(overlay_rel),
            },
        })
    }

    /// List archived analyses, most recent first. `limit` defaults to the
    /// configured history cap.
    ///
    /// # Errors
    /// - Failed to read the archive root
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<AnalysisRecord>> {
        self.archive.list(limit.unwrap_or(self.config.history_limit))
    }

    /// Delete one archived analysis wholesale.
    ///
    /// # Errors
    /// - `NotFound` when no such analysis exists
    pub fn delete_analysis(&self, id: &str) -> Result<()> {
        self.archive.delete(id)
    }

    fn advance(stage: &mut AnalysisStage, next: AnalysisStage) {
        trace_debug!(from = ?stage, to = ?next, "stage transition");
        *stage = next;
    }

    fn classify(&self, tensor: &Array4<f32>) -> Result<Classification> {
        let output = self.predictors.classifier().predict(tensor)?;
        let probabilities: Vec<f32> = output.iter().copied().collect();
        Classification::from_distribution(&probabilities, self.config.positive_class_index)
    }

    /// Run the segmentor, threshold its probability map at the model's
    /// native resolution, and resize the binary pre-mask to the original
    /// image's dimensions. Nearest-neighbor only: mask values are
    /// categorical, any interpolation that blends classes is incorrect.
    fn segment(&self, tensor: &Array4<f32>, original: &DynamicImage) -> Result<GrayImage> {
        let output = self.predictors.segmentor().predict(tensor)?;
        let (height, width, probabilities) = Self::squeeze_probability_map(&output)?;

        let threshold = self.config.segmentation_threshold;
        let pre_mask = GrayImage::from_fn(width as u32, height as u32, |x, y| {
            let p = probabilities[y as usize * width + x as usize];
            image::Luma([if p > threshold { 255 } else { 0 }])
        });

        Ok(imageops::resize(
            &pre_mask,
            original.width(),
            original.height(),
            imageops::FilterType::Nearest,
        ))
    }

    /// Collapse the segmentor output to a 2-D `(height, width)` map by
    /// dropping singleton axes.
    fn squeeze_probability_map(output: &ArrayD<f32>) -> Result<(usize, usize, Vec<f32>)> {
        let spatial: Vec<usize> = output
            .shape()
            .iter()
            .copied()
            .filter(|&dim| dim != 1)
            .collect();

        if spatial.len() != 2 {
            return Err(AnalysisError::inference(format!(
                "Segmentor output shape {:?} does not collapse to a 2-D probability map",
                output.shape()
            )));
        }

        // Dropping singleton axes keeps row-major iteration order intact
        Ok((
            spatial[0],
            spatial[1],
            output.iter().copied().collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockClassifier, MockSegmentor};
    use ndarray::IxDyn;
    use std::sync::Arc;

    fn processor_with(
        classifier: MockClassifier,
        segmentor: MockSegmentor,
        archive_root: &Path,
    ) -> AnalysisProcessor {
        let predictors = PredictorSet::new(Arc::new(classifier), Arc::new(segmentor));
        let config = AnalysisConfig::builder()
            .archive_root(archive_root)
            .build()
            .unwrap();
        AnalysisProcessor::new(predictors, config).unwrap()
    }

    fn png_upload(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::ImageBuffer::from_pixel(
            width,
            height,
            image::Rgb([128, 128, 128]),
        ));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    #[test]
    fn test_squeeze_accepts_common_layouts() {
        for shape in [
            vec![1usize, 256, 256, 1],
            vec![1, 256, 256],
            vec![256, 256],
            vec![1, 1, 256, 256],
        ] {
            let output = ArrayD::<f32>::zeros(IxDyn(&shape));
            let (h, w, data) = AnalysisProcessor::squeeze_probability_map(&output).unwrap();
            assert_eq!((h, w), (256, 256));
            assert_eq!(data.len(), 256 * 256);
        }
    }

    #[test]
    fn test_squeeze_rejects_non_planar_output() {
        let output = ArrayD::<f32>::zeros(IxDyn(&[1, 3, 256, 256]));
        assert!(AnalysisProcessor::squeeze_probability_map(&output).is_err());
    }

    #[test]
    fn test_mask_is_sized_to_original_not_model() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with(
            MockClassifier::positive(0.8),
            MockSegmentor::uniform(0.9),
            dir.path(),
        );

        let original = DynamicImage::ImageRgb8(image::ImageBuffer::from_pixel(
            100,
            60,
            image::Rgb([0, 0, 0]),
        ));
        let tensor = ImageNormalizer::normalize_image(&original);
        let mask = processor.segment(&tensor, &original).unwrap();
        assert_eq!(mask.dimensions(), (100, 60));
        assert!(mask.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_threshold_is_strictly_greater_than() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with(
            MockClassifier::positive(0.8),
            MockSegmentor::uniform(0.3),
            dir.path(),
        );

        let original = DynamicImage::ImageRgb8(image::ImageBuffer::from_pixel(
            32,
            32,
            image::Rgb([0, 0, 0]),
        ));
        let tensor = ImageNormalizer::normalize_image(&original);
        // Exactly at the cutoff stays background
        let mask = processor.segment(&tensor, &original).unwrap();
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_empty_upload_leaves_only_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with(
            MockClassifier::positive(0.8),
            MockSegmentor::uniform(0.9),
            dir.path(),
        );

        let err = processor.analyze_bytes(&[]).unwrap_err();
        assert!(matches!(err, AnalysisError::BadInput(_)));

        let dirs: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(dirs.len(), 1);
        assert_eq!(std::fs::read_dir(dirs[0].path()).unwrap().count(), 0);
    }

    #[test]
    fn test_undecodable_upload_keeps_original_only() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with(
            MockClassifier::positive(0.8),
            MockSegmentor::uniform(0.9),
            dir.path(),
        );

        let err = processor.analyze_bytes(b"not an image at all").unwrap_err();
        assert!(matches!(err, AnalysisError::BadInput(_)));

        let dirs: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(dirs.len(), 1);
        let files: Vec<String> = std::fs::read_dir(dirs[0].path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, vec!["original.bin".to_string()]);
    }

    #[test]
    fn test_classifier_failure_is_inference_error() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with(
            MockClassifier::failing(),
            MockSegmentor::uniform(0.9),
            dir.path(),
        );

        let err = processor.analyze_bytes(&png_upload(50, 50)).unwrap_err();
        assert!(matches!(err, AnalysisError::Inference(_)));
    }

    #[test]
    fn test_segmentor_failure_is_inference_error() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor_with(
            MockClassifier::positive(0.8),
            MockSegmentor::failing(),
            dir.path(),
        );

        let err = processor.analyze_bytes(&png_upload(50, 50)).unwrap_err();
        assert!(matches!(err, AnalysisError::Inference(_)));
    }
}
