//! Analysis pipeline configuration

use crate::error::{AnalysisError, Result};
use std::path::PathBuf;

/// Spatial size (width and height) of the tensor both predictors consume.
pub const MODEL_INPUT_SIZE: u32 = 256;

/// Index of the "pathology present" class in the classifier's two-class
/// distribution. The positive/negative decision is `argmax == this index`,
/// a hard decision rule rather than a tunable probability cutoff; changing
/// it changes clinical behavior.
pub const POSITIVE_CLASS_INDEX: usize = 1;

/// Probability cutoff applied to the segmentor's per-pixel output to form
/// the binary pre-mask.
pub const SEGMENTATION_THRESHOLD: f32 = 0.3;

/// RGBA tint painted over mask-positive pixels in the overlay.
pub const OVERLAY_TINT: [u8; 4] = [255, 0, 0, 128];

/// Blend weight of the tint layer when compositing the overlay.
pub const OVERLAY_TINT_WEIGHT: f32 = 0.7;

/// Default root directory for archived analyses.
pub const DEFAULT_ARCHIVE_ROOT: &str = "uploads";

/// Default maximum number of records returned by a history listing.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Configuration for the analysis pipeline
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Root directory under which analysis folders are created
    pub archive_root: PathBuf,
    /// Probability cutoff for the binary pre-mask
    pub segmentation_threshold: f32,
    /// Classifier output index treated as "pathology present"
    pub positive_class_index: usize,
    /// RGBA tint for overlay compositing
    pub overlay_tint: [u8; 4],
    /// Blend weight for the tint layer
    pub overlay_tint_weight: f32,
    /// Default record cap for history listings
    pub history_limit: usize,
}

impl AnalysisConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder::new()
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from(DEFAULT_ARCHIVE_ROOT),
            segmentation_threshold: SEGMENTATION_THRESHOLD,
            positive_class_index: POSITIVE_CLASS_INDEX,
            overlay_tint: OVERLAY_TINT,
            overlay_tint_weight: OVERLAY_TINT_WEIGHT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Builder for [`AnalysisConfig`]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: AnalysisConfig::default(),
        }
    }

    #[must_use]
    pub fn archive_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.config.archive_root = root.into();
        self
    }

    #[must_use]
    pub fn segmentation_threshold(mut self, threshold: f32) -> Self {
        self.config.segmentation_threshold = threshold;
        self
    }

    #[must_use]
    pub fn positive_class_index(mut self, index: usize) -> Self {
        self.config.positive_class_index = index;
        self
    }

    #[must_use]
    pub fn overlay_tint(mut self, tint: [u8; 4]) -> Self {
        self.config.overlay_tint = tint;
        self
    }

    #[must_use]
    pub fn overlay_tint_weight(mut self, weight: f32) -> Self {
        self.config.overlay_tint_weight = weight;
        self
    }

    #[must_use]
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.history_limit = limit;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidConfig` for:
    /// - Segmentation threshold outside `(0, 1)`
    /// - Tint weight outside `[0, 1]`
    /// - Positive class index outside the two-class distribution
    pub fn build(self) -> Result<AnalysisConfig> {
        if !(self.config.segmentation_threshold > 0.0 && self.config.segmentation_threshold < 1.0) {
            return Err(AnalysisError::invalid_config(
                "Segmentation threshold must be strictly between 0 and 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.config.overlay_tint_weight) {
            return Err(AnalysisError::invalid_config(
                "Overlay tint weight must be between 0 and 1",
            ));
        }
        if self.config.positive_class_index > 1 {
            return Err(AnalysisError::invalid_config(
                "Positive class index must address a two-class distribution (0 or 1)",
            ));
        }

        Ok(self.config)
    }
}

impl Default for AnalysisConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
