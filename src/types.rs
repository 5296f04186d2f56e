//! Core types for lesion analysis results

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};

/// Outcome of the classifier stage
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    /// Two-class probability distribution `[absent, present]`
    pub probabilities: Vec<f32>,
    /// Whether the argmax class is the configured positive class
    pub has_pathology: bool,
    /// Probability of the argmax class, in `[0, 1]`
    pub confidence: f32,
}

impl Classification {
    /// Derive a classification from a raw two-class distribution.
    ///
    /// The positive/negative decision is `argmax == positive_class_index`;
    /// the confidence is the maximum probability.
    ///
    /// # Errors
    /// - Distribution does not hold exactly two classes (predictor contract
    ///   violation)
    pub fn from_distribution(probabilities: &[f32], positive_class_index: usize) -> Result<Self> {
        if probabilities.len() != 2 {
            return Err(AnalysisError::inference(format!(
                "Classifier returned {} values, expected a two-class distribution",
                probabilities.len()
            )));
        }

        let mut argmax = 0;
        let mut confidence = probabilities[0];
        for (index, &p) in probabilities.iter().enumerate() {
            if p > confidence {
                argmax = index;
                confidence = p;
            }
        }

        Ok(Self {
            probabilities: probabilities.to_vec(),
            has_pathology: argmax == positive_class_index,
            confidence,
        })
    }
}

/// Relative paths to the persisted artifacts of one analysis.
///
/// `mask` and `overlay` are `None` (serialized as `null`) for negative
/// classifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// Path to the archived upload, relative to the archive root
    pub original: String,
    /// Path to the cleaned binary mask, if one was produced
    pub mask: Option<String>,
    /// Path to the tinted visualization, if one was produced
    pub overlay: Option<String>,
}

/// Response descriptor produced by the pipeline and consumed by the
/// routing layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Timestamp-derived analysis identifier
    pub analysis_id: String,
    /// Whether the classifier called the target pathology present
    pub has_pathology: bool,
    /// Classifier confidence in `[0, 1]`
    pub confidence: f32,
    /// Locations of the archived artifacts
    pub artifact_paths: ArtifactPaths,
}

/// Stages a request moves through, strictly in order. Used for trace
/// correlation; a request never revisits an earlier stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStage {
    /// Request admitted, archive folder created
    Start,
    /// Upload decoded and standardized into the model tensor
    Normalized,
    /// Classifier distribution obtained and decision derived
    Classified,
    /// Positive call: segmentor, cleanup and overlay in flight
    Segmenting,
    /// Terminal state
    Done,
}

impl AnalysisStage {
    /// Human-readable description of the stage
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            AnalysisStage::Start => "Admitting upload",
            AnalysisStage::Normalized => "Upload normalized",
            AnalysisStage::Classified => "Classification complete",
            AnalysisStage::Segmenting => "Segmenting pathology extent",
            AnalysisStage::Done => "Analysis complete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_classification() {
        let c = Classification::from_distribution(&[0.9, 0.1], 1).unwrap();
        assert!(!c.has_pathology);
        assert!((c.confidence - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_positive_classification() {
        let c = Classification::from_distribution(&[0.2, 0.8], 1).unwrap();
        assert!(c.has_pathology);
        assert!((c.confidence - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_positive_class_index_zero() {
        // Same distribution, inverted class convention
        let c = Classification::from_distribution(&[0.9, 0.1], 0).unwrap();
        assert!(c.has_pathology);
    }

    #[test]
    fn test_rejects_non_binary_distribution() {
        assert!(Classification::from_distribution(&[1.0], 1).is_err());
        assert!(Classification::from_distribution(&[0.3, 0.3, 0.4], 1).is_err());
    }

    #[test]
    fn test_report_serializes_null_artifacts() {
        let report = AnalysisReport {
            analysis_id: "20240301120000".to_string(),
            has_pathology: false,
            confidence: 0.9,
            artifact_paths: ArtifactPaths {
                original: "analysis_20240301120000/original.jpg".to_string(),
                mask: None,
                overlay: None,
            },
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"mask\":null"));
        assert!(json.contains("\"overlay\":null"));
    }
}
