//! Mock predictors for testing
//!
//! Scripted implementations of the [`Predictor`] trait so the pipeline can
//! be exercised without model weights. Both mocks count their invocations,
//! which lets tests assert that the segmentor is never reached on a
//! negative classification.

use crate::error::{AnalysisError, Result};
use crate::inference::{Predictor, PredictorHandle};
use crate::models::PredictorFactory;
use ndarray::{Array4, ArrayD, IxDyn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Mock classifier returning a fixed two-class distribution
#[derive(Debug, Clone)]
pub struct MockClassifier {
    distribution: Vec<f32>,
    should_fail: bool,
    invocations: Arc<AtomicUsize>,
}

impl MockClassifier {
    /// Classifier returning exactly `distribution`
    #[must_use]
    pub fn with_distribution(distribution: Vec<f32>) -> Self {
        Self {
            distribution,
            should_fail: false,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Classifier calling the pathology present with `confidence`
    #[must_use]
    pub fn positive(confidence: f32) -> Self {
        Self::with_distribution(vec![1.0 - confidence, confidence])
    }

    /// Classifier calling the pathology absent with `confidence`
    #[must_use]
    pub fn negative(confidence: f32) -> Self {
        Self::with_distribution(vec![confidence, 1.0 - confidence])
    }

    /// Classifier that fails every invocation
    #[must_use]
    pub fn failing() -> Self {
        let mut mock = Self::with_distribution(vec![0.5, 0.5]);
        mock.should_fail = true;
        mock
    }

    /// Number of times this classifier has been invoked (shared across
    /// clones)
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Predictor for MockClassifier {
    fn predict(&self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if self.should_fail {
            return Err(AnalysisError::inference("Mock classifier failure"));
        }
        if input.shape()[0] != 1 {
            return Err(AnalysisError::inference(
                "Mock classifier expects a single-image batch",
            ));
        }

        ArrayD::from_shape_vec(IxDyn(&[1, self.distribution.len()]), self.distribution.clone())
            .map_err(|e| AnalysisError::inference(e.to_string()))
    }

    fn name(&self) -> &str {
        "mock-classifier"
    }
}

/// Mock segmentor painting a configurable probability map at the input's
/// spatial resolution
#[derive(Debug, Clone)]
pub struct MockSegmentor {
    /// Rectangle `(x, y, width, height)` of elevated probability, in model
    /// resolution pixels; `None` paints the whole map uniformly
    positive_region: Option<(usize, usize, usize, usize)>,
    inside_probability: f32,
    outside_probability: f32,
    should_fail: bool,
    invocations: Arc<AtomicUsize>,
}

impl MockSegmentor {
    /// Segmentor painting `probability` everywhere
    #[must_use]
    pub fn uniform(probability: f32) -> Self {
        Self {
            positive_region: None,
            inside_probability: probability,
            outside_probability: probability,
            should_fail: false,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Segmentor painting `inside_probability` over one rectangle and a
    /// near-zero probability elsewhere
    #[must_use]
    pub fn with_block(
        x: usize,
        y: usize,
        width: usize,
        height: usize,
        inside_probability: f32,
    ) -> Self {
        Self {
            positive_region: Some((x, y, width, height)),
            inside_probability,
            outside_probability: 0.05,
            should_fail: false,
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Segmentor that fails every invocation
    #[must_use]
    pub fn failing() -> Self {
        let mut mock = Self::uniform(0.0);
        mock.should_fail = true;
        mock
    }

    /// Number of times this segmentor has been invoked (shared across
    /// clones)
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl Predictor for MockSegmentor {
    fn predict(&self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if self.should_fail {
            return Err(AnalysisError::inference("Mock segmentor failure"));
        }

        let shape = input.shape();
        if shape.len() != 4 || shape[0] != 1 {
            return Err(AnalysisError::inference(
                "Mock segmentor expects a single-image NHWC batch",
            ));
        }
        let (height, width) = (shape[1], shape[2]);

        let mut output = ArrayD::from_elem(
            IxDyn(&[1, height, width, 1]),
            self.outside_probability,
        );
        if let Some((x0, y0, w, h)) = self.positive_region {
            for y in y0..(y0 + h).min(height) {
                for x in x0..(x0 + w).min(width) {
                    output[[0, y, x, 0]] = self.inside_probability;
                }
            }
        }

        Ok(output)
    }

    fn name(&self) -> &str {
        "mock-segmentor"
    }
}

/// Factory handing out mock predictors regardless of the weight bytes
#[derive(Debug, Clone)]
pub struct MockPredictorFactory {
    classifier: MockClassifier,
    segmentor: MockSegmentor,
}

impl MockPredictorFactory {
    /// Factory producing the given mocks
    #[must_use]
    pub fn new(classifier: MockClassifier, segmentor: MockSegmentor) -> Self {
        Self {
            classifier,
            segmentor,
        }
    }
}

impl Default for MockPredictorFactory {
    fn default() -> Self {
        Self::new(MockClassifier::negative(0.9), MockSegmentor::uniform(0.0))
    }
}

impl PredictorFactory for MockPredictorFactory {
    fn build_classifier(&self, _weights: &[u8]) -> Result<PredictorHandle> {
        Ok(Arc::new(self.classifier.clone()))
    }

    fn build_segmentor(&self, _weights: &[u8]) -> Result<PredictorHandle> {
        Ok(Arc::new(self.segmentor.clone()))
    }
}
