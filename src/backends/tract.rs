//! Tract backend: pure-Rust ONNX predictors
//!
//! Runs both the classifier and the segmentor with Tract, a pure Rust
//! neural network inference library. No C++ runtime, no FFI boundary, and
//! the compiled plan is safe to call from any number of threads at once.

use crate::config::MODEL_INPUT_SIZE;
use crate::error::{AnalysisError, Result};
use crate::inference::{Predictor, PredictorHandle};
use crate::models::PredictorFactory;
use ndarray::{Array4, ArrayD, IxDyn};
use std::sync::Arc;
use tract_onnx::prelude::*;

/// Type alias for the optimized runnable Tract model
type TractPlan = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A predictor backed by an optimized Tract plan
pub struct TractPredictor {
    plan: TractPlan,
    name: String,
}

impl std::fmt::Debug for TractPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TractPredictor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl TractPredictor {
    /// Build a predictor from ONNX weight bytes, pinning the input to the
    /// pipeline's `(1, 256, 256, 3)` tensor shape.
    ///
    /// # Errors
    /// - ONNX parsing, shape-pinning, or plan optimization failures
    pub fn from_bytes(weights: &[u8], name: &str) -> Result<Self> {
        let side = MODEL_INPUT_SIZE as i64;

        let plan = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(weights))
            .map_err(|e| AnalysisError::model(format!("Failed to parse ONNX '{name}': {e}")))?
            .with_input_fact(0, f32::fact([1, side, side, 3]).into())
            .map_err(|e| {
                AnalysisError::model(format!("Failed to pin input shape for '{name}': {e}"))
            })?
            .into_optimized()
            .map_err(|e| AnalysisError::model(format!("Failed to optimize '{name}': {e}")))?
            .into_runnable()
            .map_err(|e| AnalysisError::model(format!("Failed to plan '{name}': {e}")))?;

        log::info!("Tract plan ready for '{name}' ({} weight bytes)", weights.len());

        Ok(Self {
            plan,
            name: name.to_string(),
        })
    }
}

impl Predictor for TractPredictor {
    fn predict(&self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let shape: Vec<usize> = input.shape().to_vec();
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_shape(&shape, &data).map_err(|e| {
            AnalysisError::inference(format!("Failed to build input tensor for '{}': {e}", self.name))
        })?;

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| AnalysisError::inference(format!("'{}' inference failed: {e}", self.name)))?;

        let output = outputs.first().ok_or_else(|| {
            AnalysisError::inference(format!("'{}' produced no outputs", self.name))
        })?;
        let view = output.to_array_view::<f32>().map_err(|e| {
            AnalysisError::inference(format!("'{}' output is not f32: {e}", self.name))
        })?;

        ArrayD::from_shape_vec(IxDyn(view.shape()), view.iter().copied().collect())
            .map_err(|e| AnalysisError::inference(format!("'{}' output shape error: {e}", self.name)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Production factory building Tract-backed predictors from weight bytes
#[derive(Debug, Default)]
pub struct TractPredictorFactory;

impl TractPredictorFactory {
    /// Create a new factory
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl PredictorFactory for TractPredictorFactory {
    fn build_classifier(&self, weights: &[u8]) -> Result<PredictorHandle> {
        Ok(Arc::new(TractPredictor::from_bytes(weights, "classifier")?))
    }

    fn build_segmentor(&self, weights: &[u8]) -> Result<PredictorHandle> {
        Ok(Arc::new(TractPredictor::from_bytes(weights, "segmentor")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_weights_are_model_errors() {
        let err = TractPredictor::from_bytes(b"not an onnx graph", "classifier").unwrap_err();
        assert!(matches!(err, AnalysisError::Model(_)));
    }
}
