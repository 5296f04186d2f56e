//! Predictor abstraction shared by the classifier and segmentor

use crate::error::{AnalysisError, Result};
use ndarray::{Array4, ArrayD};
use std::sync::{Arc, Mutex};

/// Trait for opaque predictors.
///
/// Both the classifier (distribution output) and the segmentor
/// (probability-map output) satisfy this one contract: a normalized
/// `(1, 256, 256, 3)` tensor in, an array of floats out, synchronously and
/// deterministically for identical input.
pub trait Predictor: Send + Sync + std::fmt::Debug {
    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Predictor unavailable or internal inference failure
    /// - Input tensor rejected by the underlying model
    fn predict(&self, input: &Array4<f32>) -> Result<ArrayD<f32>>;

    /// Short name for tracing and error messages
    fn name(&self) -> &str;
}

/// Process-wide shared predictor handle: immutable after startup, shared
/// read-only by all requests.
pub type PredictorHandle = Arc<dyn Predictor>;

/// The pair of predictors the pipeline needs, loaded once at startup.
#[derive(Debug, Clone)]
pub struct PredictorSet {
    classifier: PredictorHandle,
    segmentor: PredictorHandle,
}

impl PredictorSet {
    /// Bundle a classifier and a segmentor into one injectable set
    #[must_use]
    pub fn new(classifier: PredictorHandle, segmentor: PredictorHandle) -> Self {
        Self {
            classifier,
            segmentor,
        }
    }

    /// The two-class pathology classifier
    #[must_use]
    pub fn classifier(&self) -> &dyn Predictor {
        self.classifier.as_ref()
    }

    /// The per-pixel extent segmentor
    #[must_use]
    pub fn segmentor(&self) -> &dyn Predictor {
        self.segmentor.as_ref()
    }
}

/// Trait for predictors whose implementations are not safely reentrant and
/// therefore need `&mut` access per invocation.
pub trait ExclusivePredictor: Send + std::fmt::Debug {
    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Predictor unavailable or internal inference failure
    fn predict(&mut self, input: &Array4<f32>) -> Result<ArrayD<f32>>;

    /// Short name for tracing and error messages
    fn name(&self) -> &str;
}

/// Adapter that makes a non-reentrant predictor shareable by serializing
/// every invocation behind a mutex. Concurrent callers block; they never
/// interleave inside the wrapped predictor.
#[derive(Debug)]
pub struct SerializedPredictor<P: ExclusivePredictor> {
    name: String,
    inner: Mutex<P>,
}

impl<P: ExclusivePredictor> SerializedPredictor<P> {
    /// Wrap a non-reentrant predictor
    pub fn new(inner: P) -> Self {
        Self {
            name: inner.name().to_string(),
            inner: Mutex::new(inner),
        }
    }
}

impl<P: ExclusivePredictor> Predictor for SerializedPredictor<P> {
    fn predict(&self, input: &Array4<f32>) -> Result<ArrayD<f32>> {
        let mut guard = self.inner.lock().map_err(|_| {
            AnalysisError::inference(format!(
                "Predictor '{}' poisoned by a panicking invocation",
                self.name
            ))
        })?;
        guard.predict(input)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[derive(Debug)]
    struct CountingExclusive {
        calls: usize,
    }

    impl ExclusivePredictor for CountingExclusive {
        fn predict(&mut self, _input: &Array4<f32>) -> Result<ArrayD<f32>> {
            self.calls += 1;
            Ok(ArrayD::from_elem(IxDyn(&[1, 2]), 0.5))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_serialized_predictor_delegates() {
        let predictor = SerializedPredictor::new(CountingExclusive { calls: 0 });
        let input = Array4::<f32>::zeros((1, 4, 4, 3));

        let out = predictor.predict(&input).unwrap();
        assert_eq!(out.shape(), &[1, 2]);
        assert_eq!(predictor.name(), "counting");
    }

    #[test]
    fn test_serialized_predictor_is_shareable() {
        let predictor = Arc::new(SerializedPredictor::new(CountingExclusive { calls: 0 }));
        let input = Array4::<f32>::zeros((1, 4, 4, 3));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = Arc::clone(&predictor);
                let t = input.clone();
                std::thread::spawn(move || p.predict(&t).unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().shape(), &[1, 2]);
        }
    }
}
