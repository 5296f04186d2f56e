//! Predictor backend implementations
//!
//! - Tract backend: pure Rust ONNX inference, no external dependencies
//! - Mock backend: scripted predictors for tests and wiring checks

#[cfg(feature = "tract")]
pub mod tract;

pub mod mock;

#[cfg(feature = "tract")]
pub use self::tract::{TractPredictor, TractPredictorFactory};

pub use self::mock::{MockClassifier, MockPredictorFactory, MockSegmentor};
